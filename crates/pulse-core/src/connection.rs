//! Connection status vocabulary and backoff calculation.
//!
//! The async supervisor lives in `pulse-realtime` (which has access to
//! tokio); this module contains the portable, sync-only building blocks:
//!
//! - [`ConnectionStatus`]: the observable state machine
//! - [`CloseCode`]: WebSocket close code taxonomy
//! - [`backoff_delay_ms`]: capped exponential backoff

use serde::{Deserialize, Serialize};

/// Default base delay in milliseconds.
pub const BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay cap in milliseconds.
pub const MAX_DELAY_MS: u64 = 30_000;
/// Default maximum number of consecutive reconnect attempts.
pub const MAX_ATTEMPTS: u32 = 5;
/// Default connect timeout in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Observable connection state, published for the status indicator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No socket; nothing scheduled.
    #[default]
    Disconnected,
    /// A connect attempt is in flight or a retry is pending.
    Connecting,
    /// The socket is open and frames are flowing.
    Connected,
    /// Terminal until an explicit `reconnect()`: auth failure, missing
    /// credentials, or retry attempts exhausted.
    Error,
}

impl ConnectionStatus {
    /// Whether this status represents an active or pending connection.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// WebSocket close codes we distinguish.
///
/// The taxonomy only drives the clean-vs-unclean decision: code 1000 with a
/// clean close suppresses reconnection, everything else retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000 — normal closure.
    Normal,
    /// 1001 — endpoint going away.
    GoingAway,
    /// 1002 — protocol error.
    ProtocolError,
    /// 1003 — unsupported data.
    UnsupportedData,
    /// 1006 — abnormal closure, no close frame received.
    Abnormal,
    /// 1007 — invalid payload data.
    InvalidPayload,
    /// 1008 — policy violation.
    PolicyViolation,
    /// 1009 — message too big.
    TooBig,
    /// 1010 — mandatory extension missing.
    MissingExtension,
    /// 1011 — server internal error.
    InternalError,
    /// 1015 — TLS handshake failure.
    TlsFailure,
    /// Anything else.
    Other(u16),
}

impl CloseCode {
    /// Map a numeric close code.
    #[must_use]
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::TooBig,
            1010 => Self::MissingExtension,
            1011 => Self::InternalError,
            1015 => Self::TlsFailure,
            other => Self::Other(other),
        }
    }

    /// Numeric value of the code.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::Abnormal => 1006,
            Self::InvalidPayload => 1007,
            Self::PolicyViolation => 1008,
            Self::TooBig => 1009,
            Self::MissingExtension => 1010,
            Self::InternalError => 1011,
            Self::TlsFailure => 1015,
            Self::Other(code) => code,
        }
    }

    /// Whether a close with this code and flag suppresses reconnection.
    ///
    /// Only a normal closure that also completed the close handshake counts
    /// as clean; everything else schedules a retry.
    #[must_use]
    pub fn is_clean(self, was_clean: bool) -> bool {
        self == Self::Normal && was_clean
    }
}

/// Capped exponential backoff: `min(base * 2^attempt, max)`.
///
/// `attempt` is zero-based: attempt 0 waits `base`, attempt 1 waits
/// `2 * base`, and so on. With the defaults the schedule is exactly
/// 1s, 2s, 4s, 8s, 16s.
#[must_use]
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.min(31)).min(max_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_contract() {
        let delays: Vec<u64> = (0..MAX_ATTEMPTS)
            .map(|a| backoff_delay_ms(a, BASE_DELAY_MS, MAX_DELAY_MS))
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(backoff_delay_ms(5, 1000, 30_000), 30_000);
        assert_eq!(backoff_delay_ms(20, 1000, 30_000), 30_000);
    }

    #[test]
    fn backoff_high_attempt_no_overflow() {
        let delay = backoff_delay_ms(1000, 1000, 30_000);
        assert_eq!(delay, 30_000);
    }

    #[test]
    fn status_default_is_disconnected() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn status_is_live() {
        assert!(ConnectionStatus::Connecting.is_live());
        assert!(ConnectionStatus::Connected.is_live());
        assert!(!ConnectionStatus::Disconnected.is_live());
        assert!(!ConnectionStatus::Error.is_live());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Connecting).unwrap(),
            "\"connecting\""
        );
    }

    #[test]
    fn close_code_mapping_roundtrip() {
        for code in [1000, 1001, 1002, 1003, 1006, 1007, 1008, 1009, 1010, 1011, 1015, 4999] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn only_normal_and_clean_is_clean() {
        assert!(CloseCode::Normal.is_clean(true));
        assert!(!CloseCode::Normal.is_clean(false));
        assert!(!CloseCode::Abnormal.is_clean(true));
        assert!(!CloseCode::GoingAway.is_clean(true));
    }

    #[test]
    fn unknown_code_maps_to_other() {
        assert_eq!(CloseCode::from_u16(4001), CloseCode::Other(4001));
    }

    proptest::proptest! {
        #[test]
        fn backoff_never_exceeds_the_cap(attempt in 0u32..10_000, base in 1u64..10_000, max in 1u64..100_000) {
            proptest::prop_assert!(backoff_delay_ms(attempt, base, max) <= max);
        }

        #[test]
        fn backoff_is_monotonic_below_the_cap(attempt in 0u32..30, base in 1u64..1000) {
            let max = u64::MAX;
            proptest::prop_assert!(
                backoff_delay_ms(attempt, base, max) <= backoff_delay_ms(attempt + 1, base, max)
            );
        }

        #[test]
        fn close_code_mapping_is_total(code: u16) {
            proptest::prop_assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }
}
