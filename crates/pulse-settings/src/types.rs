//! Settings type definitions.
//!
//! Grouped by concern. Every struct carries compiled defaults so a missing
//! or partial settings file still yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level settings for the Pulse client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Realtime socket settings.
    pub realtime: RealtimeSettings,
    /// Notification ledger settings.
    pub notifications: NotificationSettings,
    /// REST API settings.
    pub api: ApiSettings,
    /// Local persistence settings.
    pub store: StoreSettings,
    /// Minimum log level when `RUST_LOG` is unset.
    pub log_level: String,
}

/// Realtime socket lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// WebSocket endpoint, parameterized at connect time by
    /// `token` and `business_id` query parameters.
    pub ws_url: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Base reconnect delay in milliseconds.
    pub base_delay_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Debounce window for the authoritative thread refetch, ms.
    pub refetch_debounce_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://push.pulseinbox.app/notifications".to_string(),
            connect_timeout_ms: 10_000,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            refetch_debounce_ms: 1000,
        }
    }
}

/// Notification ledger settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Redelivery dedup window in milliseconds.
    pub dedup_window_ms: i64,
    /// Maximum retained ledger entries.
    pub ledger_cap: usize,
    /// URL of the alert sound asset.
    pub sound_url: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            dedup_window_ms: 5000,
            ledger_cap: 50,
            sound_url: "https://cdn.pulseinbox.app/assets/alert.mp3".to_string(),
        }
    }
}

/// REST API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL for the REST collaborators.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.pulseinbox.app".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

/// Local persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Path to the SQLite database (relative paths resolve under `~/.pulse`).
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "inbox.db".to_string(),
            pool_size: 4,
        }
    }
}

impl PulseSettings {
    /// Effective log level, falling back to `info` when unset.
    #[must_use]
    pub fn effective_log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
