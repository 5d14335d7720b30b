//! Error types for the realtime subsystem.
//!
//! The split mirrors how failures are handled: [`RealtimeError`] covers the
//! socket lifecycle (retried or terminal inside the supervisor), while
//! [`ApiError`] covers the REST collaborators (absorbed by the dispatcher's
//! reconciliation path).

use thiserror::Error;

/// Errors from the socket lifecycle.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The transport failed to establish a connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The endpoint URL could not be built.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors from the REST collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the server.
    #[error("unexpected status: {0}")]
    Status(u16),
}

/// Convenience type alias for realtime results.
pub type Result<T> = std::result::Result<T, RealtimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
