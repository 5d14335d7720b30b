//! Error types for the persistence subsystem.
//!
//! [`StoreError`] is the primary error type returned by store operations.
//! Callers in the state components treat every variant as recoverable:
//! persistence is best-effort, failures are logged and swallowed.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema initialization failed.
    #[error("schema error: {message}")]
    Schema {
        /// Describes which statement failed and why.
        message: String,
    },
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
