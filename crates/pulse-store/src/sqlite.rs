//! `SQLite` connection pool with WAL mode enabled.
//!
//! Uses `r2d2` connection pooling with the `r2d2_sqlite` backend.
//! The [`PragmaCustomizer`] runs on each new connection to ensure WAL mode
//! and performance pragmas are set.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::{Result, StoreError};

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Alias for a pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size (default: 4).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

/// `SQLite` pragma customizer that runs on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;\
             PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))?;
        Ok(())
    }
}

/// Create an in-memory connection pool (for testing).
///
/// The pool is capped at a single connection: each `:memory:` connection
/// would otherwise open its own private database.
pub fn new_in_memory() -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(std::time::Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: 5000,
        }))
        .build(manager)?;
    init_schema(&pool)?;
    Ok(pool)
}

/// Create a file-backed connection pool and initialize the schema.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(std::time::Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(manager)?;
    init_schema(&pool)?;
    Ok(pool)
}

/// Create the tables Pulse persists into.
///
/// `snapshots` holds identity-partitioned JSON blobs; `globals` holds
/// process-wide flags (currently only the sound-enabled flag).
fn init_schema(pool: &ConnectionPool) -> Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS snapshots (
             user_key     TEXT NOT NULL,
             business_key TEXT NOT NULL,
             name         TEXT NOT NULL,
             value        TEXT NOT NULL,
             updated_at   TEXT NOT NULL,
             PRIMARY KEY (user_key, business_key, name)
         );
         CREATE TABLE IF NOT EXISTS globals (
             name  TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )
    .map_err(|e| StoreError::Schema {
        message: e.to_string(),
    })?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
