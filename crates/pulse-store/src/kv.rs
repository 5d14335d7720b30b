//! Identity-scoped key/value snapshots.
//!
//! [`IdentityStore`] is the one durable store in the client. State
//! components write JSON blobs through it keyed by a structured
//! [`IdentityContext`] plus a snapshot name, so no two identities can ever
//! read each other's partitions. A second, unpartitioned table holds
//! process-wide flags (the sound-enabled toggle).
//!
//! Persistence is best-effort by contract: callers that cannot meaningfully
//! handle a storage failure use [`IdentityStore::save_best_effort`], which
//! logs at `warn` and swallows the error.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use pulse_core::IdentityContext;

use crate::errors::Result;
use crate::sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};

/// Durable, identity-partitioned JSON store.
pub struct IdentityStore {
    pool: ConnectionPool,
}

impl IdentityStore {
    /// Open a file-backed store, creating the schema if needed.
    pub fn open_file(path: &str, config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            pool: new_file(path, config)?,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            pool: new_in_memory()?,
        })
    }

    /// Persist a snapshot under `(identity, name)`.
    pub fn save<T: Serialize>(
        &self,
        identity: &IdentityContext,
        name: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO snapshots (user_key, business_key, name, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_key, business_key, name)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![
                identity.user_key,
                identity.business_key,
                name,
                json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load a snapshot, `None` when the partition has never been written.
    pub fn load<T: DeserializeOwned>(
        &self,
        identity: &IdentityContext,
        name: &str,
    ) -> Result<Option<T>> {
        let conn = self.pool.get()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM snapshots
                 WHERE user_key = ?1 AND business_key = ?2 AND name = ?3",
                params![identity.user_key, identity.business_key, name],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Delete a snapshot. Missing rows are not an error.
    pub fn delete(&self, identity: &IdentityContext, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "DELETE FROM snapshots
             WHERE user_key = ?1 AND business_key = ?2 AND name = ?3",
            params![identity.user_key, identity.business_key, name],
        )?;
        Ok(())
    }

    /// Persist a snapshot, logging and swallowing any failure.
    pub fn save_best_effort<T: Serialize>(
        &self,
        identity: &IdentityContext,
        name: &str,
        value: &T,
    ) {
        if let Err(e) = self.save(identity, name, value) {
            warn!(identity = %identity, name, error = %e, "snapshot save failed");
        }
    }

    /// Load a snapshot, logging and swallowing any failure.
    pub fn load_best_effort<T: DeserializeOwned>(
        &self,
        identity: &IdentityContext,
        name: &str,
    ) -> Option<T> {
        match self.load(identity, name) {
            Ok(value) => value,
            Err(e) => {
                warn!(identity = %identity, name, error = %e, "snapshot load failed");
                None
            }
        }
    }

    /// Persist a process-wide (non-identity-scoped) value.
    pub fn save_global<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO globals (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
            params![name, json],
        )?;
        Ok(())
    }

    /// Load a process-wide value.
    pub fn load_global<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let conn = self.pool.get()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM globals WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Whether the audio alert is enabled (defaults to `true`).
    pub fn sound_enabled(&self) -> bool {
        match self.load_global::<bool>("sound_enabled") {
            Ok(Some(enabled)) => enabled,
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "sound flag load failed, defaulting to enabled");
                true
            }
        }
    }

    /// Toggle the audio alert flag.
    pub fn set_sound_enabled(&self, enabled: bool) {
        if let Err(e) = self.save_global("sound_enabled", &enabled) {
            warn!(error = %e, "sound flag save failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
