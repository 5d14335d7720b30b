//! Notification ledger: capped history plus per-thread unread counters.
//!
//! The ledger absorbs the at-least-once delivery of the push server: a
//! redelivered notification (same thread, body, and kind within the dedup
//! window) is a no-op. History is capped at the most recent entries; unread
//! counters are independent of eviction and only reset on mark-read.
//!
//! All state is partitioned by [`IdentityContext`]; `set_context` flushes
//! the outgoing partition before loading the incoming one, so nothing ever
//! crosses identity boundaries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_core::{IdentityContext, Notification, NotificationId, ThreadId};

use crate::kv::IdentityStore;

const LEDGER_SNAPSHOT: &str = "ledger";

/// Ledger tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct LedgerConfig {
    /// Maximum retained entries (oldest evicted first).
    pub cap: usize,
    /// Redelivery dedup window in milliseconds.
    pub dedup_window_ms: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cap: 50,
            dedup_window_ms: 5000,
        }
    }
}

/// Persisted shape of one identity partition.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerSnapshot {
    entries: Vec<Notification>,
    unread: HashMap<ThreadId, u32>,
}

struct LedgerState {
    identity: IdentityContext,
    /// Newest first.
    entries: VecDeque<Notification>,
    unread: HashMap<ThreadId, u32>,
}

/// Identity-scoped notification history and unread counters.
pub struct NotificationLedger {
    store: Arc<IdentityStore>,
    config: LedgerConfig,
    state: RwLock<LedgerState>,
}

impl NotificationLedger {
    /// Create a ledger for `identity`, restoring any persisted partition.
    pub fn new(store: Arc<IdentityStore>, identity: IdentityContext, config: LedgerConfig) -> Self {
        let snapshot: LedgerSnapshot = store
            .load_best_effort(&identity, LEDGER_SNAPSHOT)
            .unwrap_or_default();
        Self {
            store,
            config,
            state: RwLock::new(LedgerState {
                identity,
                entries: snapshot.entries.into(),
                unread: snapshot.unread,
            }),
        }
    }

    /// Append a notification unless it is a redelivery duplicate.
    ///
    /// Returns `true` when the entry was actually appended. Duplicates
    /// (same thread, body, kind within the dedup window) are dropped so a
    /// reconnect replay cannot double-notify.
    pub fn append(&self, notification: Notification) -> bool {
        let mut state = self.state.write();
        let duplicate = state
            .entries
            .iter()
            .any(|n| notification.is_duplicate_of(n, self.config.dedup_window_ms));
        if duplicate {
            debug!(thread = %notification.thread_id, "duplicate notification dropped");
            return false;
        }

        state.entries.push_front(notification);
        while state.entries.len() > self.config.cap {
            let _ = state.entries.pop_back();
        }
        self.persist(&state);
        true
    }

    /// Remove one entry by id. Unknown ids are a no-op.
    pub fn remove(&self, id: &NotificationId) {
        let mut state = self.state.write();
        state.entries.retain(|n| n.id != *id);
        self.persist(&state);
    }

    /// Mark one entry read. Does not touch the thread counter.
    pub fn mark_read(&self, id: &NotificationId) {
        let mut state = self.state.write();
        if let Some(entry) = state.entries.iter_mut().find(|n| n.id == *id) {
            entry.is_read = true;
        }
        self.persist(&state);
    }

    /// Mark every entry for a thread read and zero its unread counter.
    ///
    /// Called the moment a thread becomes focused.
    pub fn mark_thread_read(&self, thread_id: &ThreadId) {
        let mut state = self.state.write();
        for entry in state.entries.iter_mut().filter(|n| n.thread_id == *thread_id) {
            entry.is_read = true;
        }
        let _ = state.unread.remove(thread_id);
        self.persist(&state);
    }

    /// Increment the unread counter for a thread.
    pub fn increment_unread(&self, thread_id: &ThreadId) {
        let mut state = self.state.write();
        *state.unread.entry(thread_id.clone()).or_insert(0) += 1;
        self.persist(&state);
    }

    /// Unread count for one thread.
    pub fn unread_for(&self, thread_id: &ThreadId) -> u32 {
        self.state.read().unread.get(thread_id).copied().unwrap_or(0)
    }

    /// Total unread across all threads (sum of counters, independent of
    /// ledger eviction).
    pub fn total_unread(&self) -> u32 {
        self.state.read().unread.values().sum()
    }

    /// Ledger entries, newest first.
    pub fn entries(&self) -> Vec<Notification> {
        self.state.read().entries.iter().cloned().collect()
    }

    /// Switch to a different identity partition.
    ///
    /// Flushes the current partition to the store first, then loads (or
    /// initializes empty) the partition for the new identity.
    pub fn set_context(&self, identity: IdentityContext) {
        let mut state = self.state.write();
        if state.identity == identity {
            return;
        }
        self.persist(&state);

        let snapshot: LedgerSnapshot = self
            .store
            .load_best_effort(&identity, LEDGER_SNAPSHOT)
            .unwrap_or_default();
        state.identity = identity;
        state.entries = snapshot.entries.into();
        state.unread = snapshot.unread;
    }

    /// Flush the current partition to the store.
    pub fn flush(&self) {
        let state = self.state.read();
        self.persist(&state);
    }

    fn persist(&self, state: &LedgerState) {
        let snapshot = LedgerSnapshot {
            entries: state.entries.iter().cloned().collect(),
            unread: state.unread.clone(),
        };
        self.store
            .save_best_effort(&state.identity, LEDGER_SNAPSHOT, &snapshot);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
