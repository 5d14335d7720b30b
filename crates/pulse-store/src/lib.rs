//! # pulse-store
//!
//! Identity-scoped persistence and the two state components built on it.
//!
//! - **[`IdentityStore`]**: durable JSON snapshots partitioned by
//!   `(user, business)`, backed by `SQLite` (rusqlite + r2d2, WAL)
//! - **[`ConversationProjection`]**: ordered, deduplicated conversation
//!   list plus the per-thread message log and its reconciliation merge
//! - **[`NotificationLedger`]**: capped notification history and
//!   per-thread unread counters

#![deny(unsafe_code)]

pub mod errors;
pub mod kv;
pub mod ledger;
pub mod projection;
pub mod sqlite;

pub use errors::{Result, StoreError};
pub use kv::IdentityStore;
pub use ledger::{LedgerConfig, NotificationLedger};
pub use projection::ConversationProjection;
pub use sqlite::{ConnectionConfig, ConnectionPool};
