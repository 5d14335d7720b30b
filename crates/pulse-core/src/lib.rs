//! # pulse-core
//!
//! Foundation types for the Pulse inbox sync client.
//!
//! This crate provides the shared vocabulary the other Pulse crates depend on:
//!
//! - **Branded IDs**: `ThreadId`, `NotificationId`, `ContactId` as newtypes
//! - **Data model**: `Conversation`, `Message`, `Notification`, `IdentityContext`
//! - **Connection vocabulary**: `ConnectionStatus`, `CloseCode`, backoff math
//! - **Logging**: `init_subscriber` for the `tracing` stack

#![deny(unsafe_code)]

pub mod connection;
pub mod ids;
pub mod logging;
pub mod model;

pub use connection::{ConnectionStatus, CloseCode, backoff_delay_ms};
pub use ids::{ContactId, NotificationId, ThreadId};
pub use model::{
    Contact, Conversation, ConversationPatch, IdentityContext, Message, Notification,
    NotificationKind,
};
