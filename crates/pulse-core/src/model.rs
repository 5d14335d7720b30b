//! Core data model: conversations, messages, notifications, identity.
//!
//! All timestamps are `chrono::DateTime<Utc>` and serialize as RFC 3339.
//! Field names follow the camelCase wire convention used by the product's
//! other clients so persisted snapshots stay portable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, ThreadId};

/// Fallback contact name used when a thread cannot be resolved.
pub const UNKNOWN_CONTACT_NAME: &str = "Unknown contact";

/// Fallback contact channel used when a thread cannot be resolved.
pub const UNKNOWN_CONTACT_TYPE: &str = "unknown";

/// A single message within a thread. Append-only; ordered by `sent_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message body text.
    pub content: String,
    /// True when the message was sent by the operator side (us).
    pub is_from_operator: bool,
    /// When the message was sent. Ordering key.
    pub sent_at: DateTime<Utc>,
    /// Optional attached photo URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Optional call-to-action URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Optional attached document URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

impl Message {
    /// Build a plain text message.
    #[must_use]
    pub fn text(content: impl Into<String>, is_from_operator: bool, sent_at: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            is_from_operator,
            sent_at,
            photo_url: None,
            action_url: None,
            document_url: None,
        }
    }
}

/// One ongoing exchange with an external contact across one channel.
///
/// Keyed by `thread_id`, unique across an identity's conversation set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Server-assigned thread identifier.
    pub thread_id: ThreadId,
    /// Channel the contact reached us on (e.g. `whatsapp`, `webchat`).
    pub contact_type: String,
    /// Display name for the contact.
    pub show_name: String,
    /// Optional avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    /// Most recent message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Timestamp of the latest activity. Drives list ordering.
    pub last_activity_at: DateTime<Utc>,
    /// When the thread was first registered.
    pub created_at: DateTime<Utc>,
}

/// Partial update applied to an existing conversation.
///
/// `None` fields are left untouched (shallow merge).
#[derive(Clone, Debug, Default)]
pub struct ConversationPatch {
    /// New contact channel.
    pub contact_type: Option<String>,
    /// New display name.
    pub show_name: Option<String>,
    /// New avatar URL.
    pub profile_image_url: Option<String>,
    /// New latest message.
    pub last_message: Option<Message>,
    /// New latest-activity timestamp.
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Resolved contact metadata for a thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    /// Display name.
    pub name: String,
    /// Channel type.
    pub contact_type: String,
}

impl Contact {
    /// Placeholder contact for threads the projection does not know.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_CONTACT_NAME.to_string(),
            contact_type: UNKNOWN_CONTACT_TYPE.to_string(),
        }
    }
}

/// What kind of event produced a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// A new message arrived on an existing thread.
    Message,
    /// A brand new conversation was opened.
    Conversation,
}

/// One entry in the notification ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Locally minted identifier.
    pub id: NotificationId,
    /// Short headline shown to the operator.
    pub title: String,
    /// Body text (usually the message content).
    pub message: String,
    /// Thread this notification belongs to.
    pub thread_id: ThreadId,
    /// Resolved contact name at the time of the event.
    pub contact_name: String,
    /// Resolved contact channel at the time of the event.
    pub contact_type: String,
    /// When the underlying event happened.
    pub timestamp: DateTime<Utc>,
    /// Message or conversation.
    pub kind: NotificationKind,
    /// Whether the operator has seen it.
    pub is_read: bool,
}

impl Notification {
    /// Whether `other` is a redelivery duplicate of `self`.
    ///
    /// Two notifications are duplicates when they share thread, body, and
    /// kind, and their timestamps fall within `window_ms` of each other.
    /// Redelivery after a reconnect produces exactly this shape.
    #[must_use]
    pub fn is_duplicate_of(&self, other: &Self, window_ms: i64) -> bool {
        self.thread_id == other.thread_id
            && self.message == other.message
            && self.kind == other.kind
            && (self.timestamp - other.timestamp).num_milliseconds().abs() <= window_ms
    }
}

/// The (user, business) pair that scopes notification and unread state.
///
/// All ledger state is partitioned by this pair; switching context flushes
/// the old partition and loads the new one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    /// Stable key for the signed-in user (e.g. the account email).
    pub user_key: String,
    /// Stable key for the selected business.
    pub business_key: String,
}

impl IdentityContext {
    /// Build an identity context.
    #[must_use]
    pub fn new(user_key: impl Into<String>, business_key: impl Into<String>) -> Self {
        Self {
            user_key: user_key.into(),
            business_key: business_key.into(),
        }
    }
}

impl std::fmt::Display for IdentityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_key, self.business_key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn notification(thread: &str, message: &str, kind: NotificationKind, secs: i64) -> Notification {
        Notification {
            id: NotificationId::new(),
            title: "New message".into(),
            message: message.into(),
            thread_id: ThreadId::from(thread),
            contact_name: "Ada".into(),
            contact_type: "whatsapp".into(),
            timestamp: at(secs),
            kind,
            is_read: false,
        }
    }

    #[test]
    fn duplicate_within_window() {
        let a = notification("t1", "hi", NotificationKind::Message, 0);
        let b = notification("t1", "hi", NotificationKind::Message, 3);
        assert!(b.is_duplicate_of(&a, 5000));
    }

    #[test]
    fn not_duplicate_outside_window() {
        let a = notification("t1", "hi", NotificationKind::Message, 0);
        let b = notification("t1", "hi", NotificationKind::Message, 6);
        assert!(!b.is_duplicate_of(&a, 5000));
    }

    #[test]
    fn not_duplicate_across_threads() {
        let a = notification("t1", "hi", NotificationKind::Message, 0);
        let b = notification("t2", "hi", NotificationKind::Message, 0);
        assert!(!b.is_duplicate_of(&a, 5000));
    }

    #[test]
    fn not_duplicate_across_kinds() {
        let a = notification("t1", "hi", NotificationKind::Message, 0);
        let b = notification("t1", "hi", NotificationKind::Conversation, 0);
        assert!(!b.is_duplicate_of(&a, 5000));
    }

    #[test]
    fn duplicate_window_is_symmetric() {
        let a = notification("t1", "hi", NotificationKind::Message, 3);
        let b = notification("t1", "hi", NotificationKind::Message, 0);
        assert!(b.is_duplicate_of(&a, 5000));
        assert!(a.is_duplicate_of(&b, 5000));
    }

    #[test]
    fn conversation_serde_roundtrip() {
        let conv = Conversation {
            thread_id: ThreadId::from("t-9"),
            contact_type: "webchat".into(),
            show_name: "Grace".into(),
            profile_image_url: None,
            last_message: Some(Message::text("hello", false, at(10))),
            last_activity_at: at(10),
            created_at: at(1),
        };
        let json = serde_json::to_string(&conv).unwrap();
        assert!(json.contains("\"threadId\":\"t-9\""));
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conv);
    }

    #[test]
    fn message_optional_fields_skipped() {
        let msg = Message::text("hi", true, at(0));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("photoUrl"));
        assert!(!json.contains("actionUrl"));
    }

    #[test]
    fn notification_kind_serializes_lowercase() {
        let json = serde_json::to_string(&NotificationKind::Message).unwrap();
        assert_eq!(json, "\"message\"");
        let json = serde_json::to_string(&NotificationKind::Conversation).unwrap();
        assert_eq!(json, "\"conversation\"");
    }

    #[test]
    fn identity_display() {
        let id = IdentityContext::new("a@x.com", "1");
        assert_eq!(id.to_string(), "a@x.com/1");
    }

    #[test]
    fn identity_equality() {
        assert_eq!(
            IdentityContext::new("a@x.com", "1"),
            IdentityContext::new("a@x.com", "1")
        );
        assert_ne!(
            IdentityContext::new("a@x.com", "1"),
            IdentityContext::new("a@x.com", "2")
        );
    }

    #[test]
    fn unknown_contact_placeholders() {
        let c = Contact::unknown();
        assert_eq!(c.name, UNKNOWN_CONTACT_NAME);
        assert_eq!(c.contact_type, UNKNOWN_CONTACT_TYPE);
    }

    proptest::proptest! {
        /// Duplicate detection is symmetric and driven only by the gap
        /// between timestamps.
        #[test]
        fn duplicate_window_symmetry_holds(a in 0i64..20_000, b in 0i64..20_000, window in 0i64..10_000) {
            let first = notification("t1", "hi", NotificationKind::Message, a);
            let second = notification("t1", "hi", NotificationKind::Message, b);
            let expected = (a - b).abs() * 1000 <= window;
            proptest::prop_assert_eq!(first.is_duplicate_of(&second, window), expected);
            proptest::prop_assert_eq!(second.is_duplicate_of(&first, window), expected);
        }

        #[test]
        fn different_threads_never_duplicate(a in 0i64..100, b in 0i64..100) {
            let first = notification("t1", "hi", NotificationKind::Message, a);
            let second = notification("t2", "hi", NotificationKind::Message, b);
            proptest::prop_assert!(!first.is_duplicate_of(&second, i64::MAX));
        }
    }
}
