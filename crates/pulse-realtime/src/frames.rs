//! Inbound frame schema and tolerant decoding.
//!
//! The push server sends one JSON object per text frame. Routing is by
//! `type` first (`welcome`, `error`), then by `event` (`new_message`,
//! `new_conversation`). Anything unrecognized — including recognized
//! events with malformed payloads — decodes to [`InboundEvent::Unknown`]
//! and never mutates state.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use pulse_core::{Conversation, Message, ThreadId};

/// Raw wire shape of an inbound frame. Every field is optional so a partial
/// frame still deserializes; classification decides what to do with it.
#[derive(Debug, Default, Deserialize)]
pub struct RawFrame {
    /// Frame type: `welcome`, `error`, or a push carrier.
    #[serde(rename = "type")]
    pub frame_type: Option<String>,
    /// Push event name.
    pub event: Option<String>,
    /// Human-readable server message (error frames).
    pub message: Option<String>,
    /// Server error code (error frames).
    pub code: Option<u16>,
    /// Server-assigned connection id (welcome frames).
    pub connection_id: Option<String>,
    /// Server timestamp.
    pub timestamp: Option<String>,
    /// Event payload.
    pub data: Option<FrameData>,
}

/// Payload of a push event.
#[derive(Debug, Default, Deserialize)]
pub struct FrameData {
    /// Thread the event belongs to.
    pub thread_id: Option<String>,
    /// Embedded message (`new_message`).
    pub message: Option<FrameMessage>,
    /// Contact channel (`new_conversation`).
    pub contact_type: Option<String>,
    /// Contact display name (`new_conversation`).
    pub show_name: Option<String>,
    /// Contact id (`new_conversation`).
    pub contact_id: Option<String>,
    /// Thread registration timestamp (`new_conversation`).
    pub thread_registered: Option<String>,
}

/// Embedded message payload.
#[derive(Debug, Default, Deserialize)]
pub struct FrameMessage {
    /// Body text.
    pub content: Option<String>,
    /// True when authored by the operator side.
    #[serde(default)]
    pub is_bot: bool,
    /// Optional attachment URLs.
    pub photo_url: Option<String>,
    /// Optional call-to-action URL.
    pub action_url: Option<String>,
    /// Optional document URL.
    pub document_url: Option<String>,
    /// When the message was registered, RFC 3339.
    pub date_registered: Option<String>,
}

/// A classified inbound event.
#[derive(Debug)]
pub enum InboundEvent {
    /// Connection acknowledged by the server.
    Welcome {
        /// Server-assigned connection id.
        connection_id: Option<String>,
    },
    /// Server-reported error. Codes 401/403 are terminal.
    ServerError {
        /// Error code, when present.
        code: Option<u16>,
        /// Server message, when present.
        message: Option<String>,
    },
    /// A message arrived on a thread.
    NewMessage {
        /// Target thread.
        thread_id: ThreadId,
        /// The message itself.
        message: Message,
    },
    /// A new conversation was opened.
    NewConversation {
        /// The freshly built conversation.
        conversation: Conversation,
    },
    /// Unrecognized or malformed; a no-op by contract.
    Unknown,
}

/// Parse a raw text frame.
///
/// # Errors
///
/// Returns the underlying serde error when the text is not valid JSON. The
/// caller logs and drops the frame.
pub fn parse_frame(raw: &str) -> std::result::Result<InboundEvent, serde_json::Error> {
    let frame: RawFrame = serde_json::from_str(raw)?;
    Ok(classify(frame))
}

/// Classify a raw frame into an event.
fn classify(frame: RawFrame) -> InboundEvent {
    match frame.frame_type.as_deref() {
        Some("welcome") => InboundEvent::Welcome {
            connection_id: frame.connection_id,
        },
        Some("error") => InboundEvent::ServerError {
            code: frame.code,
            message: frame.message,
        },
        _ => classify_push(frame),
    }
}

fn classify_push(frame: RawFrame) -> InboundEvent {
    match frame.event.as_deref() {
        Some("new_message") => new_message_event(frame.data),
        Some("new_conversation") => new_conversation_event(frame.data),
        _ => InboundEvent::Unknown,
    }
}

fn new_message_event(data: Option<FrameData>) -> InboundEvent {
    let Some(data) = data else {
        return InboundEvent::Unknown;
    };
    let Some(thread_id) = data.thread_id else {
        return InboundEvent::Unknown;
    };
    let Some(wire) = data.message else {
        return InboundEvent::Unknown;
    };
    let Some(content) = wire.content else {
        return InboundEvent::Unknown;
    };

    let sent_at = parse_timestamp(wire.date_registered.as_deref());
    InboundEvent::NewMessage {
        thread_id: ThreadId::from(thread_id),
        message: Message {
            content,
            is_from_operator: wire.is_bot,
            sent_at,
            photo_url: wire.photo_url,
            action_url: wire.action_url,
            document_url: wire.document_url,
        },
    }
}

fn new_conversation_event(data: Option<FrameData>) -> InboundEvent {
    let Some(data) = data else {
        return InboundEvent::Unknown;
    };
    let Some(thread_id) = data.thread_id else {
        return InboundEvent::Unknown;
    };

    let created_at = parse_timestamp(data.thread_registered.as_deref());
    InboundEvent::NewConversation {
        conversation: Conversation {
            thread_id: ThreadId::from(thread_id),
            contact_type: data
                .contact_type
                .unwrap_or_else(|| pulse_core::model::UNKNOWN_CONTACT_TYPE.to_string()),
            show_name: data
                .show_name
                .unwrap_or_else(|| pulse_core::model::UNKNOWN_CONTACT_NAME.to_string()),
            profile_image_url: None,
            last_message: None,
            last_activity_at: created_at,
            created_at,
        },
    }
}

/// Parse an RFC 3339 timestamp, falling back to now.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
