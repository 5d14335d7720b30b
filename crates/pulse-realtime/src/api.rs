//! REST client for the inbox backend.
//!
//! Two read paths: the full message history of one thread (used by the
//! dispatcher's debounced refetch) and the conversation list for a business
//! (used to seed the projection on startup). Both are behind traits so the
//! dispatcher can be tested against canned responses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_core::{Conversation, Message, ThreadId};

use crate::errors::ApiError;
use crate::frames::{FrameMessage, parse_timestamp};

/// Fetches the authoritative message history of a thread.
#[async_trait]
pub trait MessagesApi: Send + Sync + 'static {
    /// Return every message of `thread_id`, unordered.
    async fn fetch_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, ApiError>;
}

/// Fetches the conversation list of a business.
#[async_trait]
pub trait ConversationsApi: Send + Sync + 'static {
    /// Return every open conversation, unordered.
    async fn fetch_conversations(&self, business_id: &str) -> Result<Vec<Conversation>, ApiError>;
}

/// Production client over `reqwest`.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    /// Build a client with the given base URL, session token, and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] when the underlying client cannot be built.
    pub fn new(base_url: &str, token: &str, timeout_ms: u64) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    thread_id: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<FrameMessage>,
}

#[derive(Serialize)]
struct ConversationsRequest<'a> {
    business_id: &'a str,
}

#[derive(Deserialize)]
struct ConversationsResponse {
    #[serde(default)]
    conversations: Vec<WireConversation>,
}

/// Wire shape of one conversation in the list response.
#[derive(Deserialize)]
struct WireConversation {
    thread_id: String,
    contact_type: Option<String>,
    show_name: Option<String>,
    profile_image_url: Option<String>,
    last_message: Option<FrameMessage>,
    thread_registered: Option<String>,
    last_activity: Option<String>,
}

impl From<WireConversation> for Conversation {
    fn from(wire: WireConversation) -> Self {
        let created_at = parse_timestamp(wire.thread_registered.as_deref());
        let last_activity_at = wire
            .last_activity
            .as_deref()
            .map_or(created_at, |raw| parse_timestamp(Some(raw)));
        Self {
            thread_id: ThreadId::from(wire.thread_id),
            contact_type: wire
                .contact_type
                .unwrap_or_else(|| pulse_core::model::UNKNOWN_CONTACT_TYPE.to_string()),
            show_name: wire
                .show_name
                .unwrap_or_else(|| pulse_core::model::UNKNOWN_CONTACT_NAME.to_string()),
            profile_image_url: wire.profile_image_url,
            last_message: wire.last_message.and_then(wire_message),
            last_activity_at,
            created_at,
        }
    }
}

/// Convert a wire message, dropping entries without body text.
fn wire_message(wire: FrameMessage) -> Option<Message> {
    let content = wire.content?;
    Some(Message {
        content,
        is_from_operator: wire.is_bot,
        sent_at: parse_timestamp(wire.date_registered.as_deref()),
        photo_url: wire.photo_url,
        action_url: wire.action_url,
        document_url: wire.document_url,
    })
}

#[async_trait]
impl MessagesApi for HttpApi {
    async fn fetch_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, ApiError> {
        let response: MessagesResponse = self
            .post_json(
                "/messages/list",
                &MessagesRequest {
                    thread_id: thread_id.as_str(),
                },
            )
            .await?;
        let messages: Vec<Message> = response.messages.into_iter().filter_map(wire_message).collect();
        debug!(thread_id = thread_id.as_str(), count = messages.len(), "fetched messages");
        Ok(messages)
    }
}

#[async_trait]
impl ConversationsApi for HttpApi {
    async fn fetch_conversations(&self, business_id: &str) -> Result<Vec<Conversation>, ApiError> {
        let response: ConversationsResponse = self
            .post_json("/conversations/list", &ConversationsRequest { business_id })
            .await?;
        let conversations: Vec<Conversation> =
            response.conversations.into_iter().map(Conversation::from).collect();
        debug!(business_id, count = conversations.len(), "fetched conversations");
        Ok(conversations)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn server_with(path_str: &str, body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(path_str))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn fetch_messages_decodes_and_filters() {
        let server = server_with(
            "/messages/list",
            serde_json::json!({
                "messages": [
                    {"content": "hi", "is_bot": false, "date_registered": "2026-08-30T10:00:00Z"},
                    {"content": "reply", "is_bot": true, "date_registered": "2026-08-30T10:05:00Z"},
                    {"photo_url": "https://cdn/only-photo.jpg"}
                ]
            }),
        )
        .await;
        let api = HttpApi::new(&server.uri(), "tok", 5000).unwrap();

        let messages = api.fetch_messages(&ThreadId::from("t-1")).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert!(messages[1].is_from_operator);
    }

    #[tokio::test]
    async fn fetch_messages_sends_the_thread_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/list"))
            .and(body_partial_json(serde_json::json!({"thread_id": "t-9"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"messages": []})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let api = HttpApi::new(&server.uri(), "tok", 5000).unwrap();

        let messages = api.fetch_messages(&ThreadId::from("t-9")).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn fetch_conversations_decodes_placeholders() {
        let server = server_with(
            "/conversations/list",
            serde_json::json!({
                "conversations": [
                    {
                        "thread_id": "t-1",
                        "contact_type": "webchat",
                        "show_name": "Grace",
                        "last_message": {"content": "latest", "is_bot": false},
                        "thread_registered": "2026-08-29T08:00:00Z",
                        "last_activity": "2026-08-30T11:00:00Z"
                    },
                    {"thread_id": "t-2"}
                ]
            }),
        )
        .await;
        let api = HttpApi::new(&server.uri(), "tok", 5000).unwrap();

        let conversations = api.fetch_conversations("biz").await.unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].show_name, "Grace");
        assert!(conversations[0].last_activity_at > conversations[0].created_at);
        assert_eq!(conversations[1].show_name, pulse_core::model::UNKNOWN_CONTACT_NAME);
        assert_eq!(conversations[1].last_message, None);
    }

    #[tokio::test]
    async fn non_success_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/list"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let api = HttpApi::new(&server.uri(), "tok", 5000).unwrap();

        let err = api.fetch_messages(&ThreadId::from("t-1")).await.unwrap_err();
        assert_matches!(err, ApiError::Status(503));
    }
}
