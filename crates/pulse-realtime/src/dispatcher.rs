//! Event dispatcher: routes classified frames into projection, ledger,
//! and alert, and schedules the debounced authoritative refetch.
//!
//! The dispatcher is the supervisor's [`FrameSink`]. It applies pushes
//! optimistically (append to the projection, notify, chime) and then, after
//! a quiet period, refetches the thread's history from the REST API and
//! reconciles it with the optimistic state. A burst of messages on one
//! thread coalesces into a single refetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use pulse_core::{
    Contact, Conversation, ConversationPatch, Message, Notification, NotificationId,
    NotificationKind, ThreadId,
};
use pulse_store::{ConversationProjection, NotificationLedger};

use crate::alert::AlertSink;
use crate::api::MessagesApi;
use crate::frames::{InboundEvent, parse_frame};
use crate::supervisor::{FrameDisposition, FrameSink};

/// Body text used for conversation-opened notifications.
const NEW_CONVERSATION_BODY: &str = "New conversation";

/// Dispatcher tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Quiet period before the authoritative refetch, in milliseconds.
    pub refetch_debounce_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            refetch_debounce_ms: 1000,
        }
    }
}

/// Routes inbound events into local state.
pub struct EventDispatcher {
    projection: Arc<ConversationProjection>,
    ledger: Arc<NotificationLedger>,
    messages_api: Arc<dyn MessagesApi>,
    alerts: Arc<dyn AlertSink>,
    config: DispatcherConfig,
    /// Thread the operator currently has open, if any.
    focused: Mutex<Option<ThreadId>>,
    /// Debounce epoch per thread; a newer epoch supersedes pending timers.
    refetch_epoch: Arc<Mutex<HashMap<ThreadId, u64>>>,
}

impl EventDispatcher {
    /// Wire a dispatcher to its collaborators.
    pub fn new(
        projection: Arc<ConversationProjection>,
        ledger: Arc<NotificationLedger>,
        messages_api: Arc<dyn MessagesApi>,
        alerts: Arc<dyn AlertSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            projection,
            ledger,
            messages_api,
            alerts,
            config,
            focused: Mutex::new(None),
            refetch_epoch: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record which thread the operator is viewing.
    ///
    /// Focusing a thread clears its unread counter and suppresses
    /// notifications for it while it stays focused.
    pub fn set_focused(&self, thread_id: Option<ThreadId>) {
        if let Some(thread_id) = &thread_id {
            self.ledger.mark_thread_read(thread_id);
        }
        *self.focused.lock() = thread_id;
    }

    /// The operator navigated away from any thread.
    pub fn clear_focused(&self) {
        self.set_focused(None);
    }

    fn is_focused(&self, thread_id: &ThreadId) -> bool {
        self.focused.lock().as_ref() == Some(thread_id)
    }

    fn handle_new_message(&self, thread_id: ThreadId, message: Message) {
        let contact = self
            .projection
            .resolve_contact(&thread_id)
            .unwrap_or_else(Contact::unknown);

        self.projection.append_message(&thread_id, message.clone());
        let patched = self.projection.update(
            &thread_id,
            ConversationPatch {
                last_message: Some(message.clone()),
                last_activity_at: Some(message.sent_at),
                ..ConversationPatch::default()
            },
        );
        if !patched {
            // First sign of life on an unknown thread: materialize it.
            self.projection.add_or_update(Conversation {
                thread_id: thread_id.clone(),
                contact_type: contact.contact_type.clone(),
                show_name: contact.name.clone(),
                profile_image_url: None,
                last_message: Some(message.clone()),
                last_activity_at: message.sent_at,
                created_at: message.sent_at,
            });
        }

        self.schedule_refetch(thread_id.clone());

        if self.is_focused(&thread_id) {
            // The operator is looking right at it.
            self.ledger.mark_thread_read(&thread_id);
            return;
        }

        let appended = self.ledger.append(Notification {
            id: NotificationId::new(),
            title: contact.name.clone(),
            message: message.content,
            thread_id: thread_id.clone(),
            contact_name: contact.name,
            contact_type: contact.contact_type,
            timestamp: message.sent_at,
            kind: NotificationKind::Message,
            is_read: false,
        });
        if appended {
            self.ledger.increment_unread(&thread_id);
            self.alerts.trigger();
        } else {
            debug!(thread_id = thread_id.as_str(), "redelivered message suppressed");
        }
    }

    fn handle_new_conversation(&self, conversation: Conversation) {
        let thread_id = conversation.thread_id.clone();
        let title = conversation.show_name.clone();
        let contact_type = conversation.contact_type.clone();
        let timestamp = conversation.created_at;
        self.projection.add_or_update(conversation);

        let appended = self.ledger.append(Notification {
            id: NotificationId::new(),
            title: title.clone(),
            message: NEW_CONVERSATION_BODY.to_string(),
            thread_id: thread_id.clone(),
            contact_name: title,
            contact_type,
            timestamp,
            kind: NotificationKind::Conversation,
            is_read: false,
        });
        if appended {
            self.alerts.trigger();
        } else {
            debug!(thread_id = thread_id.as_str(), "redelivered conversation suppressed");
        }
    }

    /// Debounced refetch: waits out the quiet period, then reconciles the
    /// thread with the server's authoritative history.
    fn schedule_refetch(&self, thread_id: ThreadId) {
        let epoch = {
            let mut epochs = self.refetch_epoch.lock();
            let slot = epochs.entry(thread_id.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let debounce = Duration::from_millis(self.config.refetch_debounce_ms);
        let epochs = Arc::clone(&self.refetch_epoch);
        let projection = Arc::clone(&self.projection);
        let messages_api = Arc::clone(&self.messages_api);
        drop(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if epochs.lock().get(&thread_id) != Some(&epoch) {
                // A later message restarted the quiet period.
                return;
            }
            let issued_at = Utc::now();
            match messages_api.fetch_messages(&thread_id).await {
                Ok(snapshot) => {
                    projection.merge_authoritative(&thread_id, issued_at, snapshot);
                    debug!(thread_id = thread_id.as_str(), "thread reconciled");
                }
                Err(e) => {
                    // Optimistic state stands until the next refetch.
                    warn!(thread_id = thread_id.as_str(), error = %e, "refetch failed");
                }
            }
        }));
    }
}

impl FrameSink for EventDispatcher {
    fn on_frame(&self, raw: &str) -> FrameDisposition {
        let event = match parse_frame(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "undecodable frame dropped");
                return FrameDisposition::Handled;
            }
        };
        match event {
            InboundEvent::Welcome { connection_id } => {
                info!(connection_id = connection_id.as_deref(), "server welcome");
            }
            InboundEvent::ServerError { code, message } => {
                if let Some(code @ (401 | 403)) = code {
                    return FrameDisposition::AuthFailure { code };
                }
                warn!(code, message = message.as_deref(), "server-reported error");
            }
            InboundEvent::NewMessage { thread_id, message } => {
                self.handle_new_message(thread_id, message);
            }
            InboundEvent::NewConversation { conversation } => {
                self.handle_new_conversation(conversation);
            }
            InboundEvent::Unknown => {
                debug!("unrecognized frame ignored");
            }
        }
        FrameDisposition::Handled
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use pulse_core::IdentityContext;
    use pulse_store::{IdentityStore, LedgerConfig};

    use crate::errors::ApiError;

    use super::*;

    struct FakeMessagesApi {
        snapshot: Mutex<Vec<Message>>,
        fetches: AtomicUsize,
    }

    impl FakeMessagesApi {
        fn new(snapshot: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(snapshot),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MessagesApi for FakeMessagesApi {
        async fn fetch_messages(&self, _thread_id: &ThreadId) -> Result<Vec<Message>, ApiError> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.lock().clone())
        }
    }

    #[derive(Default)]
    struct CountingAlert {
        triggers: AtomicUsize,
    }

    impl AlertSink for CountingAlert {
        fn trigger(&self) {
            let _ = self.triggers.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        dispatcher: EventDispatcher,
        projection: Arc<ConversationProjection>,
        ledger: Arc<NotificationLedger>,
        api: Arc<FakeMessagesApi>,
        alerts: Arc<CountingAlert>,
    }

    fn fixture_with(snapshot: Vec<Message>) -> Fixture {
        let store = Arc::new(IdentityStore::open_in_memory().unwrap());
        let identity = IdentityContext {
            user_key: "u1".to_string(),
            business_key: "b1".to_string(),
        };
        let projection = Arc::new(ConversationProjection::new(
            Arc::clone(&store),
            identity.clone(),
        ));
        let ledger = Arc::new(NotificationLedger::new(
            store,
            identity,
            LedgerConfig::default(),
        ));
        let api = FakeMessagesApi::new(snapshot);
        let alerts = Arc::new(CountingAlert::default());
        let dispatcher = EventDispatcher::new(
            Arc::clone(&projection),
            Arc::clone(&ledger),
            Arc::clone(&api) as _,
            Arc::clone(&alerts) as _,
            DispatcherConfig::default(),
        );
        Fixture {
            dispatcher,
            projection,
            ledger,
            api,
            alerts,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Vec::new())
    }

    fn message_frame(thread: &str, content: &str, sent_at: &str) -> String {
        format!(
            r#"{{"event":"new_message","data":{{"thread_id":"{thread}","message":{{"content":"{content}","is_bot":false,"date_registered":"{sent_at}"}}}}}}"#
        )
    }

    const T0: &str = "2026-08-30T12:00:00Z";

    #[tokio::test(start_paused = true)]
    async fn message_on_unfocused_thread_notifies_and_chimes() {
        let fx = fixture();
        let disposition = fx.dispatcher.on_frame(&message_frame("t-1", "hello", T0));
        assert_eq!(disposition, FrameDisposition::Handled);

        let thread = ThreadId::from("t-1");
        assert_eq!(fx.projection.messages(&thread).len(), 1);
        let conversation = fx.projection.get(&thread).unwrap();
        assert_eq!(conversation.last_message.unwrap().content, "hello");

        assert_eq!(fx.ledger.entries().len(), 1);
        assert_eq!(fx.ledger.unread_for(&thread), 1);
        assert_eq!(fx.alerts.triggers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_after_reconnect_is_suppressed() {
        let fx = fixture();
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "m1", T0));
        let _ = fx.dispatcher.on_frame(&message_frame("t-2", "m2", T0));
        // Reconnect replay of the first message.
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "m1", T0));

        assert_eq!(fx.ledger.entries().len(), 2);
        assert_eq!(fx.ledger.unread_for(&ThreadId::from("t-1")), 1);
        assert_eq!(fx.ledger.unread_for(&ThreadId::from("t-2")), 1);
        assert_eq!(fx.ledger.total_unread(), 2);
        assert_eq!(fx.alerts.triggers.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn focused_thread_stays_read_and_silent() {
        let fx = fixture();
        let thread = ThreadId::from("t-1");
        fx.dispatcher.set_focused(Some(thread.clone()));
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "hello", T0));

        assert!(fx.ledger.entries().is_empty());
        assert_eq!(fx.ledger.unread_for(&thread), 0);
        assert_eq!(fx.alerts.triggers.load(Ordering::SeqCst), 0);
        // The projection still advances.
        assert_eq!(fx.projection.messages(&thread).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn focusing_clears_unread() {
        let fx = fixture();
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "m1", T0));
        let thread = ThreadId::from("t-1");
        assert_eq!(fx.ledger.unread_for(&thread), 1);

        fx.dispatcher.set_focused(Some(thread.clone()));
        assert_eq!(fx.ledger.unread_for(&thread), 0);

        // Unfocusing makes the thread notify again.
        fx.dispatcher.clear_focused();
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "m2", "2026-08-30T12:01:00Z"));
        assert_eq!(fx.ledger.unread_for(&thread), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_refetch() {
        let fx = fixture();
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "a", "2026-08-30T12:00:00Z"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "b", "2026-08-30T12:00:01Z"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "c", "2026-08-30T12:00:02Z"));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(fx.api.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_reconciles_with_the_snapshot() {
        let authoritative = vec![
            Message::text("a", false, parse_ts("2026-08-30T12:00:00Z")),
            Message::text("server-only", true, parse_ts("2026-08-30T12:00:01Z")),
        ];
        let fx = fixture_with(authoritative);
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "a", "2026-08-30T12:00:00Z"));
        // Optimistic append the snapshot does not know about yet.
        let future = (Utc::now() + chrono::Duration::hours(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "just-sent", &future));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fx.api.fetches.load(Ordering::SeqCst), 1);

        let contents: Vec<String> = fx
            .projection
            .messages(&ThreadId::from("t-1"))
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["a", "server-only", "just-sent"]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_conversation_notifies_without_unread() {
        let fx = fixture();
        let raw = r#"{"event":"new_conversation","data":{"thread_id":"t-9","contact_type":"webchat","show_name":"Grace","thread_registered":"2026-08-30T09:00:00Z"}}"#;
        let _ = fx.dispatcher.on_frame(raw);

        let thread = ThreadId::from("t-9");
        assert!(fx.projection.get(&thread).is_some());
        let entries = fx.ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, NotificationKind::Conversation);
        assert_eq!(fx.ledger.unread_for(&thread), 0);
        assert_eq!(fx.alerts.triggers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn known_contact_name_is_used_in_the_notification() {
        let fx = fixture();
        let _ = fx.dispatcher.on_frame(
            r#"{"event":"new_conversation","data":{"thread_id":"t-1","contact_type":"webchat","show_name":"Grace"}}"#,
        );
        let _ = fx.dispatcher.on_frame(&message_frame("t-1", "hi", T0));

        let entries = fx.ledger.entries();
        let message_entry = entries
            .iter()
            .find(|n| n.kind == NotificationKind::Message)
            .unwrap();
        assert_eq!(message_entry.contact_name, "Grace");
    }

    #[tokio::test(start_paused = true)]
    async fn message_on_unknown_thread_materializes_a_conversation() {
        let fx = fixture();
        let _ = fx.dispatcher.on_frame(&message_frame("t-new", "first", T0));

        let conversation = fx.projection.get(&ThreadId::from("t-new")).unwrap();
        assert_eq!(conversation.show_name, pulse_core::model::UNKNOWN_CONTACT_NAME);
        assert_eq!(conversation.last_message.unwrap().content, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_are_terminal_others_are_not() {
        let fx = fixture();
        assert_eq!(
            fx.dispatcher.on_frame(r#"{"type":"error","code":401,"message":"expired"}"#),
            FrameDisposition::AuthFailure { code: 401 }
        );
        assert_eq!(
            fx.dispatcher.on_frame(r#"{"type":"error","code":403,"message":"forbidden"}"#),
            FrameDisposition::AuthFailure { code: 403 }
        );
        assert_eq!(
            fx.dispatcher.on_frame(r#"{"type":"error","code":500,"message":"oops"}"#),
            FrameDisposition::Handled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_frames_change_nothing() {
        let fx = fixture();
        assert_eq!(fx.dispatcher.on_frame("{not json"), FrameDisposition::Handled);
        assert_eq!(fx.dispatcher.on_frame(r#"{"event":"typing"}"#), FrameDisposition::Handled);

        assert!(fx.projection.list().is_empty());
        assert!(fx.ledger.entries().is_empty());
        assert_eq!(fx.alerts.triggers.load(Ordering::SeqCst), 0);
    }

    fn parse_ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }
}
