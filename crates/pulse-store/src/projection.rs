//! Conversation projection: the ordered, deduplicated conversation list.
//!
//! A derived read model built from the inbound event stream. The invariant
//! that matters is the ordering rule: a conversation only moves to the head
//! of the list when its incoming `last_activity_at` is strictly newer than
//! the stored one, so duplicate or out-of-order events never reshuffle the
//! list. The projection also owns the per-thread message log, including the
//! union-by-timestamp reconciliation between optimistic socket appends and
//! authoritative REST snapshots.
//!
//! All mutations write through to the [`IdentityStore`] best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use pulse_core::model::ConversationPatch;
use pulse_core::{Contact, Conversation, IdentityContext, Message, ThreadId};

use crate::kv::IdentityStore;

const CONVERSATIONS_SNAPSHOT: &str = "conversations";
const MESSAGES_SNAPSHOT: &str = "messages";

struct ProjectionState {
    identity: IdentityContext,
    /// Head-first ordered conversation list.
    conversations: Vec<Conversation>,
    /// Append-only message log per thread, ordered by `sent_at`.
    messages: HashMap<ThreadId, Vec<Message>>,
}

/// Ordered, deduplicated conversation list plus the per-thread message log.
pub struct ConversationProjection {
    store: Arc<IdentityStore>,
    state: RwLock<ProjectionState>,
}

impl ConversationProjection {
    /// Create a projection for `identity`, restoring any persisted snapshot.
    pub fn new(store: Arc<IdentityStore>, identity: IdentityContext) -> Self {
        let conversations = store
            .load_best_effort(&identity, CONVERSATIONS_SNAPSHOT)
            .unwrap_or_default();
        let messages = store
            .load_best_effort(&identity, MESSAGES_SNAPSHOT)
            .unwrap_or_default();
        Self {
            store,
            state: RwLock::new(ProjectionState {
                identity,
                conversations,
                messages,
            }),
        }
    }

    /// Replace the conversation list from an authoritative initial load.
    ///
    /// Conversations are ordered newest activity first.
    pub fn seed(&self, mut conversations: Vec<Conversation>) {
        conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        let mut state = self.state.write();
        state.conversations = conversations;
        self.persist_conversations(&state);
    }

    /// Insert a conversation, or shallow-merge into the existing entry.
    ///
    /// Existing entries move to the head only when the incoming
    /// `last_activity_at` is strictly newer; otherwise fields update in
    /// place without reordering. New threads insert at the head.
    pub fn add_or_update(&self, incoming: Conversation) {
        let mut state = self.state.write();
        let position = state
            .conversations
            .iter()
            .position(|c| c.thread_id == incoming.thread_id);

        match position {
            Some(idx) => {
                let newer = incoming.last_activity_at > state.conversations[idx].last_activity_at;
                merge_fields(&mut state.conversations[idx], incoming);
                if newer {
                    let conv = state.conversations.remove(idx);
                    state.conversations.insert(0, conv);
                }
            }
            None => {
                state.conversations.insert(0, incoming);
            }
        }
        self.persist_conversations(&state);
    }

    /// Apply a partial update to an existing conversation.
    ///
    /// Returns `false` when the thread is unknown. The head-move rule is
    /// the same as [`Self::add_or_update`].
    pub fn update(&self, thread_id: &ThreadId, patch: ConversationPatch) -> bool {
        let mut state = self.state.write();
        let Some(idx) = state
            .conversations
            .iter()
            .position(|c| c.thread_id == *thread_id)
        else {
            return false;
        };

        let newer = patch
            .last_activity_at
            .is_some_and(|t| t > state.conversations[idx].last_activity_at);

        let conv = &mut state.conversations[idx];
        if let Some(v) = patch.contact_type {
            conv.contact_type = v;
        }
        if let Some(v) = patch.show_name {
            conv.show_name = v;
        }
        if let Some(v) = patch.profile_image_url {
            conv.profile_image_url = Some(v);
        }
        if let Some(v) = patch.last_message {
            conv.last_message = Some(v);
        }
        if let Some(v) = patch.last_activity_at {
            conv.last_activity_at = v;
        }

        if newer {
            let conv = state.conversations.remove(idx);
            state.conversations.insert(0, conv);
        }
        self.persist_conversations(&state);
        true
    }

    /// The ordered conversation list (head = most recent activity).
    pub fn list(&self) -> Vec<Conversation> {
        self.state.read().conversations.clone()
    }

    /// Look up one conversation.
    pub fn get(&self, thread_id: &ThreadId) -> Option<Conversation> {
        self.state
            .read()
            .conversations
            .iter()
            .find(|c| c.thread_id == *thread_id)
            .cloned()
    }

    /// Narrow contact-resolution port for the dispatcher.
    pub fn resolve_contact(&self, thread_id: &ThreadId) -> Option<Contact> {
        self.state
            .read()
            .conversations
            .iter()
            .find(|c| c.thread_id == *thread_id)
            .map(|c| Contact {
                name: c.show_name.clone(),
                contact_type: c.contact_type.clone(),
            })
    }

    /// Optimistically append a live message to a thread's log.
    pub fn append_message(&self, thread_id: &ThreadId, message: Message) {
        let mut state = self.state.write();
        let log = state.messages.entry(thread_id.clone()).or_default();
        log.push(message);
        log.sort_by_key(|m| m.sent_at);
        self.persist_messages(&state);
    }

    /// The message log for a thread, ordered by `sent_at`.
    pub fn messages(&self, thread_id: &ThreadId) -> Vec<Message> {
        self.state
            .read()
            .messages
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Reconcile an authoritative refetch with optimistic appends.
    ///
    /// The snapshot wins for everything at or before `issued_at` (the
    /// instant the refetch was requested); locally appended messages with a
    /// later `sent_at` survive the merge. Union, never a blind overwrite.
    pub fn merge_authoritative(
        &self,
        thread_id: &ThreadId,
        issued_at: DateTime<Utc>,
        snapshot: Vec<Message>,
    ) {
        let mut state = self.state.write();
        let local = state.messages.remove(thread_id).unwrap_or_default();

        let mut merged = snapshot;
        for message in local {
            if message.sent_at > issued_at
                && !merged
                    .iter()
                    .any(|m| m.sent_at == message.sent_at && m.content == message.content)
            {
                merged.push(message);
            }
        }
        merged.sort_by_key(|m| m.sent_at);

        let _ = state.messages.insert(thread_id.clone(), merged);
        self.persist_messages(&state);
    }

    /// Switch to a different identity partition.
    ///
    /// Flushes the current partition before loading (or initializing) the
    /// new one.
    pub fn set_context(&self, identity: IdentityContext) {
        let mut state = self.state.write();
        if state.identity == identity {
            return;
        }
        self.persist_conversations(&state);
        self.persist_messages(&state);

        state.conversations = self
            .store
            .load_best_effort(&identity, CONVERSATIONS_SNAPSHOT)
            .unwrap_or_default();
        state.messages = self
            .store
            .load_best_effort(&identity, MESSAGES_SNAPSHOT)
            .unwrap_or_default();
        state.identity = identity;
    }

    fn persist_conversations(&self, state: &ProjectionState) {
        self.store
            .save_best_effort(&state.identity, CONVERSATIONS_SNAPSHOT, &state.conversations);
    }

    fn persist_messages(&self, state: &ProjectionState) {
        self.store
            .save_best_effort(&state.identity, MESSAGES_SNAPSHOT, &state.messages);
    }
}

/// Shallow merge of a full incoming conversation into the stored one.
///
/// `Option` fields keep the stored value when the incoming one is absent.
fn merge_fields(stored: &mut Conversation, incoming: Conversation) {
    stored.contact_type = incoming.contact_type;
    stored.show_name = incoming.show_name;
    if incoming.profile_image_url.is_some() {
        stored.profile_image_url = incoming.profile_image_url;
    }
    if incoming.last_message.is_some() {
        stored.last_message = incoming.last_message;
    }
    if incoming.last_activity_at > stored.last_activity_at {
        stored.last_activity_at = incoming.last_activity_at;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
