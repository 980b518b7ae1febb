//! Conversation session state.
//!
//! [`ChatStore`] is the single source of truth consumed by the UI: the
//! conversation list, per-conversation message lists, loading flags, typing
//! indicators, the online set and pending sends. Every mutation goes through
//! one of the reducer methods below.

use crate::presence::OnlineUsers;
use crate::state::SessionStore;
use crate::typing::{TypingDebounce, TypingIndicators, DEFAULT_TYPING_TIMEOUT};
use courier_protocol::{Conversation, ConversationId, Message, RequestId, UserId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A `send-message` waiting for its `message-sent` confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub conversation_id: ConversationId,
    pub text: String,
    pub queued_at: Instant,
}

/// Result of adding a message to a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The message was new and appended.
    Appended,
    /// A message with the same id existed and was replaced in place.
    Replaced,
}

/// Conversation session state.
#[derive(Debug)]
pub struct ChatStore {
    user_id: UserId,
    typing_timeout: Duration,
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    has_more: HashMap<ConversationId, bool>,
    active_conversation: Option<ConversationId>,
    loading_conversations: bool,
    loading_messages: bool,
    typing: TypingIndicators,
    outgoing_typing: TypingDebounce,
    online: OnlineUsers,
    pending_sends: HashMap<RequestId, PendingSend>,
    /// Unread peer messages of conversations missing from the list.
    unlisted_unread: HashMap<ConversationId, u32>,
    /// A message arrived for a conversation missing from the list.
    conversations_stale: bool,
    error: Option<String>,
}

impl ChatStore {
    /// Create an empty store for the authenticated user.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self::with_typing_timeout(user_id, DEFAULT_TYPING_TIMEOUT)
    }

    /// Create an empty store with a custom typing timeout.
    #[must_use]
    pub fn with_typing_timeout(user_id: UserId, timeout: Duration) -> Self {
        Self {
            user_id,
            typing_timeout: timeout,
            conversations: Vec::new(),
            messages: HashMap::new(),
            has_more: HashMap::new(),
            active_conversation: None,
            loading_conversations: false,
            loading_messages: false,
            typing: TypingIndicators::new(timeout),
            outgoing_typing: TypingDebounce::new(timeout),
            online: OnlineUsers::new(),
            pending_sends: HashMap::new(),
            unlisted_unread: HashMap::new(),
            conversations_stale: false,
            error: None,
        }
    }

    /// Get the authenticated user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    #[must_use]
    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Get the messages of a conversation in arrival order.
    #[must_use]
    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.messages
            .get(&conversation_id)
            .map_or(&[][..], Vec::as_slice)
    }

    /// Whether older history can still be loaded.
    #[must_use]
    pub fn has_more_messages(&self, conversation_id: ConversationId) -> bool {
        self.has_more.get(&conversation_id).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active_conversation
    }

    #[must_use]
    pub fn is_loading_conversations(&self) -> bool {
        self.loading_conversations
    }

    #[must_use]
    pub fn is_loading_messages(&self) -> bool {
        self.loading_messages
    }

    #[must_use]
    pub fn online(&self) -> &OnlineUsers {
        &self.online
    }

    #[must_use]
    pub fn typing(&self) -> &TypingIndicators {
        &self.typing
    }

    /// Get the peers typing in a conversation.
    #[must_use]
    pub fn typing_in(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.typing.in_conversation(conversation_id)
    }

    #[must_use]
    pub fn pending_sends(&self) -> &HashMap<RequestId, PendingSend> {
        &self.pending_sends
    }

    /// Get the unread count summed over all conversations, including those
    /// not listed yet.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        let listed: u32 = self.conversations.iter().map(|c| c.unread_count).sum();
        listed + self.unlisted_unread.values().sum::<u32>()
    }

    /// Get the unread count of a conversation, listed or not.
    #[must_use]
    pub fn unread_in(&self, conversation_id: ConversationId) -> u32 {
        self.conversation(conversation_id).map_or_else(
            || {
                self.unlisted_unread
                    .get(&conversation_id)
                    .copied()
                    .unwrap_or(0)
            },
            |c| c.unread_count,
        )
    }

    /// Whether the conversation list should be requested again.
    ///
    /// Set when a message arrives for a conversation missing from the list
    /// and no list request is in flight. Taking it marks the list as
    /// loading.
    pub fn take_conversation_refresh(&mut self) -> bool {
        if !std::mem::take(&mut self.conversations_stale) || self.loading_conversations {
            return false;
        }
        self.loading_conversations = true;
        true
    }

    pub fn begin_loading_conversations(&mut self) {
        self.loading_conversations = true;
    }

    pub fn begin_loading_messages(&mut self) {
        self.loading_messages = true;
    }

    /// Replace the conversation list.
    pub fn set_conversations(&mut self, mut conversations: Vec<Conversation>) {
        debug!(count = conversations.len(), "Conversations loaded");
        for conversation in &mut conversations {
            self.apply_unlisted_unread(conversation);
        }
        self.conversations = conversations;
        self.loading_conversations = false;
    }

    /// Insert a conversation or refresh an existing one.
    ///
    /// New conversations go to the top of the list. The local unread
    /// counter of an existing conversation is kept.
    pub fn upsert_conversation(&mut self, mut conversation: Conversation) {
        if let Some(existing) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            conversation.unread_count = existing.unread_count;
            *existing = conversation;
        } else {
            self.apply_unlisted_unread(&mut conversation);
            self.conversations.insert(0, conversation);
        }
    }

    /// Set the active conversation. At most one is active at a time.
    pub fn set_active(&mut self, conversation_id: Option<ConversationId>) {
        self.active_conversation = conversation_id;
    }

    /// Add a message to its conversation.
    ///
    /// Messages are kept in arrival order. A message whose id is already
    /// present replaces the stored copy in place.
    pub fn add_message(&mut self, message: Message) -> AddOutcome {
        self.touch_last_message(&message);

        let list = self.messages.entry(message.conversation_id).or_default();
        if let Some(existing) = list.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            AddOutcome::Replaced
        } else {
            list.push(message);
            AddOutcome::Appended
        }
    }

    /// Add a message pushed by the server.
    ///
    /// Bumps the unread counter when the sender is the peer and the
    /// conversation is not the active one. A message for a conversation
    /// missing from the list, such as the first message of a new thread,
    /// has its unread count held until the conversation is listed and marks
    /// the list for a refresh.
    pub fn receive_message(&mut self, message: Message) -> AddOutcome {
        let conversation_id = message.conversation_id;
        let from_peer = message.sender_id != self.user_id;
        let outcome = self.add_message(message);
        let counts = outcome == AddOutcome::Appended
            && from_peer
            && self.active_conversation != Some(conversation_id);

        match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            Some(conv) => {
                if counts {
                    conv.unread_count += 1;
                }
            }
            None => {
                debug!(conversation = conversation_id, "Message for unlisted conversation");
                if counts {
                    *self.unlisted_unread.entry(conversation_id).or_default() += 1;
                }
                self.conversations_stale = true;
            }
        }

        outcome
    }

    /// Track a message sent with a client-generated request id.
    pub fn begin_send(
        &mut self,
        request_id: RequestId,
        conversation_id: ConversationId,
        text: impl Into<String>,
        now: Instant,
    ) {
        self.pending_sends.insert(
            request_id,
            PendingSend {
                conversation_id,
                text: text.into(),
                queued_at: now,
            },
        );
    }

    /// Apply a `message-sent` confirmation.
    ///
    /// Returns the pending send it resolved, if the request id matched.
    pub fn confirm_sent(
        &mut self,
        message: Message,
        request_id: Option<RequestId>,
    ) -> Option<PendingSend> {
        let pending = request_id.and_then(|id| self.pending_sends.remove(&id));
        if request_id.is_some() && pending.is_none() {
            warn!(message = message.id, "Confirmation for unknown send request");
        }
        self.add_message(message);
        pending
    }

    /// Apply a page of history.
    ///
    /// The first page (`offset == 0`) replaces the list; later pages are
    /// older messages and go in front of it. Ids already present are skipped.
    pub fn set_messages(
        &mut self,
        conversation_id: ConversationId,
        messages: Vec<Message>,
        offset: u32,
        has_more: bool,
    ) {
        self.loading_messages = false;
        self.has_more.insert(conversation_id, has_more);

        if offset == 0 {
            let mut page: Vec<Message> = Vec::with_capacity(messages.len());
            for message in messages {
                if !page.iter().any(|m| m.id == message.id) {
                    page.push(message);
                }
            }
            if let Some(last) = page.last() {
                self.touch_last_message(last);
            }
            self.messages.insert(conversation_id, page);
            return;
        }

        let list = self.messages.entry(conversation_id).or_default();
        let mut older: Vec<Message> = Vec::with_capacity(messages.len());
        for message in messages {
            let known = |m: &Message| m.id == message.id;
            if !list.iter().any(known) && !older.iter().any(known) {
                older.push(message);
            }
        }
        older.append(list);
        *list = older;
    }

    /// Apply a read receipt: every message not sent by `reader` is now read.
    ///
    /// When the reader is the local user, the unread counter is reset.
    /// Returns the number of messages whose flag changed.
    pub fn mark_read(&mut self, conversation_id: ConversationId, reader: UserId) -> usize {
        let mut changed = 0;
        if let Some(list) = self.messages.get_mut(&conversation_id) {
            for message in list.iter_mut().filter(|m| m.sender_id != reader && !m.is_read) {
                message.is_read = true;
                changed += 1;
            }
        }

        if reader == self.user_id {
            self.unlisted_unread.remove(&conversation_id);
            if let Some(conv) = self
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
            {
                conv.unread_count = 0;
            }
        }

        changed
    }

    /// Apply a peer typing event.
    pub fn set_typing(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
        now: Instant,
    ) {
        if user_id == self.user_id {
            return;
        }
        self.typing.set(conversation_id, user_id, is_typing, now);
    }

    /// Drop expired peer typing indicators.
    pub fn expire_typing(&mut self, now: Instant) -> usize {
        self.typing.expire(now)
    }

    /// Register a local keystroke; returns the typing updates to broadcast.
    pub fn keystroke(
        &mut self,
        conversation_id: ConversationId,
        now: Instant,
    ) -> Vec<(ConversationId, bool)> {
        self.outgoing_typing.keystroke(conversation_id, now)
    }

    /// Stop local typing; returns the conversation to announce `false` for.
    pub fn stop_typing(&mut self) -> Option<ConversationId> {
        self.outgoing_typing.stop()
    }

    /// Stop local typing if idle for the timeout.
    pub fn expire_outgoing_typing(&mut self, now: Instant) -> Option<ConversationId> {
        self.outgoing_typing.expire(now)
    }

    pub fn user_online(&mut self, user_id: UserId) -> bool {
        self.online.join(user_id)
    }

    pub fn user_offline(&mut self, user_id: UserId) -> bool {
        self.typing.clear_user(user_id);
        self.online.leave(user_id).is_some()
    }

    pub fn set_online_users(&mut self, user_ids: &[UserId]) {
        self.online.replace(user_ids);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn apply_unlisted_unread(&mut self, conversation: &mut Conversation) {
        if let Some(unread) = self.unlisted_unread.remove(&conversation.id) {
            conversation.unread_count = conversation.unread_count.max(unread);
        }
    }

    fn touch_last_message(&mut self, message: &Message) {
        let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            return;
        };

        let newer = conv
            .last_message_time
            .map_or(true, |time| message.created_at >= time);
        if newer {
            conv.last_message_text = Some(message.message.clone());
            conv.last_message_time = Some(message.created_at);
        }
    }
}

impl SessionStore for ChatStore {
    fn record_error(&mut self, message: String) {
        self.error = Some(message);
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn clear_transient(&mut self) {
        self.loading_conversations = false;
        self.loading_messages = false;
        self.typing.clear();
        self.outgoing_typing.reset();
        self.online.clear();
        self.pending_sends.clear();
    }

    fn clear(&mut self) {
        *self = Self::with_typing_timeout(self.user_id, self.typing_timeout);
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.outgoing_typing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    const ME: UserId = 1;
    const PEER: UserId = 2;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
    }

    fn conversation(id: ConversationId) -> Conversation {
        Conversation {
            id,
            user1_id: ME,
            user2_id: PEER,
            user1: None,
            user2: None,
            last_message_text: None,
            last_message_time: None,
            unread_count: 0,
        }
    }

    fn message(id: i64, sender: UserId, text: &str) -> Message {
        Message {
            id,
            conversation_id: 42,
            sender_id: sender,
            message: text.to_string(),
            created_at: at(id),
            is_read: false,
        }
    }

    fn store() -> ChatStore {
        let mut store = ChatStore::new(ME);
        store.set_conversations(vec![conversation(42), conversation(43)]);
        store
    }

    #[test]
    fn test_add_message_preserves_call_order() {
        let mut store = store();
        for (id, sender) in [(5, PEER), (3, ME), (9, PEER), (1, ME)] {
            store.add_message(message(id, sender, "x"));
        }

        let ids: Vec<i64> = store.messages(42).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 3, 9, 1]);
    }

    #[test]
    fn test_duplicate_id_replaces_in_place() {
        let mut store = store();
        store.add_message(message(1, PEER, "first"));
        store.add_message(message(2, PEER, "second"));

        let mut again = message(1, PEER, "first");
        again.is_read = true;
        assert_eq!(store.add_message(again), AddOutcome::Replaced);

        assert_eq!(store.messages(42).len(), 2);
        assert_eq!(store.messages(42)[0].id, 1);
        assert!(store.messages(42)[0].is_read);
    }

    #[test]
    fn test_unread_increments_only_for_peer_messages() {
        let mut store = store();
        store.receive_message(message(1, PEER, "hello"));
        store.receive_message(message(2, ME, "hi"));

        assert_eq!(store.conversation(42).unwrap().unread_count, 1);
        assert_eq!(
            store.conversation(42).unwrap().last_message_text.as_deref(),
            Some("hi")
        );
    }

    #[test]
    fn test_first_message_of_unlisted_conversation() {
        let mut store = ChatStore::new(ME);
        let mut first = message(1, PEER, "hello");
        first.conversation_id = 99;

        store.receive_message(first);
        assert_eq!(store.messages(99).len(), 1);
        assert_eq!(store.total_unread(), 1);
        assert_eq!(store.unread_in(99), 1);

        // One refresh, marked as loading
        assert!(store.take_conversation_refresh());
        assert!(store.is_loading_conversations());
        assert!(!store.take_conversation_refresh());

        // The refreshed list carries the held count
        store.set_conversations(vec![conversation(42), conversation(99)]);
        assert_eq!(store.conversation(99).unwrap().unread_count, 1);
        assert_eq!(store.total_unread(), 1);
        assert!(!store.take_conversation_refresh());
    }

    #[test]
    fn test_unlisted_unread_with_server_count() {
        let mut store = ChatStore::new(ME);
        let mut first = message(1, PEER, "hello");
        first.conversation_id = 99;
        store.receive_message(first);

        // A server count already covering the message is not doubled
        let mut listed = conversation(99);
        listed.unread_count = 1;
        store.upsert_conversation(listed);
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_refresh_waits_for_inflight_list() {
        let mut store = ChatStore::new(ME);
        store.begin_loading_conversations();
        let mut own = message(1, ME, "sent elsewhere");
        own.conversation_id = 99;
        store.receive_message(own);

        assert_eq!(store.total_unread(), 0);
        assert!(!store.take_conversation_refresh());
    }

    #[test]
    fn test_mark_read_clears_unlisted_unread() {
        let mut store = ChatStore::new(ME);
        let mut first = message(1, PEER, "hello");
        first.conversation_id = 99;
        store.receive_message(first);

        store.mark_read(99, ME);
        assert_eq!(store.total_unread(), 0);
        assert!(store.messages(99)[0].is_read);
    }

    #[test]
    fn test_active_conversation_does_not_count_unread() {
        let mut store = store();
        store.set_active(Some(42));
        store.receive_message(message(1, PEER, "hello"));
        assert_eq!(store.total_unread(), 0);
    }

    #[test]
    fn test_local_mark_read_only_touches_peer_messages() {
        let mut store = store();
        store.receive_message(message(1, PEER, "a"));
        store.add_message(message(2, ME, "b"));
        store.receive_message(message(3, PEER, "c"));

        assert_eq!(store.mark_read(42, ME), 2);

        let flags: Vec<(UserId, bool)> = store
            .messages(42)
            .iter()
            .map(|m| (m.sender_id, m.is_read))
            .collect();
        assert_eq!(flags, vec![(PEER, true), (ME, false), (PEER, true)]);
        assert_eq!(store.conversation(42).unwrap().unread_count, 0);
    }

    #[test]
    fn test_peer_read_receipt_marks_own_messages() {
        let mut store = store();
        store.receive_message(message(1, PEER, "a"));
        store.add_message(message(2, ME, "b"));

        assert_eq!(store.mark_read(42, PEER), 1);
        assert!(store.messages(42)[1].is_read);
        assert!(!store.messages(42)[0].is_read);
        assert_eq!(store.conversation(42).unwrap().unread_count, 1);
    }

    #[test]
    fn test_history_pages() {
        let mut store = store();
        store.set_messages(42, vec![message(3, PEER, "c"), message(4, ME, "d")], 0, true);
        let page = vec![message(1, PEER, "a"), message(2, ME, "b"), message(3, PEER, "c")];
        store.set_messages(42, page, 2, false);

        let ids: Vec<i64> = store.messages(42).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(!store.has_more_messages(42));
        assert!(!store.is_loading_messages());
    }

    #[test]
    fn test_confirm_sent_resolves_pending() {
        let mut store = store();
        let request = RequestId::new_v4();
        store.begin_send(request, 42, "hi", Instant::now());

        let pending = store.confirm_sent(message(1, ME, "hi"), Some(request));
        assert_eq!(pending.map(|p| p.text), Some("hi".to_string()));
        assert!(store.pending_sends().is_empty());
        assert_eq!(store.messages(42).len(), 1);
        assert_eq!(store.total_unread(), 0);
    }

    #[test]
    fn test_own_typing_is_ignored() {
        let mut store = store();
        let now = Instant::now();
        store.set_typing(42, ME, true, now);
        store.set_typing(42, PEER, true, now);
        assert_eq!(store.typing_in(42), vec![PEER]);
    }

    #[test]
    fn test_offline_user_stops_typing() {
        let mut store = store();
        store.user_online(PEER);
        store.set_typing(42, PEER, true, Instant::now());

        assert!(store.user_offline(PEER));
        assert!(store.typing_in(42).is_empty());
    }

    #[test]
    fn test_clear_transient_keeps_messages() {
        let mut store = store();
        store.begin_loading_messages();
        store.user_online(PEER);
        store.set_typing(42, PEER, true, Instant::now());
        store.add_message(message(1, PEER, "a"));

        store.clear_transient();

        assert!(!store.is_loading_messages());
        assert!(store.online().is_empty());
        assert!(store.typing_in(42).is_empty());
        assert_eq!(store.messages(42).len(), 1);
    }

    #[test]
    fn test_clear_on_logout() {
        let mut store = store();
        store.add_message(message(1, PEER, "a"));
        store.set_active(Some(42));
        store.record_error("boom".into());

        store.clear();

        assert!(store.conversations().is_empty());
        assert!(store.messages(42).is_empty());
        assert_eq!(store.active_conversation(), None);
        assert_eq!(store.error(), None);
        assert_eq!(store.user_id(), ME);
    }
}
