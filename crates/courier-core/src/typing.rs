//! Typing indicators.
//!
//! Incoming indicators are kept per (conversation, user) and expire after a
//! client-side timeout unless refreshed. The outgoing side is a debounce: the
//! first keystroke announces typing, every keystroke re-arms the deadline,
//! and the announcement is withdrawn once the deadline passes.

use courier_protocol::{ConversationId, UserId};
use std::time::Duration;
use tokio::time::Instant;

/// Default lifetime of a typing indicator.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// A participant currently composing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub expires_at: Instant,
}

/// Incoming typing indicators.
#[derive(Debug)]
pub struct TypingIndicators {
    entries: Vec<TypingIndicator>,
    timeout: Duration,
}

impl TypingIndicators {
    /// Create an empty set with the given timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
        }
    }

    /// Apply a typing event.
    ///
    /// `true` inserts or refreshes the entry, `false` removes it.
    pub fn set(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
        now: Instant,
    ) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.conversation_id == conversation_id && e.user_id == user_id);

        match (pos, is_typing) {
            (Some(i), true) => self.entries[i].expires_at = now + self.timeout,
            (None, true) => self.entries.push(TypingIndicator {
                conversation_id,
                user_id,
                expires_at: now + self.timeout,
            }),
            (Some(i), false) => {
                self.entries.remove(i);
            }
            (None, false) => {}
        }
    }

    /// Remove expired entries.
    ///
    /// Returns the number of removed entries.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.expires_at > now);
        before - self.entries.len()
    }

    /// Check whether a user is typing in a conversation.
    #[must_use]
    pub fn is_typing(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        self.entries
            .iter()
            .any(|e| e.conversation_id == conversation_id && e.user_id == user_id)
    }

    /// Get the users typing in a conversation.
    #[must_use]
    pub fn in_conversation(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.entries
            .iter()
            .filter(|e| e.conversation_id == conversation_id)
            .map(|e| e.user_id)
            .collect()
    }

    /// Get every indicator.
    #[must_use]
    pub fn entries(&self) -> &[TypingIndicator] {
        &self.entries
    }

    /// Get the earliest expiry.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.expires_at).min()
    }

    /// Drop every indicator of a user.
    pub fn clear_user(&mut self, user_id: UserId) {
        self.entries.retain(|e| e.user_id != user_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for TypingIndicators {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

/// Local typing state to broadcast.
#[derive(Debug)]
pub struct TypingDebounce {
    active: Option<(ConversationId, Instant)>,
    timeout: Duration,
}

impl TypingDebounce {
    /// Create an idle debounce with the given idle timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            active: None,
            timeout,
        }
    }

    /// Register a keystroke.
    ///
    /// Returns the typing updates to broadcast, in order.
    pub fn keystroke(
        &mut self,
        conversation_id: ConversationId,
        now: Instant,
    ) -> Vec<(ConversationId, bool)> {
        let deadline = now + self.timeout;
        match self.active.replace((conversation_id, deadline)) {
            Some((current, _)) if current == conversation_id => Vec::new(),
            Some((previous, _)) => vec![(previous, false), (conversation_id, true)],
            None => vec![(conversation_id, true)],
        }
    }

    /// Stop typing immediately.
    ///
    /// Returns the conversation to announce `false` for, if typing was active.
    pub fn stop(&mut self) -> Option<ConversationId> {
        self.active.take().map(|(conversation_id, _)| conversation_id)
    }

    /// Stop typing if the deadline passed.
    pub fn expire(&mut self, now: Instant) -> Option<ConversationId> {
        match self.active {
            Some((_, deadline)) if deadline <= now => self.stop(),
            _ => None,
        }
    }

    /// Get the pending deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.active.map(|(_, deadline)| deadline)
    }

    /// Get the conversation currently announced as typing.
    #[must_use]
    pub fn active(&self) -> Option<ConversationId> {
        self.active.map(|(conversation_id, _)| conversation_id)
    }

    /// Forget the local state without announcing anything.
    pub fn reset(&mut self) {
        self.active = None;
    }
}

impl Default for TypingDebounce {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_lifetime() {
        let start = Instant::now();
        let mut typing = TypingIndicators::default();

        typing.set(42, 2, true, start);
        assert!(typing.is_typing(42, 2));
        assert_eq!(typing.next_deadline(), Some(start + DEFAULT_TYPING_TIMEOUT));

        // Not yet expired just before the timeout
        assert_eq!(typing.expire(start + Duration::from_millis(2999)), 0);
        assert!(typing.is_typing(42, 2));

        assert_eq!(typing.expire(start + DEFAULT_TYPING_TIMEOUT), 1);
        assert!(!typing.is_typing(42, 2));
    }

    #[test]
    fn test_false_clears_before_timeout() {
        let start = Instant::now();
        let mut typing = TypingIndicators::default();

        typing.set(42, 2, true, start);
        typing.set(42, 2, false, start + Duration::from_millis(500));
        assert!(!typing.is_typing(42, 2));
        assert_eq!(typing.next_deadline(), None);
    }

    #[test]
    fn test_refresh_extends_deadline() {
        let start = Instant::now();
        let mut typing = TypingIndicators::default();

        typing.set(42, 2, true, start);
        typing.set(42, 2, true, start + Duration::from_secs(2));
        assert_eq!(typing.entries().len(), 1);

        typing.expire(start + Duration::from_secs(4));
        assert!(typing.is_typing(42, 2));
    }

    #[test]
    fn test_filter_by_conversation() {
        let now = Instant::now();
        let mut typing = TypingIndicators::default();
        typing.set(42, 2, true, now);
        typing.set(43, 3, true, now);

        assert_eq!(typing.in_conversation(42), vec![2]);
        assert_eq!(typing.in_conversation(44), Vec::<UserId>::new());
    }

    #[test]
    fn test_debounce_keystrokes() {
        let start = Instant::now();
        let mut debounce = TypingDebounce::default();

        assert_eq!(debounce.keystroke(42, start), vec![(42, true)]);
        assert!(debounce
            .keystroke(42, start + Duration::from_secs(2))
            .is_empty());

        // Re-armed by the second keystroke
        assert_eq!(debounce.expire(start + Duration::from_secs(4)), None);
        assert_eq!(debounce.expire(start + Duration::from_secs(5)), Some(42));
        assert_eq!(debounce.active(), None);
    }

    #[test]
    fn test_debounce_switch_conversation() {
        let now = Instant::now();
        let mut debounce = TypingDebounce::default();
        debounce.keystroke(42, now);

        assert_eq!(debounce.keystroke(43, now), vec![(42, false), (43, true)]);
        assert_eq!(debounce.stop(), Some(43));
        assert_eq!(debounce.stop(), None);
    }
}
