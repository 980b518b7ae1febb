//! Online presence tracking.
//!
//! The set is only ever mutated by inbound presence events.

use chrono::{DateTime, Utc};
use courier_protocol::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Presence state for a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    /// The online user.
    pub user_id: UserId,
    /// When this client learned the user was online.
    pub since: DateTime<Utc>,
}

impl PresenceState {
    /// Create a presence state stamped with the current time.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            since: Utc::now(),
        }
    }
}

/// The set of users considered online.
#[derive(Debug, Default)]
pub struct OnlineUsers {
    members: HashMap<UserId, PresenceState>,
}

impl OnlineUsers {
    /// Create an empty presence set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of online users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Check if a user is online.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.members.contains_key(&user_id)
    }

    /// Get the presence state of a user.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<&PresenceState> {
        self.members.get(&user_id)
    }

    /// Mark a user online.
    ///
    /// Returns `true` if the user was not already online.
    pub fn join(&mut self, user_id: UserId) -> bool {
        if self.members.contains_key(&user_id) {
            return false;
        }
        self.members.insert(user_id, PresenceState::new(user_id));
        debug!(user = user_id, "Presence: user online");
        true
    }

    /// Mark a user offline.
    ///
    /// Returns the removed presence state, if any.
    pub fn leave(&mut self, user_id: UserId) -> Option<PresenceState> {
        let state = self.members.remove(&user_id);
        if state.is_some() {
            debug!(user = user_id, "Presence: user offline");
        }
        state
    }

    /// Replace the set with a server snapshot.
    ///
    /// Users present in both keep their original `since` timestamp.
    pub fn replace(&mut self, user_ids: &[UserId]) {
        self.members.retain(|id, _| user_ids.contains(id));
        for id in user_ids {
            self.members
                .entry(*id)
                .or_insert_with(|| PresenceState::new(*id));
        }
        debug!(online = self.members.len(), "Presence: snapshot applied");
    }

    /// Get all online user ids, sorted.
    #[must_use]
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get the presence states as a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceState> {
        self.members.values().cloned().collect()
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
