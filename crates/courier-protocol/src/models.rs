//! Domain records carried by the conversation namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::{ensure_id, ProtocolError, Validate};

/// A user identifier.
pub type UserId = i64;

/// A conversation identifier.
pub type ConversationId = i64;

/// A chat message identifier.
pub type MessageId = i64;

/// An order identifier.
pub type OrderId = i64;

/// Role of the authenticated user, sent as the `role` connection parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Driver,
    Restaurant,
    Admin,
}

impl Role {
    /// Get the wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Driver => "driver",
            Role::Restaurant => "restaurant",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "driver" => Ok(Role::Driver),
            "restaurant" => Ok(Role::Restaurant),
            "admin" => Ok(Role::Admin),
            other => Err(ProtocolError::invalid(format!("unknown role '{other}'"))),
        }
    }
}

/// Participant reference embedded in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A two-party message thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user1: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user2: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Unread messages from the peer. Maintained locally when absent.
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// Check whether a user takes part in this conversation.
    #[must_use]
    pub fn has_participant(&self, user: UserId) -> bool {
        self.user1_id == user || self.user2_id == user
    }

    /// Get the id of the participant that is not `me`.
    ///
    /// Returns `None` if `me` is not a participant.
    #[must_use]
    pub fn peer_id(&self, me: UserId) -> Option<UserId> {
        if self.user1_id == me {
            Some(self.user2_id)
        } else if self.user2_id == me {
            Some(self.user1_id)
        } else {
            None
        }
    }

    /// Get the embedded summary of the participant that is not `me`.
    #[must_use]
    pub fn peer(&self, me: UserId) -> Option<&UserSummary> {
        if self.user1_id == me {
            self.user2.as_ref()
        } else if self.user2_id == me {
            self.user1.as_ref()
        } else {
            None
        }
    }
}

impl Validate for Conversation {
    fn validate(&self) -> Result<(), ProtocolError> {
        ensure_id("conversation.id", self.id)?;
        ensure_id("conversation.user1Id", self.user1_id)?;
        ensure_id("conversation.user2Id", self.user2_id)?;
        if self.user1_id == self.user2_id {
            return Err(ProtocolError::invalid(format!(
                "conversation {} needs two distinct participants",
                self.id
            )));
        }
        for (slot, summary) in [(self.user1_id, &self.user1), (self.user2_id, &self.user2)] {
            if let Some(summary) = summary {
                if summary.id != slot {
                    return Err(ProtocolError::invalid(format!(
                        "conversation {} participant {} does not match its id {}",
                        self.id, summary.id, slot
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Validate for Message {
    fn validate(&self) -> Result<(), ProtocolError> {
        ensure_id("message.id", self.id)?;
        ensure_id("message.conversationId", self.conversation_id)?;
        ensure_id("message.senderId", self.sender_id)?;
        if self.message.trim().is_empty() {
            return Err(ProtocolError::invalid(format!(
                "message {} has an empty body",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation(user1: UserId, user2: UserId) -> Conversation {
        Conversation {
            id: 42,
            user1_id: user1,
            user2_id: user2,
            user1: None,
            user2: None,
            last_message_text: None,
            last_message_time: None,
            unread_count: 0,
        }
    }

    #[test]
    fn test_conversation_from_wire() {
        let conv: Conversation = serde_json::from_value(json!({
            "id": 42,
            "user1Id": 1,
            "user2Id": 2,
            "user1": { "id": 1, "name": "Alice" },
            "user2": { "id": 2, "name": "Bob" },
            "lastMessageText": "hello",
            "lastMessageTime": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.peer_id(1), Some(2));
        assert_eq!(conv.peer(1).and_then(|u| u.name.as_deref()), Some("Bob"));
        assert!(conv.validate().is_ok());
    }

    #[test]
    fn test_conversation_requires_two_participants() {
        assert!(conversation(1, 2).validate().is_ok());
        assert!(conversation(3, 3).validate().is_err());
        assert!(conversation(0, 3).validate().is_err());
    }

    #[test]
    fn test_conversation_peer_of_outsider() {
        let conv = conversation(1, 2);
        assert_eq!(conv.peer_id(7), None);
        assert!(!conv.has_participant(7));
    }

    #[test]
    fn test_message_defaults_unread() {
        let msg: Message = serde_json::from_value(json!({
            "id": 1,
            "conversationId": 42,
            "senderId": 1,
            "message": "hi",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert!(!msg.is_read);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_message_rejects_blank_body() {
        let msg: Message = serde_json::from_value(json!({
            "id": 1,
            "conversationId": 42,
            "senderId": 1,
            "message": "   ",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Driver".parse::<Role>().unwrap(), Role::Driver);
        assert_eq!(Role::Customer.to_string(), "customer");
        assert!("pilot".parse::<Role>().is_err());
    }
}
