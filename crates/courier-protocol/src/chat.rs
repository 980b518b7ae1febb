//! Frames of the conversation namespace.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{ensure_id, ProtocolError, Validate};
use crate::event::{InboundEvent, OutboundCommand};
use crate::models::{Conversation, ConversationId, Message, UserId};

/// Default namespace path of the conversation channel.
pub const CHAT_NAMESPACE: &str = "/conversations";

/// Client-generated id echoed back in `message-sent`.
pub type RequestId = Uuid;

/// Commands sent on the conversation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ChatCommand {
    /// Request the conversation list of the current user.
    GetConversations,

    /// Open (or fetch) the conversation with another user.
    StartConversation { other_user_id: UserId },

    /// Join the room of a conversation.
    JoinConversation { conversation_id: ConversationId },

    /// Send a text message.
    SendMessage {
        conversation_id: ConversationId,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },

    /// Request a page of message history.
    LoadMessages {
        conversation_id: ConversationId,
        limit: u32,
        offset: u32,
    },

    /// Mark the peer's messages in a conversation as read.
    MarkAsRead { conversation_id: ConversationId },

    /// Broadcast the local typing state.
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
}

impl OutboundCommand for ChatCommand {
    fn name(&self) -> &'static str {
        match self {
            ChatCommand::GetConversations => "get-conversations",
            ChatCommand::StartConversation { .. } => "start-conversation",
            ChatCommand::JoinConversation { .. } => "join-conversation",
            ChatCommand::SendMessage { .. } => "send-message",
            ChatCommand::LoadMessages { .. } => "load-messages",
            ChatCommand::MarkAsRead { .. } => "mark-as-read",
            ChatCommand::Typing { .. } => "typing",
        }
    }
}

/// Event kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEventKind {
    ConversationsLoaded,
    ConversationStarted,
    NewMessage,
    MessageSent,
    MessagesLoaded,
    MessagesRead,
    UserTyping,
    UserOnline,
    UserOffline,
    OnlineUsers,
    Error,
}

impl ChatEventKind {
    /// Every kind, in binding order.
    pub const ALL: [ChatEventKind; 11] = [
        ChatEventKind::ConversationsLoaded,
        ChatEventKind::ConversationStarted,
        ChatEventKind::NewMessage,
        ChatEventKind::MessageSent,
        ChatEventKind::MessagesLoaded,
        ChatEventKind::MessagesRead,
        ChatEventKind::UserTyping,
        ChatEventKind::UserOnline,
        ChatEventKind::UserOffline,
        ChatEventKind::OnlineUsers,
        ChatEventKind::Error,
    ];
}

/// Events pushed on the conversation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ChatEvent {
    /// Conversation list of the current user.
    ConversationsLoaded { conversations: Vec<Conversation> },

    /// A conversation was created or fetched for `start-conversation`.
    ConversationStarted { conversation: Conversation },

    /// A message from another participant.
    NewMessage { message: Message },

    /// Confirmation of a message this client sent.
    MessageSent {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },

    /// A page of message history.
    MessagesLoaded {
        conversation_id: ConversationId,
        messages: Vec<Message>,
        #[serde(default)]
        offset: u32,
        #[serde(default)]
        has_more: bool,
    },

    /// Read receipt: `read_by` has read the other participant's messages.
    MessagesRead {
        conversation_id: ConversationId,
        read_by: UserId,
    },

    /// Typing state change of a participant.
    UserTyping {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    /// A user came online.
    UserOnline { user_id: UserId },

    /// A user went offline.
    UserOffline { user_id: UserId },

    /// Full snapshot of the online users.
    OnlineUsers { user_ids: Vec<UserId> },

    /// Backend-reported error.
    Error { message: String },
}

impl InboundEvent for ChatEvent {
    type Kind = ChatEventKind;

    fn kind(&self) -> ChatEventKind {
        match self {
            ChatEvent::ConversationsLoaded { .. } => ChatEventKind::ConversationsLoaded,
            ChatEvent::ConversationStarted { .. } => ChatEventKind::ConversationStarted,
            ChatEvent::NewMessage { .. } => ChatEventKind::NewMessage,
            ChatEvent::MessageSent { .. } => ChatEventKind::MessageSent,
            ChatEvent::MessagesLoaded { .. } => ChatEventKind::MessagesLoaded,
            ChatEvent::MessagesRead { .. } => ChatEventKind::MessagesRead,
            ChatEvent::UserTyping { .. } => ChatEventKind::UserTyping,
            ChatEvent::UserOnline { .. } => ChatEventKind::UserOnline,
            ChatEvent::UserOffline { .. } => ChatEventKind::UserOffline,
            ChatEvent::OnlineUsers { .. } => ChatEventKind::OnlineUsers,
            ChatEvent::Error { .. } => ChatEventKind::Error,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ChatEvent::ConversationsLoaded { .. } => "conversations-loaded",
            ChatEvent::ConversationStarted { .. } => "conversation-started",
            ChatEvent::NewMessage { .. } => "new-message",
            ChatEvent::MessageSent { .. } => "message-sent",
            ChatEvent::MessagesLoaded { .. } => "messages-loaded",
            ChatEvent::MessagesRead { .. } => "messages-read",
            ChatEvent::UserTyping { .. } => "user-typing",
            ChatEvent::UserOnline { .. } => "user-online",
            ChatEvent::UserOffline { .. } => "user-offline",
            ChatEvent::OnlineUsers { .. } => "online-users",
            ChatEvent::Error { .. } => "error",
        }
    }
}

impl Validate for ChatEvent {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ChatEvent::ConversationsLoaded { conversations } => conversations.validate(),
            ChatEvent::ConversationStarted { conversation } => conversation.validate(),
            ChatEvent::NewMessage { message } | ChatEvent::MessageSent { message, .. } => {
                message.validate()
            }
            ChatEvent::MessagesLoaded {
                conversation_id,
                messages,
                ..
            } => {
                ensure_id("conversationId", *conversation_id)?;
                messages.validate()?;
                if let Some(stray) = messages
                    .iter()
                    .find(|m| m.conversation_id != *conversation_id)
                {
                    return Err(ProtocolError::invalid(format!(
                        "message {} belongs to conversation {}, not {}",
                        stray.id, stray.conversation_id, conversation_id
                    )));
                }
                Ok(())
            }
            ChatEvent::MessagesRead {
                conversation_id,
                read_by,
            } => {
                ensure_id("conversationId", *conversation_id)?;
                ensure_id("readBy", *read_by)
            }
            ChatEvent::UserTyping {
                conversation_id,
                user_id,
                ..
            } => {
                ensure_id("conversationId", *conversation_id)?;
                ensure_id("userId", *user_id)
            }
            ChatEvent::UserOnline { user_id } | ChatEvent::UserOffline { user_id } => {
                ensure_id("userId", *user_id)
            }
            ChatEvent::OnlineUsers { user_ids } => user_ids
                .iter()
                .try_for_each(|id| ensure_id("userIds[]", *id)),
            ChatEvent::Error { .. } => Ok(()),
        }
    }
}
