//! Conversation session.
//!
//! [`ChatNamespace`] binds the conversation events to [`ChatStore`]
//! reducers. [`ChatSession`] wraps the channel with one method per command;
//! every method is a guarded fire-and-forget: when the channel is not
//! connected it logs a warning and does nothing, and results arrive later as
//! events.

use courier_core::{ChatStore, EventRouter, SessionStore};
use courier_protocol::{
    ChatCommand, ChatEvent, ChatEventKind, ConversationId, RequestId, Role, UserId,
};
use courier_transport::Connector;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::{Channel, ChannelOptions, ConnectionState, Namespace};
use crate::config::ClientConfig;
use crate::error::Result;

/// The `/conversations` namespace.
#[derive(Debug)]
pub struct ChatNamespace;

impl Namespace for ChatNamespace {
    type Event = ChatEvent;
    type Command = ChatCommand;
    type Store = ChatStore;

    const NAME: &'static str = "chat";

    fn bind(router: &mut EventRouter<ChatEvent, ChatStore>) {
        router.on(ChatEventKind::ConversationsLoaded, |event, store| {
            if let ChatEvent::ConversationsLoaded { conversations } = event {
                store.set_conversations(conversations.clone());
            }
        });

        router.on(ChatEventKind::ConversationStarted, |event, store| {
            if let ChatEvent::ConversationStarted { conversation } = event {
                store.upsert_conversation(conversation.clone());
            }
        });

        router.on(ChatEventKind::NewMessage, |event, store| {
            if let ChatEvent::NewMessage { message } = event {
                store.receive_message(message.clone());
            }
        });

        router.on(ChatEventKind::MessageSent, |event, store| {
            if let ChatEvent::MessageSent {
                message,
                request_id,
            } = event
            {
                store.confirm_sent(message.clone(), *request_id);
            }
        });

        router.on(ChatEventKind::MessagesLoaded, |event, store| {
            if let ChatEvent::MessagesLoaded {
                conversation_id,
                messages,
                offset,
                has_more,
            } = event
            {
                store.set_messages(*conversation_id, messages.clone(), *offset, *has_more);
            }
        });

        router.on(ChatEventKind::MessagesRead, |event, store| {
            if let ChatEvent::MessagesRead {
                conversation_id,
                read_by,
            } = event
            {
                store.mark_read(*conversation_id, *read_by);
            }
        });

        router.on(ChatEventKind::UserTyping, |event, store| {
            if let ChatEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing,
            } = event
            {
                store.set_typing(*conversation_id, *user_id, *is_typing, Instant::now());
            }
        });

        router.on(ChatEventKind::UserOnline, |event, store| {
            if let ChatEvent::UserOnline { user_id } = event {
                store.user_online(*user_id);
            }
        });

        router.on(ChatEventKind::UserOffline, |event, store| {
            if let ChatEvent::UserOffline { user_id } = event {
                store.user_offline(*user_id);
            }
        });

        router.on(ChatEventKind::OnlineUsers, |event, store| {
            if let ChatEvent::OnlineUsers { user_ids } = event {
                store.set_online_users(user_ids);
            }
        });

        router.on(ChatEventKind::Error, |event, store| {
            if let ChatEvent::Error { message } = event {
                store.record_error(message.clone());
            }
        });
    }

    fn resync(store: &mut ChatStore) -> Vec<ChatCommand> {
        store.begin_loading_conversations();

        let mut commands = vec![ChatCommand::GetConversations];
        if let Some(conversation_id) = store.active_conversation() {
            commands.push(ChatCommand::JoinConversation { conversation_id });
        }
        commands
    }

    fn tick(store: &mut ChatStore, now: Instant) -> Vec<ChatCommand> {
        store.expire_typing(now);

        let mut commands = Vec::new();
        if store.take_conversation_refresh() {
            commands.push(ChatCommand::GetConversations);
        }
        if let Some(conversation_id) = store.expire_outgoing_typing(now) {
            commands.push(ChatCommand::Typing {
                conversation_id,
                is_typing: false,
            });
        }
        commands
    }
}

/// A conversation session for one authenticated user.
#[derive(Debug, Clone)]
pub struct ChatSession {
    channel: Channel<ChatNamespace>,
    page_size: u32,
}

impl ChatSession {
    /// Create a disconnected session.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured server URL is invalid.
    pub fn new(
        config: &ClientConfig,
        user_id: UserId,
        role: Role,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let options = ChannelOptions::new(
            &config.server_url,
            &config.chat.namespace,
            user_id,
            role,
            config.reconnect.policy(),
        )?;
        let store = ChatStore::with_typing_timeout(user_id, config.chat.typing_timeout());

        Ok(Self {
            channel: Channel::new(options, connector, store),
            page_size: config.chat.history_page_size,
        })
    }

    /// Get the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel<ChatNamespace> {
        &self.channel
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    #[must_use]
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.channel.watch_revision()
    }

    /// Read the session state.
    pub fn read<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        self.channel.read(f)
    }

    /// Connect to the conversation namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was disposed or the connection failed.
    pub async fn connect(&self) -> Result<()> {
        self.channel.connect().await
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    /// End the session on logout.
    pub async fn dispose(&self) {
        self.channel.dispose().await;
    }

    /// Request the conversation list.
    pub fn request_conversations(&self) {
        self.channel
            .emit_with(ChatCommand::GetConversations, ChatStore::begin_loading_conversations);
    }

    /// Start (or reopen) a conversation with another user.
    pub fn start_conversation(&self, other_user_id: UserId) {
        self.channel
            .emit(ChatCommand::StartConversation { other_user_id });
    }

    /// Join a conversation room and make it the active conversation.
    pub fn join_conversation(&self, conversation_id: ConversationId) {
        self.channel.emit_with(
            ChatCommand::JoinConversation { conversation_id },
            |store| store.set_active(Some(conversation_id)),
        );
    }

    /// Leave the active conversation locally.
    pub fn leave_conversation(&self) {
        let stopped = self.channel.update(|store| {
            store.set_active(None);
            store.stop_typing()
        });
        if let Some(conversation_id) = stopped {
            self.send_typing(conversation_id, false);
        }
    }

    /// Send a text message.
    ///
    /// Returns the request id echoed back by the `message-sent`
    /// confirmation, or `None` if nothing was sent.
    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        text: impl Into<String>,
    ) -> Option<RequestId> {
        let text = text.into();
        if text.trim().is_empty() {
            debug!(conversation = conversation_id, "Ignoring empty message");
            return None;
        }

        let request_id = Uuid::new_v4();
        let stopped = self.channel.emit_with(
            ChatCommand::SendMessage {
                conversation_id,
                message: text.clone(),
                request_id: Some(request_id),
            },
            |store| {
                store.begin_send(request_id, conversation_id, text, Instant::now());
                store.stop_typing()
            },
        )?;

        if let Some(typing_in) = stopped {
            self.send_typing(typing_in, false);
        }
        Some(request_id)
    }

    /// Request a page of history.
    pub fn load_messages(&self, conversation_id: ConversationId, limit: u32, offset: u32) {
        self.channel.emit_with(
            ChatCommand::LoadMessages {
                conversation_id,
                limit,
                offset,
            },
            ChatStore::begin_loading_messages,
        );
    }

    /// Request the page of history before the loaded messages.
    pub fn load_older_messages(&self, conversation_id: ConversationId) {
        let offset = self.read(|store| store.messages(conversation_id).len());
        self.load_messages(
            conversation_id,
            self.page_size,
            u32::try_from(offset).unwrap_or(u32::MAX),
        );
    }

    /// Mark a conversation read, locally and on the server.
    pub fn mark_read(&self, conversation_id: ConversationId) {
        self.channel
            .emit_with(ChatCommand::MarkAsRead { conversation_id }, |store| {
                let me = store.user_id();
                store.mark_read(conversation_id, me)
            });
    }

    /// Broadcast the local typing state.
    pub fn send_typing(&self, conversation_id: ConversationId, is_typing: bool) {
        self.channel.emit(ChatCommand::Typing {
            conversation_id,
            is_typing,
        });
    }

    /// Register a keystroke in the composer.
    ///
    /// The first keystroke announces typing; the announcement is withdrawn
    /// after the typing timeout without keystrokes.
    pub fn notify_typing(&self, conversation_id: ConversationId) {
        if !self.channel.ensure_connected("typing") {
            return;
        }

        let updates = self
            .channel
            .update(|store| store.keystroke(conversation_id, Instant::now()));
        for (conversation_id, is_typing) in updates {
            self.send_typing(conversation_id, is_typing);
        }
    }

    /// Withdraw the typing announcement now.
    pub fn stop_typing(&self) {
        if let Some(conversation_id) = self.channel.update(ChatStore::stop_typing) {
            info!(conversation = conversation_id, "Stopped typing");
            self.send_typing(conversation_id, false);
        }
    }
}
