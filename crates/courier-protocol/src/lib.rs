//! # courier-protocol
//!
//! Wire protocol definitions for the Courier realtime client.
//!
//! This crate defines the JSON envelope exchanged over the realtime
//! channels, the typed commands and events of each namespace, and the
//! validation applied before any inbound payload reaches application state.
//!
//! ## Namespaces
//!
//! - `/conversations` - two-party chat ([`ChatCommand`], [`ChatEvent`])
//! - `/tracking` - driver dispatch and order tracking ([`TrackingCommand`], [`TrackingEvent`])
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, ChatCommand, ChatEvent};
//!
//! let text = codec::encode(&ChatCommand::JoinConversation { conversation_id: 42 }).unwrap();
//! assert_eq!(text, r#"{"event":"join-conversation","data":{"conversationId":42}}"#);
//!
//! let event: ChatEvent =
//!     codec::decode(r#"{"event":"user-online","data":{"userId":7}}"#).unwrap();
//! assert_eq!(event, ChatEvent::UserOnline { user_id: 7 });
//! ```

pub mod chat;
pub mod codec;
pub mod event;
pub mod models;
pub mod rest;
pub mod tracking;

pub use chat::{ChatCommand, ChatEvent, ChatEventKind, RequestId, CHAT_NAMESPACE};
pub use codec::{decode, encode, ProtocolError, Validate};
pub use event::{InboundEvent, OutboundCommand};
pub use models::{
    Conversation, ConversationId, Message, MessageId, OrderId, Role, UserId, UserSummary,
};
pub use rest::extract_error_message;
pub use tracking::{
    DriverLocation, Location, OrderRequest, OrderStatus, TrackingCommand, TrackingEvent,
    TrackingEventKind, TRACKING_NAMESPACE,
};
