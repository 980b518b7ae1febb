//! # courier-client
//!
//! Realtime sessions of the Courier delivery client.
//!
//! - **Channel** - Connection manager of one namespace (connect, reconnect,
//!   guarded command emission, event loop)
//! - **ChatSession** - Conversations, messages, read receipts, typing, presence
//! - **DriverTracker** - Order requests with countdown, location reports,
//!   order tracking
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_client::{ChatSession, ClientConfig};
//! use courier_transport::WebSocketConnector;
//!
//! let config = ClientConfig::load()?;
//! let connector = Arc::new(WebSocketConnector::default());
//! let chat = ChatSession::new(&config, 7, Role::Customer, connector)?;
//! chat.connect().await?;
//! chat.join_conversation(42);
//! chat.send_message(42, "On my way");
//! ```

pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tracking;

pub use channel::{Channel, ChannelOptions, ConnectionState, Namespace};
pub use chat::{ChatNamespace, ChatSession};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use tracking::{
    DriverTracker, FixedLocation, LocationError, LocationProvider, TrackingNamespace,
};
