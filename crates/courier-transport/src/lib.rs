//! # courier-transport
//!
//! Transport abstraction layer for the Courier realtime client.
//!
//! - **WebSocket** - The production transport
//! - **Memory** - In-process pairs for tests and local tooling
//!
//! ## Transport Abstraction
//!
//! A [`Connector`] dials a namespace endpoint and returns a [`Connection`]
//! split into a [`FrameSink`] and a [`FrameStream`], so the session loop is
//! transport-agnostic.
//!
//! ```rust,ignore
//! use courier_transport::{endpoint_url, Connector, WebSocketConnector};
//!
//! let url = endpoint_url("https://api.example.com", "/conversations", 7, Role::Customer)?;
//! let mut conn = WebSocketConnector::default().connect(&url).await?;
//! while let Some(frame) = conn.stream.recv().await? {
//!     // Process frame
//! }
//! ```

pub mod memory;
pub mod reconnect;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{memory_pair, MemoryConnector, MemoryPeer, MemoryServer};
pub use reconnect::ReconnectPolicy;
pub use traits::{
    endpoint_url, Connection, ConnectionId, Connector, FrameSink, FrameStream, TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};
