//! Transport abstraction traits for Courier.
//!
//! A [`Connector`] opens a [`Connection`] to a namespace URL. A connection is
//! split into a sending half and a receiving half so the session loop can
//! wait on inbound frames while writing outbound ones.

use async_trait::async_trait;
use courier_protocol::Role;
use std::fmt;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Identifier of a connection attempt, used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The endpoint could not be reached or refused the handshake.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] courier_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the URL of a namespace endpoint.
///
/// `http`/`https` base URLs are rewritten to `ws`/`wss`. The authenticated
/// identity travels as the `userId` and `role` query parameters.
///
/// # Errors
///
/// Returns an error if the base URL cannot be parsed or uses an unsupported
/// scheme.
pub fn endpoint_url(
    base: &str,
    namespace: &str,
    user_id: i64,
    role: Role,
) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl(format!("{base}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(format!("cannot use scheme '{scheme}'")))?;

    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        namespace.trim_start_matches('/')
    );
    url.set_path(&path);

    url.query_pairs_mut()
        .clear()
        .append_pair("userId", &user_id.to_string())
        .append_pair("role", role.as_str());

    Ok(url)
}

/// Sending half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be cancel
    /// safe: dropping the future loses no frame.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

/// An open connection.
pub struct Connection {
    pub id: ConnectionId,
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    /// Assemble a connection from its halves.
    #[must_use]
    pub fn new(sink: Box<dyn FrameSink>, stream: Box<dyn FrameStream>) -> Self {
        Self {
            id: ConnectionId::generate(),
            sink,
            stream,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Something that can open connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to the given endpoint.
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}
