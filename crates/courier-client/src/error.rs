//! Client errors.

use courier_protocol::ProtocolError;
use courier_transport::TransportError;
use thiserror::Error;

/// Session errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session was disposed and cannot connect again.
    #[error("Session is closed")]
    Closed,

    /// The connection attempt was abandoned by a disconnect.
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// The connection could not be established or was lost.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, ClientError>;
