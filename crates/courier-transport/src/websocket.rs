//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.
//! Text frames are handed up unchecked; size and schema limits are enforced by
//! the codec so an oversized frame is rejected without dropping the
//! connection. Only messages above the transport ceiling abort the
//! connection, before tungstenite buffers them.

use async_trait::async_trait;
use courier_protocol::codec::MAX_FRAME_SIZE;
use courier_protocol::ProtocolError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig as TungsteniteConfig, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};
use url::Url;

use crate::traits::{Connection, Connector, FrameSink, FrameStream, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Transport ceiling for one inbound message in bytes. Larger messages
    /// fail the connection.
    pub max_message_size: usize,
    /// Transport ceiling for one inbound frame in bytes.
    pub max_frame_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4 * MAX_FRAME_SIZE,
            max_frame_size: 4 * MAX_FRAME_SIZE,
        }
    }
}

impl WebSocketConfig {
    fn tungstenite(&self) -> TungsteniteConfig {
        let mut config = TungsteniteConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_frame_size);
        config
    }
}

/// WebSocket connector.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a new WebSocket connector.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        let (ws_stream, response) =
            connect_async_with_config(url.as_str(), Some(self.config.tungstenite()), false)
                .await
                .map_err(|e| {
                    error!(url = %url, "WebSocket handshake failed: {}", e);
                    TransportError::ConnectFailed(e.to_string())
                })?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        let (sink, stream) = ws_stream.split();
        Ok(Connection::new(
            Box::new(WebSocketSink { sink, closed: false }),
            Box::new(WebSocketFrames { stream }),
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Sending half of a WebSocket connection.
struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(()); // Already closed
        }

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }
}

/// Receiving half of a WebSocket connection.
struct WebSocketFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    warn!(bytes = data.len(), error = %ProtocolError::Binary, "Dropping frame");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers pings on the next write or flush
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
