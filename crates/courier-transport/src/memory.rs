//! In-process transport.
//!
//! [`memory_pair`] returns a [`MemoryConnector`] and the [`MemoryServer`] it
//! dials. Every successful `connect` hands the server a [`MemoryPeer`] that
//! plays the remote end of that connection. Used to drive sessions in tests
//! without a network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::traits::{Connection, Connector, FrameSink, FrameStream, TransportError};

/// Create a connected connector/server pair.
#[must_use]
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Counters::default());
    (
        MemoryConnector {
            accept_tx,
            shared: Arc::clone(&shared),
        },
        MemoryServer {
            accept_rx,
            shared,
        },
    )
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicUsize,
    refuse: AtomicUsize,
}

/// Client side of the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Counters>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            debug!(url = %url, "Refusing memory connection");
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.clone(),
            tx: Some(to_client),
            rx: from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("server is gone".into()))?;

        Ok(Connection::new(
            Box::new(MemorySink {
                tx: Some(to_server),
            }),
            Box::new(MemoryFrames { rx: from_server }),
        ))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Server side of the in-process transport.
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Counters>,
}

impl MemoryServer {
    /// Wait for the next connection.
    ///
    /// Returns `None` once every connector has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.shared.refuse.store(count, Ordering::SeqCst);
    }

    /// Get the number of connection attempts so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Remote end of one in-process connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: Url,
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Get the URL the client dialed.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get a query parameter of the dialed URL.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Push a text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if either side closed the connection.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next frame sent by the client.
    ///
    /// Returns `None` once the client closed the connection.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drain frames already sent by the client without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Drop the connection from the server side.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Check whether the connection is still open in both directions.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(text)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryFrames {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MemoryFrames {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}
