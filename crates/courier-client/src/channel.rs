//! Connection manager for one realtime namespace.
//!
//! A [`Channel`] owns the lifecycle of a single connection: `connect`,
//! `disconnect`, reconnection after drops, and `dispose` on logout. While
//! connected, one background task applies every inbound event to the
//! namespace store in delivery order, writes queued commands, and ticks the
//! store's timers.
//!
//! ```text
//!   emit() ──mpsc──▶ ┌────────────┐ ──text──▶ server
//!                    │ event loop │
//!   store ◀─router── └────────────┘ ◀─text─── server
//! ```

use courier_core::{EventRouter, SessionStore};
use courier_protocol::{codec, InboundEvent, OutboundCommand, Role, UserId};
use courier_transport::{endpoint_url, Connection, Connector, ReconnectPolicy};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{ClientError, Result};
use crate::metrics::{self, ConnectionMetricsGuard};

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: the session was disposed.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A realtime namespace: its frames, its store and how events mutate it.
pub trait Namespace: Send + Sync + 'static {
    /// Events pushed by the server.
    type Event: InboundEvent;
    /// Commands sent by the client.
    type Command: OutboundCommand;
    /// Session state.
    type Store: SessionStore;

    /// Short name used in logs and metric labels.
    const NAME: &'static str;

    /// Install the namespace's event handlers.
    fn bind(router: &mut EventRouter<Self::Event, Self::Store>);

    /// Commands sent right after every successful connection.
    fn resync(_store: &mut Self::Store) -> Vec<Self::Command> {
        Vec::new()
    }

    /// Run timers due at `now` and drain follow-up work; returns commands
    /// to send. Called after every applied event and at the store's next
    /// deadline.
    fn tick(_store: &mut Self::Store, _now: Instant) -> Vec<Self::Command> {
        Vec::new()
    }
}

/// Connection settings of a channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Endpoint URL, identity parameters included.
    pub url: Url,
    pub reconnect: ReconnectPolicy,
}

impl ChannelOptions {
    /// Build options for a namespace of a backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid.
    pub fn new(
        server_url: &str,
        namespace: &str,
        user_id: UserId,
        role: Role,
        reconnect: ReconnectPolicy,
    ) -> Result<Self> {
        Ok(Self {
            url: endpoint_url(server_url, namespace, user_id, role)?,
            reconnect,
        })
    }
}

enum Control<C> {
    Emit(C),
    Close,
}

enum Exit {
    /// Closed locally.
    Shutdown,
    /// Lost the connection.
    Dropped(String),
}

struct Inner<N: Namespace> {
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    store: Arc<Mutex<N::Store>>,
    router: Mutex<EventRouter<N::Event, N::Store>>,
    state: watch::Sender<ConnectionState>,
    revision: watch::Sender<u64>,
    /// Bumped by every teardown; a connect started under an older value
    /// is abandoned.
    generation: AtomicU64,
    /// Guards the control queue and the task handle together with
    /// `generation` bumps.
    session: Mutex<Session<N::Command>>,
}

struct Session<C> {
    control: Option<mpsc::UnboundedSender<Control<C>>>,
    task: Option<JoinHandle<()>>,
}

/// Connection manager of one namespace.
///
/// Cloning yields another handle to the same session.
pub struct Channel<N: Namespace> {
    inner: Arc<Inner<N>>,
}

impl<N: Namespace> Clone for Channel<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Namespace> fmt::Debug for Channel<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("namespace", &N::NAME)
            .field("url", &self.inner.options.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl<N: Namespace> Channel<N> {
    /// Create a disconnected channel around a store.
    #[must_use]
    pub fn new(options: ChannelOptions, connector: Arc<dyn Connector>, store: N::Store) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (revision, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                options,
                connector,
                store: Arc::new(Mutex::new(store)),
                router: Mutex::new(EventRouter::new()),
                state,
                revision,
                generation: AtomicU64::new(0),
                session: Mutex::new(Session {
                    control: None,
                    task: None,
                }),
            }),
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Watch store changes. The value is bumped after every mutation.
    #[must_use]
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Get the shared store.
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<N::Store>> {
        Arc::clone(&self.inner.store)
    }

    /// Read the store.
    pub fn read<R>(&self, f: impl FnOnce(&N::Store) -> R) -> R {
        f(&self.inner.store.lock())
    }

    /// Mutate the store and notify watchers.
    pub fn update<R>(&self, f: impl FnOnce(&mut N::Store) -> R) -> R {
        let result = f(&mut self.inner.store.lock());
        self.inner.bump();
        result
    }

    /// Get the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.options.url
    }

    /// Bind a handler that runs after the namespace handlers and survives
    /// reconnects.
    pub fn observe<F>(&self, kind: <N::Event as InboundEvent>::Kind, handler: F)
    where
        F: Fn(&N::Event, &mut N::Store) + Send + Sync + 'static,
    {
        self.inner.router.lock().observe(kind, handler);
    }

    /// Get the number of handlers bound to an event kind.
    #[must_use]
    pub fn handler_count(&self, kind: <N::Event as InboundEvent>::Kind) -> usize {
        self.inner.router.lock().handler_count(kind)
    }

    /// Open the connection.
    ///
    /// Makes a single attempt. On failure the error is recorded in the
    /// store and the channel stays disconnected; reconnection only applies
    /// to connections lost after they were established. A `disconnect` or
    /// `dispose` issued while the attempt is in flight abandons it.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel was disposed, the attempt failed or
    /// was cancelled.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let (found, generation) = inner.claim_connecting();

        match found {
            ConnectionState::Disconnected => {}
            ConnectionState::Closed => return Err(ClientError::Closed),
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!(namespace = N::NAME, "Already connected");
                return Ok(());
            }
        }
        info!(namespace = N::NAME, url = %inner.options.url, "Connecting");

        let mut conn = match inner.connector.connect(&inner.options.url).await {
            Ok(conn) => conn,
            Err(e) if inner.is_current(generation) => {
                error!(namespace = N::NAME, error = %e, "Connection failed");
                metrics::record_error("connect");
                inner.fail(e.to_string());
                return Err(e.into());
            }
            Err(_) => return Err(inner.cancelled()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if !inner.install_control(generation, tx) {
            let _ = conn.sink.close().await;
            return Err(inner.cancelled());
        }

        if let Err(e) = inner.establish(&mut conn).await {
            inner.session.lock().control = None;
            let _ = conn.sink.close().await;
            if !inner.is_current(generation) {
                inner.settle_disconnected();
                return Err(inner.cancelled());
            }
            inner.fail(e.to_string());
            return Err(e);
        }

        if let Err(conn) = inner.start(generation, conn, rx) {
            // Torn down while the resync commands were being written
            let mut conn = *conn;
            let _ = conn.sink.close().await;
            inner.settle_disconnected();
            return Err(inner.cancelled());
        }

        Ok(())
    }

    /// Close the connection and clear transient state.
    ///
    /// No reconnection happens after an explicit disconnect. A connect
    /// still in flight is abandoned.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let (control, task) = {
            let mut session = inner.session.lock();
            inner.generation.fetch_add(1, Ordering::SeqCst);
            (session.control.take(), session.task.take())
        };

        if let Some(control) = control {
            let _ = control.send(Control::Close);
        }

        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(namespace = N::NAME, error = %e, "Session task failed");
                }
            }
        }

        inner.store.lock().clear_transient();
        inner.bump();
        inner.settle_disconnected();
        info!(namespace = N::NAME, "Disconnected");
    }

    /// End the session: disconnect and drop all session data.
    ///
    /// The channel cannot connect again.
    pub async fn dispose(&self) {
        self.disconnect().await;
        self.inner.store.lock().clear();
        self.inner.bump();
        self.inner.set_state(ConnectionState::Closed);
        info!(namespace = N::NAME, "Session disposed");
    }

    /// Queue a command.
    ///
    /// Drops the command with a warning unless connected. Returns whether
    /// the command was queued.
    pub fn emit(&self, command: N::Command) -> bool {
        self.emit_with(command, |_| ()).is_some()
    }

    /// Apply a local store update, then queue a command.
    ///
    /// Neither happens unless connected. Returns the update's result when
    /// the command was queued.
    pub fn emit_with<R>(
        &self,
        command: N::Command,
        prepare: impl FnOnce(&mut N::Store) -> R,
    ) -> Option<R> {
        if !self.ensure_connected(command.name()) {
            return None;
        }

        let control = self.inner.session.lock().control.clone();
        let Some(control) = control else {
            self.drop_command(command.name(), "no session task");
            return None;
        };

        let result = self.update(prepare);
        let name = command.name();
        if control.send(Control::Emit(command)).is_err() {
            self.drop_command(name, "session task ended");
        }
        Some(result)
    }

    /// Check the connection guard for a command.
    pub(crate) fn ensure_connected(&self, command: &'static str) -> bool {
        let state = self.state();
        if state.is_connected() {
            return true;
        }
        warn!(
            namespace = N::NAME,
            command,
            state = %state,
            "Not connected, dropping command"
        );
        metrics::record_dropped_command(N::NAME, command);
        false
    }

    fn drop_command(&self, command: &'static str, reason: &str) {
        warn!(namespace = N::NAME, command, reason, "Dropping command");
        metrics::record_dropped_command(N::NAME, command);
    }
}

impl<N: Namespace> Inner<N> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(namespace = N::NAME, from = %previous, to = %state, "State changed");
        }
    }

    /// Move `Disconnected` to `Connecting` in one step.
    ///
    /// Returns the state found and the teardown generation the attempt
    /// belongs to. The transition only happened if the state found is
    /// `Disconnected`.
    fn claim_connecting(&self) -> (ConnectionState, u64) {
        let _session = self.session.lock();
        let generation = self.generation.load(Ordering::SeqCst);

        let mut found = ConnectionState::Disconnected;
        self.state.send_if_modified(|state| {
            found = *state;
            if found == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if found == ConnectionState::Disconnected {
            debug!(
                namespace = N::NAME,
                from = %found,
                to = %ConnectionState::Connecting,
                "State changed"
            );
        }
        (found, generation)
    }

    /// Set `Disconnected` unless the channel was disposed.
    fn settle_disconnected(&self) {
        let changed = self.state.send_if_modified(|state| match state {
            ConnectionState::Closed | ConnectionState::Disconnected => false,
            _ => {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        if changed {
            debug!(namespace = N::NAME, to = %ConnectionState::Disconnected, "State changed");
        }
    }

    /// Install the control queue unless a teardown happened since
    /// `generation` was read.
    fn install_control(
        &self,
        generation: u64,
        control: mpsc::UnboundedSender<Control<N::Command>>,
    ) -> bool {
        let mut session = self.session.lock();
        if !self.is_current(generation) {
            return false;
        }
        session.control = Some(control);
        true
    }

    /// Spawn the event loop unless a teardown happened since `generation`
    /// was read; the connection is handed back otherwise.
    fn start(
        self: &Arc<Self>,
        generation: u64,
        conn: Connection,
        rx: mpsc::UnboundedReceiver<Control<N::Command>>,
    ) -> std::result::Result<(), Box<Connection>> {
        let mut session = self.session.lock();
        if !self.is_current(generation) {
            session.control = None;
            return Err(Box::new(conn));
        }

        let task = tokio::spawn(Arc::clone(self).run(conn, rx));
        if let Some(previous) = session.task.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn cancelled(&self) -> ClientError {
        debug!(namespace = N::NAME, "Connection attempt abandoned");
        ClientError::Cancelled
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn fail(&self, message: String) {
        self.store.lock().record_error(message);
        self.bump();
        self.settle_disconnected();
    }

    /// Rebind handlers, mark the channel connected and send resync commands.
    async fn establish(&self, conn: &mut Connection) -> std::result::Result<(), ClientError> {
        self.router.lock().rebind(N::bind);
        let connected = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !connected {
            return Err(ClientError::Cancelled);
        }
        info!(namespace = N::NAME, connection = %conn.id, "Connected");

        let commands = N::resync(&mut self.store.lock());
        self.bump();
        for command in &commands {
            self.send(conn, command).await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        conn: &mut Connection,
        command: &N::Command,
    ) -> std::result::Result<(), ClientError> {
        let text = codec::encode(command)?;
        let bytes = text.len();
        conn.sink.send(text).await?;
        metrics::record_command(N::NAME, command.name(), bytes);
        trace!(namespace = N::NAME, command = command.name(), bytes, "Sent");
        Ok(())
    }

    /// Decode and apply one frame. Returns whether it was applied.
    fn handle_frame(&self, text: &str) -> bool {
        let event = match codec::decode::<N::Event>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    namespace = N::NAME,
                    event = codec::event_name(text).as_deref().unwrap_or("?"),
                    error = %e,
                    "Rejected frame"
                );
                metrics::record_rejected_frame(N::NAME);
                return false;
            }
        };

        metrics::record_event(N::NAME, event.name());
        {
            let router = self.router.lock();
            let mut store = self.store.lock();
            router.dispatch(&event, &mut store);
        }
        self.bump();
        true
    }

    async fn tick(&self, conn: &mut Connection) -> std::result::Result<(), ClientError> {
        let commands = N::tick(&mut self.store.lock(), Instant::now());
        self.bump();
        for command in &commands {
            self.send(conn, command).await?;
        }
        Ok(())
    }

    /// Serve one connection until it ends.
    async fn pump(
        &self,
        conn: &mut Connection,
        rx: &mut mpsc::UnboundedReceiver<Control<N::Command>>,
    ) -> Exit {
        let _metrics_guard = ConnectionMetricsGuard::new(N::NAME);

        loop {
            let deadline = self.store.lock().next_deadline();

            tokio::select! {
                frame = conn.stream.recv() => match frame {
                    Ok(Some(text)) => {
                        if self.handle_frame(&text) {
                            if let Err(e) = self.tick(conn).await {
                                return Exit::Dropped(e.to_string());
                            }
                        }
                    }
                    Ok(None) => return Exit::Dropped("closed by server".into()),
                    Err(e) => return Exit::Dropped(e.to_string()),
                },

                control = rx.recv() => match control {
                    Some(Control::Emit(command)) => {
                        if let Err(e) = self.send(conn, &command).await {
                            return Exit::Dropped(e.to_string());
                        }
                    }
                    Some(Control::Close) | None => return Exit::Shutdown,
                },

                () = sleep_until(deadline) => {
                    if let Err(e) = self.tick(conn).await {
                        return Exit::Dropped(e.to_string());
                    }
                }
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        mut conn: Connection,
        mut rx: mpsc::UnboundedReceiver<Control<N::Command>>,
    ) {
        loop {
            let exit = self.pump(&mut conn, &mut rx).await;
            let _ = conn.sink.close().await;

            let reason = match exit {
                Exit::Shutdown => {
                    debug!(namespace = N::NAME, connection = %conn.id, "Connection closed");
                    return;
                }
                Exit::Dropped(reason) => reason,
            };

            warn!(namespace = N::NAME, connection = %conn.id, reason = %reason, "Connection lost");
            self.store.lock().clear_transient();
            self.bump();
            self.set_state(ConnectionState::Disconnected);

            match self.reconnect(&mut rx).await {
                Some(next) => conn = next,
                None => return,
            }
        }
    }

    /// Retry per the reconnection policy.
    ///
    /// Returns `None` when the budget is spent or the channel was closed.
    async fn reconnect(
        &self,
        rx: &mut mpsc::UnboundedReceiver<Control<N::Command>>,
    ) -> Option<Connection> {
        let policy = &self.options.reconnect;
        if !policy.enabled {
            return None;
        }

        for (attempt, delay) in policy.delays().enumerate() {
            self.set_state(ConnectionState::Connecting);
            metrics::record_reconnect_attempt(N::NAME);
            info!(
                namespace = N::NAME,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            let attempt_fut = async {
                tokio::time::sleep(delay).await;
                self.connector.connect(&self.options.url).await
            };

            let result = tokio::select! {
                result = attempt_fut => result,
                () = wait_for_close(rx) => {
                    debug!(namespace = N::NAME, "Reconnection cancelled");
                    return None;
                }
            };

            match result {
                Ok(mut conn) => match self.establish(&mut conn).await {
                    Ok(()) => return Some(conn),
                    Err(e) => warn!(namespace = N::NAME, error = %e, "Resync failed"),
                },
                Err(e) => {
                    warn!(
                        namespace = N::NAME,
                        attempt = attempt + 1,
                        error = %e,
                        "Reconnection failed"
                    );
                }
            }
        }

        error!(
            namespace = N::NAME,
            attempts = policy.max_attempts,
            "Giving up on reconnection"
        );
        metrics::record_error("reconnect");
        self.fail(format!(
            "Unable to reconnect after {} attempts",
            policy.max_attempts
        ));
        None
    }
}

/// Sleep until `deadline`, or forever without one.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolve once the channel is closed locally. Commands queued meanwhile
/// are dropped.
async fn wait_for_close<C: OutboundCommand>(rx: &mut mpsc::UnboundedReceiver<Control<C>>) {
    loop {
        match rx.recv().await {
            Some(Control::Emit(command)) => {
                warn!(command = command.name(), "Not connected, dropping command");
            }
            Some(Control::Close) | None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::ChatStore;
    use courier_protocol::codec::MAX_FRAME_SIZE;
    use courier_protocol::{ChatCommand, ChatEvent, ChatEventKind};
    use courier_transport::{
        memory_pair, MemoryConnector, MemoryPeer, MemoryServer, TransportError,
    };
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Probe;

    impl Namespace for Probe {
        type Event = ChatEvent;
        type Command = ChatCommand;
        type Store = ChatStore;

        const NAME: &'static str = "probe";

        fn bind(router: &mut EventRouter<ChatEvent, ChatStore>) {
            router.on(ChatEventKind::UserOnline, |event, store| {
                if let ChatEvent::UserOnline { user_id } = event {
                    store.user_online(*user_id);
                }
            });
            router.on(ChatEventKind::Error, |event, store| {
                if let ChatEvent::Error { message } = event {
                    store.record_error(message.clone());
                }
            });
        }

        fn resync(_store: &mut ChatStore) -> Vec<ChatCommand> {
            vec![ChatCommand::GetConversations]
        }
    }

    /// Connector whose handshake takes `delay`.
    struct SlowConnector {
        inner: MemoryConnector,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(&self, url: &Url) -> std::result::Result<Connection, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.inner.connect(url).await
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn slow_channel(delay: Duration) -> (Channel<Probe>, MemoryServer) {
        let (inner, server) = memory_pair();
        let options = ChannelOptions::new(
            "http://test",
            "/probe",
            1,
            Role::Customer,
            ReconnectPolicy::default(),
        )
        .unwrap();
        let connector = SlowConnector { inner, delay };
        (
            Channel::new(options, Arc::new(connector), ChatStore::new(1)),
            server,
        )
    }

    fn channel(reconnect: ReconnectPolicy) -> (Channel<Probe>, MemoryServer) {
        let (connector, server) = memory_pair();
        let options =
            ChannelOptions::new("http://test", "/probe", 1, Role::Customer, reconnect).unwrap();
        (
            Channel::new(options, Arc::new(connector), ChatStore::new(1)),
            server,
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn next_frame(peer: &mut MemoryPeer) -> String {
        tokio::time::timeout(Duration::from_secs(1), peer.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_sends_identity_and_resync() {
        let (channel, mut server) = channel(ReconnectPolicy::disabled());
        let states = channel.watch_state();

        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Connected);
        assert!(states.has_changed().unwrap());

        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.url().path(), "/probe");
        assert_eq!(peer.query("userId").as_deref(), Some("1"));
        assert_eq!(peer.query("role").as_deref(), Some("customer"));
        assert_eq!(next_frame(&mut peer).await, r#"{"event":"get-conversations"}"#);
    }

    #[tokio::test]
    async fn test_failed_connect_records_error() {
        let (channel, server) = channel(ReconnectPolicy::default());
        server.refuse_next(1);

        let result = channel.connect().await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.read(|s| s.error().is_some()));
        // A failed first attempt is not retried
        assert_eq!(server.attempts(), 1);
    }

    #[tokio::test]
    async fn test_emit_guard_when_disconnected() {
        let (channel, _server) = channel(ReconnectPolicy::disabled());
        let revision = *channel.watch_revision().borrow();

        let queued = channel.emit_with(
            ChatCommand::SendMessage {
                conversation_id: 42,
                message: "hi".into(),
                request_id: None,
            },
            |store| store.set_active(Some(42)),
        );

        assert!(queued.is_none());
        assert_eq!(channel.read(|s| s.active_conversation()), None);
        assert_eq!(*channel.watch_revision().borrow(), revision);
    }

    #[tokio::test]
    async fn test_inbound_events_reach_store() {
        let (channel, mut server) = channel(ReconnectPolicy::disabled());
        channel.connect().await.unwrap();
        let peer = server.accept().await.unwrap();
        let mut revisions = channel.watch_revision();
        revisions.borrow_and_update();

        peer.send(r#"{"event":"error","data":{"message":"Conversation not found"}}"#)
            .unwrap();
        revisions.changed().await.unwrap();

        assert_eq!(
            channel.read(|s| s.error().map(str::to_string)),
            Some("Conversation not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalid_frame_is_rejected() {
        let (channel, mut server) = channel(ReconnectPolicy::disabled());
        channel.connect().await.unwrap();
        let peer = server.accept().await.unwrap();

        // Non-positive id fails validation and never reaches the store
        peer.send(r#"{"event":"user-online","data":{"userId":0}}"#).unwrap();
        peer.send(r#"{"event":"nonsense"}"#).unwrap();
        peer.send(r#"{"event":"user-online","data":{"userId":5}}"#).unwrap();
        settle().await;

        assert_eq!(channel.read(|s| s.online().user_ids()), vec![5]);
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_clears_transient_state() {
        let (channel, mut server) = channel(ReconnectPolicy::default());
        channel.connect().await.unwrap();
        let peer = server.accept().await.unwrap();

        peer.send(r#"{"event":"user-online","data":{"userId":5}}"#).unwrap();
        settle().await;
        assert_eq!(channel.read(|s| s.online().count()), 1);

        channel.disconnect().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.read(|s| s.online().is_empty()));

        // Explicit disconnect never reconnects
        settle().await;
        assert_eq!(server.attempts(), 1);
        assert!(!channel.emit(ChatCommand::GetConversations));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_drop() {
        let (channel, mut server) = channel(ReconnectPolicy::default());
        channel.connect().await.unwrap();
        let mut first = server.accept().await.unwrap();
        next_frame(&mut first).await;

        server.refuse_next(1);
        first.close();

        // First retry after 1s is refused, second after 2s more succeeds
        let mut second = server.accept().await.unwrap();
        assert_eq!(server.attempts(), 3);
        assert_eq!(next_frame(&mut second).await, r#"{"event":"get-conversations"}"#);
        assert_eq!(channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebind_is_idempotent() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (channel, mut server) = channel(ReconnectPolicy::default());
        let counter = Arc::clone(&runs);
        channel.observe(ChatEventKind::UserOnline, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Drop and automatic reconnect, then a manual reconnect
        channel.connect().await.unwrap();
        let mut first = server.accept().await.unwrap();
        first.close();
        let _second = server.accept().await.unwrap();
        channel.disconnect().await;
        channel.connect().await.unwrap();
        let third = server.accept().await.unwrap();

        assert_eq!(channel.handler_count(ChatEventKind::UserOnline), 2);
        third
            .send(r#"{"event":"user-online","data":{"userId":9}}"#)
            .unwrap();
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(channel.read(|s| s.online().is_online(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        let (channel, mut server) = channel(policy);
        channel.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();

        server.refuse_next(2);
        peer.close();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(server.attempts(), 3);
        assert!(channel
            .read(|s| s.error().map(|e| e.contains("Unable to reconnect")))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn test_observer_survives_reconnect() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (channel, mut server) = channel(ReconnectPolicy::disabled());
        let counter = Arc::clone(&seen);
        channel.observe(ChatEventKind::UserOnline, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.connect().await.unwrap();
        channel.disconnect().await;
        channel.connect().await.unwrap();
        let _first = server.accept().await.unwrap();
        let second = server.accept().await.unwrap();

        second
            .send(r#"{"event":"user-online","data":{"userId":3}}"#)
            .unwrap();
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(channel.handler_count(ChatEventKind::UserOnline), 2);
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let (channel, mut server) = channel(ReconnectPolicy::default());
        channel.connect().await.unwrap();
        let _peer = server.accept().await.unwrap();
        channel.update(|s| s.set_active(Some(42)));

        channel.dispose().await;
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert_eq!(channel.read(|s| s.active_conversation()), None);
        assert!(matches!(channel.connect().await, Err(ClientError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_abandons_pending_connect() {
        let (channel, mut server) = slow_channel(Duration::from_millis(100));

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.state(), ConnectionState::Connecting);

        channel.disconnect().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(!channel.emit(ChatCommand::GetConversations));

        // The late connection is closed without any resync frame
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.recv().await, None);

        // A fresh connect still works
        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_pending_connect_stays_closed() {
        let (channel, _server) = slow_channel(Duration::from_millis(100));

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        channel.dispose().await;
        assert!(pending.await.unwrap().is_err());
        assert_eq!(channel.state(), ConnectionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_connects_open_one_connection() {
        let (channel, server) = slow_channel(Duration::from_millis(20));

        let attempts: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.connect().await })
            })
            .collect();
        for attempt in attempts {
            attempt.await.unwrap().unwrap();
        }

        assert_eq!(server.attempts(), 1);
        assert_eq!(channel.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected_without_dropping() {
        let (channel, mut server) = channel(ReconnectPolicy::default());
        channel.connect().await.unwrap();
        let peer = server.accept().await.unwrap();

        let padding = "x".repeat(MAX_FRAME_SIZE);
        let oversized = format!(r#"{{"event":"error","data":{{"message":"{padding}"}}}}"#);
        peer.send(oversized).unwrap();
        peer.send(r#"{"event":"user-online","data":{"userId":4}}"#).unwrap();
        settle().await;

        assert!(channel.is_connected());
        assert!(channel.read(|s| s.error().is_none()));
        assert!(channel.read(|s| s.online().is_online(4)));
        assert_eq!(server.attempts(), 1);
    }
}
