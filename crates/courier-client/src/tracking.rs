//! Delivery tracking session.
//!
//! Drivers go online, receive order requests one at a time with a
//! countdown, answer them, and report their position periodically. An
//! unanswered request is declined automatically when its countdown runs
//! out. Customers use the same channel to follow the driver of an order.

use async_trait::async_trait;
use courier_core::{EventRouter, SessionStore, TrackingStore};
use courier_protocol::{
    Location, OrderId, OrderRequest, Role, TrackingCommand, TrackingEvent, TrackingEventKind,
    UserId, Validate,
};
use courier_transport::Connector;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelOptions, ConnectionState, Namespace};
use crate::config::ClientConfig;
use crate::error::Result;

/// Errors reported by a location provider.
#[derive(Debug, Error)]
pub enum LocationError {
    /// The user denied location access.
    #[error("Location permission denied")]
    PermissionDenied,

    /// No position could be obtained.
    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

/// Source of the device position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Get the current position.
    async fn current_location(&self) -> std::result::Result<Location, LocationError>;
}

/// A provider that always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> std::result::Result<Location, LocationError> {
        Ok(self.0)
    }
}

/// The tracking namespace.
#[derive(Debug)]
pub struct TrackingNamespace;

impl Namespace for TrackingNamespace {
    type Event = TrackingEvent;
    type Command = TrackingCommand;
    type Store = TrackingStore;

    const NAME: &'static str = "tracking";

    fn bind(router: &mut EventRouter<TrackingEvent, TrackingStore>) {
        router.on(TrackingEventKind::NewOrderRequest, |event, store| {
            if let TrackingEvent::NewOrderRequest { request } = event {
                if store.offer(request.clone(), Instant::now()) {
                    info!(order = request.order_id, "New order request");
                }
            }
        });

        router.on(TrackingEventKind::OrderRequestCancelled, |event, store| {
            if let TrackingEvent::OrderRequestCancelled { order_id } = event {
                if store.withdraw(*order_id, Instant::now()).is_some() {
                    info!(order = order_id, "Order request withdrawn");
                }
            }
        });

        router.on(TrackingEventKind::OrderAccepted, |event, store| {
            if let TrackingEvent::OrderAccepted { order_id } = event {
                store.assign(*order_id, Instant::now());
            }
        });

        router.on(TrackingEventKind::DriverLocation, |event, store| {
            if let TrackingEvent::DriverLocation(location) = event {
                if !store.update_driver_location(location.clone()) {
                    debug!(order = location.order_id, "Stale driver location ignored");
                }
            }
        });

        router.on(TrackingEventKind::OrderStatus, |event, store| {
            if let TrackingEvent::OrderStatus { order_id, status } = event {
                store.set_order_status(*order_id, *status);
            }
        });

        router.on(TrackingEventKind::Error, |event, store| {
            if let TrackingEvent::Error { message } = event {
                store.record_error(message.clone());
            }
        });
    }

    fn resync(store: &mut TrackingStore) -> Vec<TrackingCommand> {
        let mut commands = Vec::new();
        if store.is_online() {
            commands.push(TrackingCommand::DriverStatus { is_online: true });
        }
        commands.extend(
            store
                .tracked_orders()
                .into_iter()
                .map(|order_id| TrackingCommand::TrackOrder { order_id }),
        );
        commands
    }

    fn tick(store: &mut TrackingStore, now: Instant) -> Vec<TrackingCommand> {
        store
            .expire_requests(now)
            .into_iter()
            .map(|order_id| {
                info!(order = order_id, "Order request expired, declining");
                TrackingCommand::RejectOrder { order_id }
            })
            .collect()
    }
}

/// A tracking session.
///
/// Drivers use the dispatch methods; customers use [`DriverTracker::track_order`].
#[derive(Debug, Clone)]
pub struct DriverTracker {
    channel: Channel<TrackingNamespace>,
    location_interval: Duration,
    location_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DriverTracker {
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
            &config.tracking.namespace,
            user_id,
            role,
            config.reconnect.policy(),
        )?;
        let store =
            TrackingStore::with_request_window(user_id, config.tracking.order_request_window());

        Ok(Self {
            channel: Channel::new(options, connector, store),
            location_interval: config.tracking.location_interval(),
            location_task: Arc::new(Mutex::new(None)),
        })
    }

    #[must_use]
    pub fn channel(&self) -> &Channel<TrackingNamespace> {
        &self.channel
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    #[must_use]
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.channel.watch_revision()
    }

    /// Read the session state.
    pub fn read<R>(&self, f: impl FnOnce(&TrackingStore) -> R) -> R {
        self.channel.read(f)
    }

    /// Connect to the tracking namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was disposed or the connection failed.
    pub async fn connect(&self) -> Result<()> {
        self.channel.connect().await
    }

    /// Stop location updates and disconnect.
    pub async fn disconnect(&self) {
        self.stop_location_updates();
        self.channel.disconnect().await;
    }

    /// End the session on logout.
    pub async fn dispose(&self) {
        self.stop_location_updates();
        self.channel.dispose().await;
    }

    /// Start receiving order requests.
    pub fn go_online(&self) {
        self.channel
            .emit_with(TrackingCommand::DriverStatus { is_online: true }, |store| {
                store.set_online(true);
            });
    }

    /// Stop receiving order requests. Pending requests are dropped.
    pub fn go_offline(&self) {
        self.channel
            .emit_with(TrackingCommand::DriverStatus { is_online: false }, |store| {
                store.set_online(false);
            });
    }

    /// Get the request on screen and its whole seconds left.
    #[must_use]
    pub fn current_request(&self) -> Option<(OrderRequest, u64)> {
        let now = Instant::now();
        self.read(|store| {
            let requests = store.requests();
            let request = requests.current()?.clone();
            Some((request, requests.remaining_secs(now).unwrap_or(0)))
        })
    }

    /// Accept a pending order request.
    ///
    /// Returns `false` if the order was not pending or nothing was sent.
    pub fn accept_order(&self, order_id: OrderId) -> bool {
        self.answer(TrackingCommand::AcceptOrder { order_id }, order_id)
    }

    /// Decline a pending order request.
    pub fn reject_order(&self, order_id: OrderId) -> bool {
        self.answer(TrackingCommand::RejectOrder { order_id }, order_id)
    }

    fn answer(&self, command: TrackingCommand, order_id: OrderId) -> bool {
        if !self.read(|store| store.requests().contains(order_id)) {
            warn!(order = order_id, "No pending request for order");
            return false;
        }
        self.channel
            .emit_with(command, |store| store.answer(order_id, Instant::now()))
            .is_some()
    }

    /// Follow the driver of an order.
    pub fn track_order(&self, order_id: OrderId) {
        self.channel
            .emit_with(TrackingCommand::TrackOrder { order_id }, |store| {
                store.track(order_id)
            });
    }

    /// Stop following an order.
    pub fn stop_tracking(&self, order_id: OrderId) {
        self.channel
            .emit_with(TrackingCommand::StopTracking { order_id }, |store| {
                store.untrack(order_id)
            });
    }

    /// Report the position every location interval while connected and
    /// online. Replaces a running reporter.
    pub fn start_location_updates(&self, provider: Arc<dyn LocationProvider>) {
        let task = tokio::spawn(report_locations(
            self.channel.clone(),
            provider,
            self.location_interval,
        ));
        if let Some(previous) = self.location_task.lock().replace(task) {
            previous.abort();
        }
        debug!(
            interval_ms = self.location_interval.as_millis() as u64,
            "Location updates started"
        );
    }

    pub fn stop_location_updates(&self) {
        if let Some(task) = self.location_task.lock().take() {
            task.abort();
            debug!("Location updates stopped");
        }
    }
}

async fn report_locations(
    channel: Channel<TrackingNamespace>,
    provider: Arc<dyn LocationProvider>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if channel.state() == ConnectionState::Closed {
            return;
        }
        if !channel.is_connected() || !channel.read(TrackingStore::is_online) {
            continue;
        }

        let location = match provider.current_location().await {
            Ok(location) => location,
            Err(LocationError::PermissionDenied) => {
                warn!("Location permission denied, skipping update");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Failed to get location");
                continue;
            }
        };

        if let Err(e) = location.validate() {
            warn!(error = %e, "Provider returned an invalid location");
            continue;
        }

        channel.emit_with(TrackingCommand::UpdateLocation(location), |store| {
            store.record_location(location);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use courier_protocol::{codec, DriverLocation, OrderStatus};
    use courier_transport::{memory_pair, MemoryPeer, MemoryServer};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DRIVER: UserId = 7;

    fn tracker(role: Role) -> (DriverTracker, MemoryServer) {
        let (connector, server) = memory_pair();
        let mut config = ClientConfig::default();
        config.server_url = "http://test".into();
        config.reconnect.enabled = false;
        let tracker = DriverTracker::new(&config, DRIVER, role, Arc::new(connector)).unwrap();
        (tracker, server)
    }

    async fn online() -> (DriverTracker, MemoryPeer, MemoryServer) {
        let (tracker, mut server) = tracker(Role::Driver);
        tracker.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();
        tracker.go_online();
        assert_eq!(
            next(&mut peer).await,
            json!({ "event": "driver-status", "data": { "isOnline": true } })
        );
        (tracker, peer, server)
    }

    async fn next(peer: &mut MemoryPeer) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(60), peer.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn push(tracker: &DriverTracker, peer: &MemoryPeer, event: &TrackingEvent) {
        let mut revisions = tracker.watch_revision();
        revisions.borrow_and_update();
        peer.send(codec::encode(event).unwrap()).unwrap();
        revisions.changed().await.unwrap();
    }

    fn request(order_id: OrderId) -> TrackingEvent {
        TrackingEvent::NewOrderRequest {
            request: OrderRequest {
                order_id,
                restaurant_name: "Pho 24".into(),
                pickup_address: "1 Market St".into(),
                delivery_address: "9 Elm St".into(),
                delivery_fee: 3.5,
                distance_km: Some(2.1),
                expires_in_seconds: None,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_countdown_and_auto_reject() {
        let (tracker, mut peer, _server) = online().await;

        push(&tracker, &peer, &request(100)).await;
        push(&tracker, &peer, &request(101)).await;

        let (current, secs) = tracker.current_request().unwrap();
        assert_eq!(current.order_id, 100);
        assert_eq!(secs, 30);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.current_request().unwrap().1, 20);

        assert_eq!(
            next(&mut peer).await,
            json!({ "event": "reject-order", "data": { "orderId": 100 } })
        );

        // The queued request starts its own countdown once shown
        let (current, secs) = tracker.current_request().unwrap();
        assert_eq!(current.order_id, 101);
        assert_eq!(secs, 30);
    }

    #[tokio::test]
    async fn test_accept_order() {
        let (tracker, mut peer, _server) = online().await;
        push(&tracker, &peer, &request(100)).await;

        assert!(tracker.accept_order(100));
        assert_eq!(
            next(&mut peer).await,
            json!({ "event": "accept-order", "data": { "orderId": 100 } })
        );
        assert!(tracker.current_request().is_none());

        push(&tracker, &peer, &TrackingEvent::OrderAccepted { order_id: 100 }).await;
        assert_eq!(tracker.read(|s| s.active_orders().to_vec()), vec![100]);

        push(
            &tracker,
            &peer,
            &TrackingEvent::OrderStatus {
                order_id: 100,
                status: OrderStatus::Delivered,
            },
        )
        .await;
        assert!(tracker.read(|s| s.active_orders().is_empty()));
    }

    #[tokio::test]
    async fn test_answer_unknown_order() {
        let (tracker, mut peer, _server) = online().await;
        assert!(!tracker.reject_order(999));
        tokio::task::yield_now().await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_withdrawn() {
        let (tracker, peer, _server) = online().await;
        push(&tracker, &peer, &request(100)).await;
        push(&tracker, &peer, &TrackingEvent::OrderRequestCancelled { order_id: 100 }).await;
        assert!(tracker.current_request().is_none());
    }

    #[tokio::test]
    async fn test_offline_ignores_requests() {
        let (tracker, mut server) = tracker(Role::Driver);
        tracker.connect().await.unwrap();
        let peer = server.accept().await.unwrap();

        push(&tracker, &peer, &request(100)).await;
        assert!(tracker.current_request().is_none());
    }

    struct Denied(AtomicUsize);

    #[async_trait]
    impl LocationProvider for Denied {
        async fn current_location(&self) -> std::result::Result<Location, LocationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(LocationError::PermissionDenied)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_updates() {
        let (tracker, mut peer, _server) = online().await;
        tracker.start_location_updates(Arc::new(FixedLocation(Location::new(10.77, 106.7))));

        let first = next(&mut peer).await;
        assert_eq!(first["event"], "update-location");
        assert_eq!(first["data"]["latitude"], 10.77);

        // Next report one interval later
        let start = Instant::now();
        next(&mut peer).await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(tracker.read(|s| s.last_reported()), Some(Location::new(10.77, 106.7)));

        tracker.stop_location_updates();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_permission_denied_is_skipped() {
        let (tracker, mut peer, _server) = online().await;
        let provider = Arc::new(Denied(AtomicUsize::new(0)));
        tracker.start_location_updates(Arc::clone(&provider) as Arc<dyn LocationProvider>);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(provider.0.load(Ordering::SeqCst), 3);
        assert!(peer.drain().is_empty());
        assert_eq!(tracker.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_location_while_offline() {
        let (tracker, mut server) = tracker(Role::Driver);
        tracker.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();
        tracker.start_location_updates(Arc::new(FixedLocation(Location::new(1.0, 1.0))));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_customer_tracks_order() {
        let (tracker, mut server) = tracker(Role::Customer);
        tracker.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.query("role").as_deref(), Some("customer"));

        tracker.track_order(55);
        assert_eq!(
            next(&mut peer).await,
            json!({ "event": "track-order", "data": { "orderId": 55 } })
        );

        let at = |secs: u32| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap();
        let location = |secs: u32| DriverLocation {
            order_id: 55,
            driver_id: DRIVER,
            latitude: 10.0,
            longitude: 106.0 + f64::from(secs) / 100.0,
            updated_at: at(secs),
        };
        push(&tracker, &peer, &TrackingEvent::DriverLocation(location(5))).await;
        push(&tracker, &peer, &TrackingEvent::DriverLocation(location(3))).await;
        assert_eq!(
            tracker.read(|s| s.driver_location(55).map(|l| l.updated_at)),
            Some(at(5))
        );

        tracker.stop_tracking(55);
        assert_eq!(next(&mut peer).await["event"], "stop-tracking");
        assert!(tracker.read(|s| s.driver_location(55).is_none()));
    }

    #[tokio::test]
    async fn test_resync_restores_status_and_tracking() {
        let (tracker, mut peer, mut server) = online().await;
        tracker.track_order(55);
        next(&mut peer).await;

        tracker.disconnect().await;
        tracker.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();

        assert_eq!(next(&mut peer).await["event"], "driver-status");
        assert_eq!(
            next(&mut peer).await,
            json!({ "event": "track-order", "data": { "orderId": 55 } })
        );
    }
}
