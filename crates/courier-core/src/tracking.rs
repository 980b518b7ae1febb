//! Driver tracking state.
//!
//! Drivers see one order request at a time with a countdown; requests that
//! arrive while another is shown wait in a queue and start their own
//! countdown once they reach the front. Customers keep the latest driver
//! position and status of the orders they follow.

use crate::state::SessionStore;
use courier_protocol::{DriverLocation, Location, OrderId, OrderRequest, OrderStatus, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default answer window of an order request.
pub const DEFAULT_REQUEST_WINDOW: Duration = Duration::from_secs(30);

/// An order request waiting for the driver's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request: OrderRequest,
    /// Set once the request is at the front of the queue.
    pub deadline: Option<Instant>,
}

/// Queue of order requests with a countdown on its head.
#[derive(Debug)]
pub struct OrderRequestQueue {
    queue: VecDeque<PendingRequest>,
    window: Duration,
}

impl OrderRequestQueue {
    /// Create an empty queue with a default answer window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            window,
        }
    }

    /// Enqueue a request.
    ///
    /// Returns `false` if a request for the same order is already queued.
    pub fn push(&mut self, request: OrderRequest, now: Instant) -> bool {
        if self.contains(request.order_id) {
            return false;
        }
        self.queue.push_back(PendingRequest {
            request,
            deadline: None,
        });
        self.arm_head(now);
        true
    }

    /// Check whether an order is queued.
    #[must_use]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.queue.iter().any(|p| p.request.order_id == order_id)
    }

    /// Get the request currently shown.
    #[must_use]
    pub fn current(&self) -> Option<&OrderRequest> {
        self.queue.front().map(|p| &p.request)
    }

    /// Get the whole seconds left on the current request, rounded up.
    #[must_use]
    pub fn remaining_secs(&self, now: Instant) -> Option<u64> {
        let deadline = self.queue.front()?.deadline?;
        let left = deadline.saturating_duration_since(now);
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        Some(secs)
    }

    /// Remove a request, whether shown or waiting.
    pub fn take(&mut self, order_id: OrderId, now: Instant) -> Option<OrderRequest> {
        let pos = self
            .queue
            .iter()
            .position(|p| p.request.order_id == order_id)?;
        let removed = self.queue.remove(pos).map(|p| p.request);
        self.arm_head(now);
        removed
    }

    /// Drop requests whose countdown ran out.
    ///
    /// Returns the expired order ids in expiry order.
    pub fn expire(&mut self, now: Instant) -> Vec<OrderId> {
        let mut expired = Vec::new();
        while let Some(head) = self.queue.front() {
            match head.deadline {
                Some(deadline) if deadline <= now => {
                    expired.push(head.request.order_id);
                    self.queue.pop_front();
                    self.arm_head(now);
                }
                _ => break,
            }
        }
        expired
    }

    /// Get the deadline of the current request.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.queue.front().and_then(|p| p.deadline)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    fn arm_head(&mut self, now: Instant) {
        let window = self.window;
        if let Some(head) = self.queue.front_mut() {
            if head.deadline.is_none() {
                let secs = head.request.expires_in_seconds.map(u64::from);
                head.deadline = Some(now + secs.map_or(window, Duration::from_secs));
                debug!(order = head.request.order_id, "Order request countdown started");
            }
        }
    }
}

impl Default for OrderRequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_WINDOW)
    }
}

/// Tracking session state.
#[derive(Debug)]
pub struct TrackingStore {
    user_id: UserId,
    request_window: Duration,
    online: bool,
    requests: OrderRequestQueue,
    active_orders: Vec<OrderId>,
    tracked_orders: HashSet<OrderId>,
    driver_locations: HashMap<OrderId, DriverLocation>,
    order_statuses: HashMap<OrderId, OrderStatus>,
    last_reported: Option<Location>,
    error: Option<String>,
}

impl TrackingStore {
    /// Create an empty store for the authenticated user.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self::with_request_window(user_id, DEFAULT_REQUEST_WINDOW)
    }

    /// Create an empty store with a custom order request window.
    #[must_use]
    pub fn with_request_window(user_id: UserId, window: Duration) -> Self {
        Self {
            user_id,
            request_window: window,
            online: false,
            requests: OrderRequestQueue::new(window),
            active_orders: Vec::new(),
            tracked_orders: HashSet::new(),
            driver_locations: HashMap::new(),
            order_statuses: HashMap::new(),
            last_reported: None,
            error: None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Whether the driver wants to receive order requests.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    #[must_use]
    pub fn requests(&self) -> &OrderRequestQueue {
        &self.requests
    }

    #[must_use]
    pub fn active_orders(&self) -> &[OrderId] {
        &self.active_orders
    }

    #[must_use]
    pub fn is_tracking(&self, order_id: OrderId) -> bool {
        self.tracked_orders.contains(&order_id)
    }

    /// Get the followed orders, sorted.
    #[must_use]
    pub fn tracked_orders(&self) -> Vec<OrderId> {
        let mut ids: Vec<_> = self.tracked_orders.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn driver_location(&self, order_id: OrderId) -> Option<&DriverLocation> {
        self.driver_locations.get(&order_id)
    }

    #[must_use]
    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.order_statuses.get(&order_id).copied()
    }

    #[must_use]
    pub fn last_reported(&self) -> Option<Location> {
        self.last_reported
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
        if !online {
            self.requests.clear();
        }
    }

    /// Queue an incoming order request.
    ///
    /// Requests are ignored while the driver is offline.
    pub fn offer(&mut self, request: OrderRequest, now: Instant) -> bool {
        if !self.online {
            debug!(order = request.order_id, "Order request ignored while offline");
            return false;
        }
        self.requests.push(request, now)
    }

    /// Remove a request withdrawn by the server.
    pub fn withdraw(&mut self, order_id: OrderId, now: Instant) -> Option<OrderRequest> {
        self.requests.take(order_id, now)
    }

    /// Remove a request the driver answered.
    pub fn answer(&mut self, order_id: OrderId, now: Instant) -> Option<OrderRequest> {
        self.requests.take(order_id, now)
    }

    /// Drop requests whose countdown ran out.
    pub fn expire_requests(&mut self, now: Instant) -> Vec<OrderId> {
        self.requests.expire(now)
    }

    /// Record that the backend assigned an order to this driver.
    pub fn assign(&mut self, order_id: OrderId, now: Instant) {
        self.requests.take(order_id, now);
        if !self.active_orders.contains(&order_id) {
            self.active_orders.push(order_id);
        }
    }

    pub fn track(&mut self, order_id: OrderId) -> bool {
        self.tracked_orders.insert(order_id)
    }

    pub fn untrack(&mut self, order_id: OrderId) -> bool {
        self.driver_locations.remove(&order_id);
        self.tracked_orders.remove(&order_id)
    }

    /// Store a driver position, ignoring reports older than the current one.
    pub fn update_driver_location(&mut self, location: DriverLocation) -> bool {
        match self.driver_locations.get(&location.order_id) {
            Some(current) if current.updated_at > location.updated_at => false,
            _ => {
                self.driver_locations.insert(location.order_id, location);
                true
            }
        }
    }

    /// Store an order status. Final statuses end the order's active state.
    pub fn set_order_status(&mut self, order_id: OrderId, status: OrderStatus) {
        self.order_statuses.insert(order_id, status);
        if status.is_final() {
            self.active_orders.retain(|id| *id != order_id);
        }
    }

    pub fn record_location(&mut self, location: Location) {
        self.last_reported = Some(location);
    }
}

impl SessionStore for TrackingStore {
    fn record_error(&mut self, message: String) {
        self.error = Some(message);
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn clear_transient(&mut self) {
        self.requests.clear();
    }

    fn clear(&mut self) {
        *self = Self::with_request_window(self.user_id, self.request_window);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.requests.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn request(order_id: OrderId) -> OrderRequest {
        OrderRequest {
            order_id,
            restaurant_name: "Pho 24".into(),
            pickup_address: "1 Main St".into(),
            delivery_address: "2 Side St".into(),
            delivery_fee: 3.5,
            distance_km: Some(2.1),
            expires_in_seconds: None,
        }
    }

    fn online_store() -> TrackingStore {
        let mut store = TrackingStore::new(3);
        store.set_online(true);
        store
    }

    #[test]
    fn test_countdown_runs_on_head_only() {
        let start = Instant::now();
        let mut queue = OrderRequestQueue::default();

        assert!(queue.push(request(1), start));
        assert!(queue.push(request(2), start + Duration::from_secs(10)));
        assert!(!queue.push(request(1), start));

        assert_eq!(queue.remaining_secs(start + Duration::from_secs(10)), Some(20));
        assert_eq!(queue.current().map(|r| r.order_id), Some(1));

        // Head expires; the next request gets a fresh window from now
        let expiry = start + DEFAULT_REQUEST_WINDOW;
        assert_eq!(queue.expire(expiry), vec![1]);
        assert_eq!(queue.current().map(|r| r.order_id), Some(2));
        assert_eq!(queue.remaining_secs(expiry), Some(30));
    }

    #[test]
    fn test_remaining_rounds_up() {
        let start = Instant::now();
        let mut queue = OrderRequestQueue::default();
        queue.push(request(1), start);

        assert_eq!(queue.remaining_secs(start + Duration::from_millis(100)), Some(30));
        assert_eq!(queue.remaining_secs(start + Duration::from_secs(31)), Some(0));
    }

    #[test]
    fn test_server_window_overrides_default() {
        let start = Instant::now();
        let mut queue = OrderRequestQueue::default();
        let mut req = request(1);
        req.expires_in_seconds = Some(15);
        queue.push(req, start);

        assert_eq!(queue.deadline(), Some(start + Duration::from_secs(15)));
    }

    #[test]
    fn test_answer_advances_queue() {
        let start = Instant::now();
        let mut store = online_store();
        store.offer(request(1), start);
        store.offer(request(2), start);

        assert!(store.answer(1, start + Duration::from_secs(5)).is_some());
        assert_eq!(store.requests().current().map(|r| r.order_id), Some(2));
        assert_eq!(
            store.next_deadline(),
            Some(start + Duration::from_secs(5) + DEFAULT_REQUEST_WINDOW)
        );
    }

    #[test]
    fn test_offline_driver_ignores_requests() {
        let mut store = TrackingStore::new(3);
        assert!(!store.offer(request(1), Instant::now()));
        assert!(store.requests().is_empty());
    }

    #[test]
    fn test_assignment_and_final_status() {
        let now = Instant::now();
        let mut store = online_store();
        store.offer(request(1), now);
        store.assign(1, now);

        assert!(store.requests().is_empty());
        assert_eq!(store.active_orders(), &[1]);

        store.set_order_status(1, OrderStatus::Delivered);
        assert!(store.active_orders().is_empty());
        assert_eq!(store.order_status(1), Some(OrderStatus::Delivered));
    }

    #[test]
    fn test_stale_driver_location_is_ignored() {
        let mut store = TrackingStore::new(5);
        store.track(9);
        let fresh = DriverLocation {
            order_id: 9,
            driver_id: 3,
            latitude: 10.0,
            longitude: 20.0,
            updated_at: Utc.timestamp_opt(1_714_557_700, 0).unwrap(),
        };
        let stale = DriverLocation {
            latitude: 11.0,
            updated_at: Utc.timestamp_opt(1_714_557_600, 0).unwrap(),
            ..fresh.clone()
        };

        assert!(store.update_driver_location(fresh));
        assert!(!store.update_driver_location(stale));
        assert_eq!(store.driver_location(9).map(|l| l.latitude), Some(10.0));

        store.untrack(9);
        assert!(store.driver_location(9).is_none());
    }
}
