//! Frames of the driver tracking namespace.
//!
//! Drivers receive order requests and stream their position; customers
//! follow the driver assigned to their order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{ensure_id, ProtocolError, Validate};
use crate::event::{InboundEvent, OutboundCommand};
use crate::models::{OrderId, UserId};

/// Default namespace path of the tracking channel.
pub const TRACKING_NAMESPACE: &str = "/tracking";

fn ensure_coordinates(latitude: f64, longitude: f64) -> Result<(), ProtocolError> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(ProtocolError::invalid(format!(
            "coordinates ({latitude}, {longitude}) out of range"
        )));
    }
    Ok(())
}

/// A device position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl Location {
    /// Create a location without heading or speed.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            heading: None,
            speed: None,
        }
    }
}

impl Validate for Location {
    fn validate(&self) -> Result<(), ProtocolError> {
        ensure_coordinates(self.latitude, self.longitude)
    }
}

/// An order offered to a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub restaurant_name: String,
    pub pickup_address: String,
    pub delivery_address: String,
    pub delivery_fee: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    /// Server-imposed answer window; the client default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u32>,
}

impl Validate for OrderRequest {
    fn validate(&self) -> Result<(), ProtocolError> {
        ensure_id("request.orderId", self.order_id)?;
        if self.delivery_fee < 0.0 {
            return Err(ProtocolError::invalid(format!(
                "order {} has a negative delivery fee",
                self.order_id
            )));
        }
        if self.expires_in_seconds == Some(0) {
            return Err(ProtocolError::invalid(format!(
                "order {} request already expired",
                self.order_id
            )));
        }
        Ok(())
    }
}

/// Position of the driver delivering an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    pub order_id: OrderId,
    pub driver_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl Validate for DriverLocation {
    fn validate(&self) -> Result<(), ProtocolError> {
        ensure_id("orderId", self.order_id)?;
        ensure_id("driverId", self.driver_id)?;
        ensure_coordinates(self.latitude, self.longitude)
    }
}

/// Lifecycle of an order as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    ReadyForPickup,
    PickedUp,
    OnTheWay,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether no further updates are expected.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Commands sent on the tracking channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum TrackingCommand {
    /// Driver availability toggle.
    DriverStatus { is_online: bool },
    /// Driver position report.
    UpdateLocation(Location),
    /// Accept an offered order.
    AcceptOrder { order_id: OrderId },
    /// Decline an offered order.
    RejectOrder { order_id: OrderId },
    /// Start following the driver of an order.
    TrackOrder { order_id: OrderId },
    /// Stop following an order.
    StopTracking { order_id: OrderId },
}

impl OutboundCommand for TrackingCommand {
    fn name(&self) -> &'static str {
        match self {
            TrackingCommand::DriverStatus { .. } => "driver-status",
            TrackingCommand::UpdateLocation(_) => "update-location",
            TrackingCommand::AcceptOrder { .. } => "accept-order",
            TrackingCommand::RejectOrder { .. } => "reject-order",
            TrackingCommand::TrackOrder { .. } => "track-order",
            TrackingCommand::StopTracking { .. } => "stop-tracking",
        }
    }
}

/// Event kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingEventKind {
    NewOrderRequest,
    OrderRequestCancelled,
    OrderAccepted,
    DriverLocation,
    OrderStatus,
    Error,
}

/// Events pushed on the tracking channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum TrackingEvent {
    /// An order is offered to this driver.
    NewOrderRequest { request: OrderRequest },
    /// An offer was withdrawn (taken by another driver or cancelled).
    OrderRequestCancelled { order_id: OrderId },
    /// The backend assigned the order to this driver.
    OrderAccepted { order_id: OrderId },
    /// Position of the driver of a tracked order.
    DriverLocation(DriverLocation),
    /// Status change of a tracked order.
    OrderStatus { order_id: OrderId, status: OrderStatus },
    /// Backend-reported error.
    Error { message: String },
}

impl InboundEvent for TrackingEvent {
    type Kind = TrackingEventKind;

    fn kind(&self) -> TrackingEventKind {
        match self {
            TrackingEvent::NewOrderRequest { .. } => TrackingEventKind::NewOrderRequest,
            TrackingEvent::OrderRequestCancelled { .. } => TrackingEventKind::OrderRequestCancelled,
            TrackingEvent::OrderAccepted { .. } => TrackingEventKind::OrderAccepted,
            TrackingEvent::DriverLocation(_) => TrackingEventKind::DriverLocation,
            TrackingEvent::OrderStatus { .. } => TrackingEventKind::OrderStatus,
            TrackingEvent::Error { .. } => TrackingEventKind::Error,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TrackingEvent::NewOrderRequest { .. } => "new-order-request",
            TrackingEvent::OrderRequestCancelled { .. } => "order-request-cancelled",
            TrackingEvent::OrderAccepted { .. } => "order-accepted",
            TrackingEvent::DriverLocation(_) => "driver-location",
            TrackingEvent::OrderStatus { .. } => "order-status",
            TrackingEvent::Error { .. } => "error",
        }
    }
}

impl Validate for TrackingEvent {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            TrackingEvent::NewOrderRequest { request } => request.validate(),
            TrackingEvent::OrderRequestCancelled { order_id }
            | TrackingEvent::OrderAccepted { order_id }
            | TrackingEvent::OrderStatus { order_id, .. } => ensure_id("orderId", *order_id),
            TrackingEvent::DriverLocation(location) => location.validate(),
            TrackingEvent::Error { .. } => Ok(()),
        }
    }
}
