//! Metrics collection and export for Courier sessions.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "courier_reconnect_attempts_total";
    pub const EVENTS_TOTAL: &str = "courier_events_total";
    pub const COMMANDS_TOTAL: &str = "courier_commands_total";
    pub const COMMANDS_BYTES: &str = "courier_commands_bytes";
    pub const COMMANDS_DROPPED_TOTAL: &str = "courier_commands_dropped_total";
    pub const FRAMES_REJECTED_TOTAL: &str = "courier_frames_rejected_total";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of established connections"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(
        names::RECONNECT_ATTEMPTS_TOTAL,
        "Total number of reconnection attempts"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of inbound events applied");
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Total number of commands sent");
    metrics::describe_counter!(names::COMMANDS_BYTES, "Total bytes of commands sent");
    metrics::describe_counter!(
        names::COMMANDS_DROPPED_TOTAL,
        "Total number of commands dropped while not connected"
    );
    metrics::describe_counter!(
        names::FRAMES_REJECTED_TOTAL,
        "Total number of inbound frames that failed to decode or validate"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Expose metrics for scraping on the loopback interface.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or a recorder is already
/// installed.
pub fn start_metrics_server(port: u16) -> Result<SocketAddr, BuildError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!(%addr, "Prometheus exporter started");
    Ok(addr)
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt(namespace: &'static str) {
    counter!(names::RECONNECT_ATTEMPTS_TOTAL, "namespace" => namespace).increment(1);
}

/// Record an applied inbound event.
pub fn record_event(namespace: &'static str, event: &'static str) {
    counter!(names::EVENTS_TOTAL, "namespace" => namespace, "event" => event).increment(1);
}

/// Record a sent command.
pub fn record_command(namespace: &'static str, command: &'static str, bytes: usize) {
    counter!(names::COMMANDS_TOTAL, "namespace" => namespace, "command" => command).increment(1);
    counter!(names::COMMANDS_BYTES, "namespace" => namespace).increment(bytes as u64);
}

/// Record a command dropped by the connection guard.
pub fn record_dropped_command(namespace: &'static str, command: &'static str) {
    counter!(names::COMMANDS_DROPPED_TOTAL, "namespace" => namespace, "command" => command)
        .increment(1);
}

/// Record an inbound frame that failed to decode.
pub fn record_rejected_frame(namespace: &'static str) {
    counter!(names::FRAMES_REJECTED_TOTAL, "namespace" => namespace).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records a connection and its end on drop.
pub struct ConnectionMetricsGuard {
    namespace: &'static str,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(namespace: &'static str) -> Self {
        counter!(names::CONNECTIONS_TOTAL, "namespace" => namespace).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE, "namespace" => namespace).increment(1.0);
        Self { namespace }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE, "namespace" => self.namespace).decrement(1.0);
    }
}
