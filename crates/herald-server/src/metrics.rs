//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted total (counter).
pub const STOMP_CONNECTIONS_TOTAL: &str = "stomp_connections_total";
/// Connections closed total (counter).
pub const STOMP_DISCONNECTIONS_TOTAL: &str = "stomp_disconnections_total";
/// Live connections (gauge).
pub const STOMP_CONNECTIONS_ACTIVE: &str = "stomp_connections_active";
/// Rejected handshakes total (counter, labels: reason).
pub const STOMP_AUTH_FAILURES_TOTAL: &str = "stomp_auth_failures_total";
/// Inbound frames total (counter, labels: command).
pub const STOMP_FRAMES_RECEIVED_TOTAL: &str = "stomp_frames_received_total";
/// MESSAGE frames queued for delivery total (counter).
pub const STOMP_MESSAGES_DELIVERED_TOTAL: &str = "stomp_messages_delivered_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const STOMP_DELIVERY_DROPS_TOTAL: &str = "stomp_delivery_drops_total";
/// Connection lifetime in seconds (histogram).
pub const STOMP_CONNECTION_DURATION_SECONDS: &str = "stomp_connection_duration_seconds";
