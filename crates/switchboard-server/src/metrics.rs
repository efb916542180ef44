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

/// Connections that completed a handshake (counter).
pub const HUB_CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Connections ended (counter, labels: reason).
pub const HUB_DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Open connections (gauge).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Connection lifetime seconds (histogram).
pub const HUB_CONNECTION_DURATION_SECONDS: &str = "hub_connection_duration_seconds";
/// Handshakes refused (counter, labels: reason).
pub const HUB_HANDSHAKE_FAILURES_TOTAL: &str = "hub_handshake_failures_total";
/// Hub method invocations (counter, labels: method).
pub const HUB_INVOCATIONS_TOTAL: &str = "hub_invocations_total";
/// Hub method failures (counter, labels: method, `error_kind`).
pub const HUB_INVOCATION_ERRORS_TOTAL: &str = "hub_invocation_errors_total";
/// Hub method duration seconds (histogram, labels: method).
pub const HUB_INVOCATION_DURATION_SECONDS: &str = "hub_invocation_duration_seconds";
/// Fatal protocol errors (counter, labels: kind).
pub const HUB_PROTOCOL_ERRORS_TOTAL: &str = "hub_protocol_errors_total";
/// Messages written to transports (counter, labels: type).
pub const HUB_MESSAGES_SENT_TOTAL: &str = "hub_messages_sent_total";
/// Messages read from transports (counter, labels: type).
pub const HUB_MESSAGES_RECEIVED_TOTAL: &str = "hub_messages_received_total";
