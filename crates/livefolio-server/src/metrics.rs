//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::ServerError;

/// Install the Prometheus recorder as the global metrics recorder.
///
/// Returns the handle that renders `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle that is not installed globally, for tests and embedding.
pub fn local_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because the server is at capacity (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Inbound frames dropped as malformed or unexpected (counter, labels: reason).
pub const WS_INBOUND_DROPPED_TOTAL: &str = "ws_inbound_dropped_total";
/// Subscribe requests accepted (counter).
pub const SUBSCRIPTIONS_TOTAL: &str = "subscriptions_total";
/// Broadcasts to a user with at least one connection (counter).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Frames queued on connections by broadcasts (counter).
pub const DELIVERIES_TOTAL: &str = "deliveries_total";
/// Connections evicted after a failed send (counter, labels: reason).
pub const EVICTIONS_TOTAL: &str = "evictions_total";
/// Domain events accepted over HTTP (counter).
pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
