//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint,
/// or `None` if a recorder was already installed (tests spin up multiple
/// servers in one process).
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder already installed, reusing global");
            None
        }
    }
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Hub requests total (counter, labels: resource, action).
pub const HUB_REQUESTS_TOTAL: &str = "hub_requests_total";
/// Hub errors total (counter, labels: error_type).
pub const HUB_ERRORS_TOTAL: &str = "hub_errors_total";
/// Hub request duration seconds (histogram, labels: resource).
pub const HUB_REQUEST_DURATION_SECONDS: &str = "hub_request_duration_seconds";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Messages dropped on full send channels total (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Events broadcast to groups total (counter, labels: scope).
pub const WS_EVENTS_BROADCAST_TOTAL: &str = "ws_events_broadcast_total";
/// Connections evicted by the reaper total (counter, labels: reason).
pub const WS_REAPER_EVICTIONS_TOTAL: &str = "ws_reaper_evictions_total";
/// Upgrades refused total (counter, labels: reason).
pub const WS_UPGRADES_REFUSED_TOTAL: &str = "ws_upgrades_refused_total";
