//! Metrics collection and exposition.
//!
//! # Metrics
//! - `netcore_connections_accepted_total` (counter): accepted connections by transport
//! - `netcore_bind_failures_total` (counter): failed binds by port and kind
//! - `netcore_teardowns_total` (counter): `clear` calls by path (session/raw)
//! - `netcore_registry_sessions` (gauge): current registry size
//! - `netcore_handler_panics_total` (counter): handler panics by transport
//!
//! # Design Decisions
//! - Thin wrappers so call sites stay one line
//! - Exporter is opt-in (`init_metrics`), only the binary installs it

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted(transport: &'static str) {
    metrics::counter!("netcore_connections_accepted_total", "transport" => transport).increment(1);
}

pub fn record_bind_failure(port: u16, kind: &'static str) {
    metrics::counter!(
        "netcore_bind_failures_total",
        "port" => port.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_teardown(path: &'static str) {
    metrics::counter!("netcore_teardowns_total", "path" => path).increment(1);
}

pub fn record_handler_panic(transport: &'static str) {
    metrics::counter!("netcore_handler_panics_total", "transport" => transport).increment(1);
}

pub fn record_registry_size(size: usize) {
    metrics::gauge!("netcore_registry_sessions").set(size as f64);
}
