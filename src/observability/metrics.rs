//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tsgate_requests_total` (counter): requests by mechanism, status
//! - `tsgate_request_duration_seconds` (histogram): latency by
//!   mechanism
//! - `tsgate_backend_health` (gauge): -1 failing, 0 unchecked,
//!   1 passing, per backend
//! - `tsgate_config_reloads_total` (counter): reload attempts by
//!   outcome
//!
//! # Design Decisions
//! - Labels limited to low-cardinality values (mechanism names,
//!   backend names, status codes)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on its own listener. Failure to
/// bind is logged, not fatal; the gateway serves without metrics.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(mechanism: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "tsgate_requests_total",
        "mechanism" => mechanism,
        "status" => status.to_string(),
    )
    .increment(1);
    metrics::histogram!(
        "tsgate_request_duration_seconds",
        "mechanism" => mechanism,
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, status: i32) {
    metrics::gauge!("tsgate_backend_health", "backend" => backend.to_string()).set(status as f64);
}

pub fn record_config_reload(success: bool) {
    let outcome = if success { "applied" } else { "rejected" };
    metrics::counter!("tsgate_config_reloads_total", "outcome" => outcome).increment(1);
}
