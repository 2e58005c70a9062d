//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, source, status
//! - `gateway_request_duration_seconds` (histogram): time spent in the gateway
//! - `gateway_cache_hits_total` (counter): GET requests answered from history
//! - `gateway_simulated_errors_total` (counter): injected errors by status
//! - `gateway_upstream_requests_total` (counter): forwarded calls by outcome
//!
//! # Design Decisions
//! - Labels are service names and small fixed vocabularies, never URLs
//! - The Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, source: &str, status: u16, elapsed: Duration) {
    metrics::counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "source" => source.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "service" => service.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_cache_hit(service: &str) {
    metrics::counter!("gateway_cache_hits_total", "service" => service.to_string()).increment(1);
}

pub fn record_simulated_error(service: &str, status: u16) {
    metrics::counter!(
        "gateway_simulated_errors_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// `outcome` is one of `success`, `failed`, `timeout`, `rejected`, `error`.
pub fn record_upstream(service: &str, outcome: &'static str) {
    metrics::counter!(
        "gateway_upstream_requests_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
