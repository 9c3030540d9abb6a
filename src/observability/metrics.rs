//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied requests by service, method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by service
//! - `gateway_breaker_transitions_total` (counter): breaker state changes by service, from, to
//! - `gateway_breaker_rejections_total` (counter): calls and tunnels shed by an open breaker
//! - `gateway_active_tunnels` (gauge): currently open WebSocket tunnels
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is optional and served on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::BreakerState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(service: &str, method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_transition(service: &str, from: BreakerState, to: BreakerState) {
    metrics::counter!(
        "gateway_breaker_transitions_total",
        "service" => service.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_breaker_rejection(service: &str) {
    metrics::counter!("gateway_breaker_rejections_total", "service" => service.to_string())
        .increment(1);
}

pub fn set_active_tunnels(count: usize) {
    metrics::gauge!("gateway_active_tunnels").set(count as f64);
}
