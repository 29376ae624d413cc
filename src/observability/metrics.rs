//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, channel
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_commands_published_total` (counter): publishes by pattern, result
//! - `gateway_command_outcomes_total` (counter): consumer outcomes by pattern
//! - `gateway_rate_limited_total` (counter): rejected requests
//! - `gateway_route_table_routes` (gauge): routes in the active table
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, channel: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "channel" => channel.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "channel" => channel.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_command_published(pattern: &str, result: &'static str) {
    counter!(
        "gateway_commands_published_total",
        "pattern" => pattern.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_command_outcome(pattern: &str, outcome: &'static str) {
    counter!(
        "gateway_command_outcomes_total",
        "pattern" => pattern.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rate_limited(key_kind: &'static str) {
    counter!("gateway_rate_limited_total", "key" => key_kind).increment(1);
}

pub fn set_route_count(count: usize) {
    gauge!("gateway_route_table_routes").set(count as f64);
}
