//! Metrics collection and exposition.
//!
//! # Metrics
//! - `faas_requests_total` (counter): answered requests by status
//! - `faas_request_duration_seconds` (histogram): arrival to response head
//! - `faas_errors_total` (counter): reported errors by kind
//! - `faas_handler_loads_total` (counter): cache misses by outcome
//! - `faas_active_requests` (gauge): requests not yet fully answered
//! - `faas_open_sockets` (gauge): tracked client connections

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::ErrorKind;

/// Install the Prometheus recorder with its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, requested_at: Instant) {
    counter!("faas_requests_total", "status" => status.to_string()).increment(1);
    histogram!("faas_request_duration_seconds").record(requested_at.elapsed().as_secs_f64());
}

pub fn record_error(kind: ErrorKind) {
    counter!("faas_errors_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_handler_load(outcome: &'static str) {
    counter!("faas_handler_loads_total", "outcome" => outcome).increment(1);
}

pub fn set_active_requests(count: usize) {
    gauge!("faas_active_requests").set(count as f64);
}

pub fn set_open_sockets(count: usize) {
    gauge!("faas_open_sockets").set(count as f64);
}
