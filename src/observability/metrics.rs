//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_handshakes_total` (counter): handshakes by entry point and outcome
//! - `gateway_active_connections` (gauge): open connections per entry point
//! - `gateway_reconfigurations_total` (counter): TLS swaps by entry point and outcome
//! - `gateway_tls_generation` (gauge): active TLS generation per entry point
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op (tests, metrics disabled)
//! - Prometheus exposition is served by the exporter's own HTTP listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Handshake outcome labels.
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const UNTRUSTED_CLIENT: &str = "untrusted_client";
    pub const MISSING_CLIENT_CERT: &str = "missing_client_cert";
    pub const TIMEOUT: &str = "timeout";
    pub const ERROR: &str = "error";
}

pub fn record_handshake(entry_point: &str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_handshakes_total",
        "entry_point" => entry_point.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn connection_opened(entry_point: &str) {
    ::metrics::gauge!("gateway_active_connections", "entry_point" => entry_point.to_string())
        .increment(1.0);
}

pub fn connection_closed(entry_point: &str) {
    ::metrics::gauge!("gateway_active_connections", "entry_point" => entry_point.to_string())
        .decrement(1.0);
}

pub fn record_reconfiguration(entry_point: &str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_reconfigurations_total",
        "entry_point" => entry_point.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_tls_generation(entry_point: &str, generation: u64) {
    ::metrics::gauge!("gateway_tls_generation", "entry_point" => entry_point.to_string())
        .set(generation as f64);
}
