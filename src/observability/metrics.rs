//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mux_connections_accepted_total` (counter): clients added to the set
//! - `mux_connections_closed_total` (counter): clients removed from the set
//! - `mux_active_connections` (gauge): clients currently in the set
//! - `mux_bytes_received_total` (counter): bytes handed to the hook
//! - `mux_accept_errors_total` (counter)
//! - `mux_poll_errors_total` (counter)
//! - `mux_read_errors_total` (counter)
//! - `mux_datagrams_received_total` (counter)
//!
//! Recording without an installed recorder is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    ::metrics::counter!("mux_connections_accepted_total").increment(1);
    ::metrics::gauge!("mux_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    ::metrics::counter!("mux_connections_closed_total").increment(1);
    ::metrics::gauge!("mux_active_connections").decrement(1.0);
}

pub fn record_bytes_received(transport: &'static str, bytes: usize) {
    ::metrics::counter!("mux_bytes_received_total", "transport" => transport).increment(bytes as u64);
}

pub fn record_accept_error() {
    ::metrics::counter!("mux_accept_errors_total").increment(1);
}

pub fn record_poll_error(transport: &'static str) {
    ::metrics::counter!("mux_poll_errors_total", "transport" => transport).increment(1);
}

pub fn record_read_error(transport: &'static str) {
    ::metrics::counter!("mux_read_errors_total", "transport" => transport).increment(1);
}

pub fn record_datagram() {
    ::metrics::counter!("mux_datagrams_received_total").increment(1);
}
