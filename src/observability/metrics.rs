//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): forwarded or rejected requests by
//!   method, status and route
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_denials_total` (counter): access denials by reason code
//! - `proxy_tunnels_total` (counter): CONNECT outcomes
//! - `proxy_active_connections` (gauge): open client connections
//!
//! Recording is a no-op until a recorder is installed, so the calls are
//! safe in tests.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    let route = route.to_string();

    metrics::counter!(
        "proxy_requests_total",
        "method" => method.clone(),
        "status" => status.clone(),
        "route" => route.clone()
    )
    .increment(1);
    metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method,
        "status" => status,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_denial(reason: &str) {
    metrics::counter!("proxy_denials_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_tunnel(outcome: &'static str) {
    metrics::counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

/// Count an audit event dropped because the writer queue was full.
pub fn record_audit_dropped() {
    metrics::counter!("proxy_audit_dropped_total").increment(1);
}

pub fn connection_opened() {
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}
