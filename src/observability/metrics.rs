//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): relayed connections by server, outcome
//! - `lb_request_duration_seconds` (histogram): connection lifetime by server
//! - `lb_no_server_available_total` (counter): connections refused for lack of a server
//! - `lb_backend_active_connections` (gauge): in-flight connections per server
//! - `lb_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `lb_backend_failures` (gauge): current failure count per server
//! - `lb_strategy_switches_total` (counter): runtime switches by target strategy
//! - `lb_beta1_selections_total` (counter): hit, bounded or warmup
//! - `lb_alpha1_hedge_advised_total` (counter): hedging recommendations
//! - `lb_alpha1_weight` (gauge): current beta and gamma
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels for server, outcome and strategy only

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_request(server: &str, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!("lb_requests_total", "server" => server.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("lb_request_duration_seconds", "server" => server.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_no_server() {
    counter!("lb_no_server_available_total").increment(1);
}

pub fn record_active_connections(server: &str, connections: usize) {
    gauge!("lb_backend_active_connections", "server" => server.to_string())
        .set(connections as f64);
}

pub fn record_backend_health(server: &str, healthy: bool) {
    gauge!("lb_backend_health", "server" => server.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_backend_failures(server: &str, failures: u32) {
    gauge!("lb_backend_failures", "server" => server.to_string()).set(f64::from(failures));
}

pub fn record_strategy_switch(strategy: &'static str) {
    counter!("lb_strategy_switches_total", "strategy" => strategy).increment(1);
}

pub fn record_beta1_selection(result: &'static str) {
    counter!("lb_beta1_selections_total", "result" => result).increment(1);
}

pub fn record_hedge_advised() {
    counter!("lb_alpha1_hedge_advised_total").increment(1);
}

pub fn record_alpha1_weights(beta: f64, gamma: f64) {
    gauge!("lb_alpha1_weight", "weight" => "beta").set(beta);
    gauge!("lb_alpha1_weight", "weight" => "gamma").set(gamma);
}
