//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define transport metrics (requests, retransmissions, latency, rejections)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `conduit_requests_total` (counter): outbound requests by method, outcome
//! - `conduit_retransmits_total` (counter): redirects and auth retries by kind
//! - `conduit_request_duration_seconds` (histogram): prepare → response latency
//! - `destination_requests_total` (counter): inbound requests by method, outcome
//! - `workqueue_rejections_total` (counter): async deliveries refused by a queue
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels stay low-cardinality: no URLs

use std::net::SocketAddr;
use std::sync::Once;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

static DESCRIBE: Once = Once::new();

fn describe() {
    DESCRIBE.call_once(|| {
        describe_counter!("conduit_requests_total", "Outbound requests completed by the conduit");
        describe_counter!(
            "conduit_retransmits_total",
            "Requests retransmitted after a redirect or authentication challenge"
        );
        describe_histogram!(
            "conduit_request_duration_seconds",
            "Time from first byte written to response delivered"
        );
        describe_counter!("destination_requests_total", "Inbound requests handled by a destination");
        describe_counter!(
            "workqueue_rejections_total",
            "Asynchronous deliveries rejected by a worker queue"
        );
    });
}

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Prometheus metrics endpoint started");
        }
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished outbound request.
pub fn record_conduit_request(method: &str, outcome: &str, duration_seconds: f64) {
    counter!(
        "conduit_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("conduit_request_duration_seconds", "method" => method.to_string())
        .record(duration_seconds);
}

/// Record one retransmission (`redirect`, `auth`, `proxy_auth`).
pub fn record_retransmit(kind: &'static str) {
    counter!("conduit_retransmits_total", "kind" => kind).increment(1);
}

/// Record an inbound request seen by a destination.
pub fn record_destination_request(method: &str, outcome: &'static str) {
    counter!(
        "destination_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a worker queue rejection.
pub fn record_workqueue_rejection(queue: &str) {
    counter!("workqueue_rejections_total", "queue" => queue.to_string()).increment(1);
}
