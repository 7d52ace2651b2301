//! Logs and metrics for both transport directions.
//!
//! ```text
//! HttpConduit ─┐                     ┌─▶ logging.rs  (tracing subscriber,
//! WorkQueue ───┼─▶ tracing events ───┤               pretty or JSON)
//! Destination ─┘   metrics facade ───┴─▶ metrics.rs  (Prometheus exporter)
//! ```
//!
//! Every event carries the conduit or destination name. Metric calls are
//! no-ops until [`metrics::init_metrics`] installs an exporter.

pub mod logging;
pub mod metrics;
