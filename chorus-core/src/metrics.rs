// ABOUTME: Counter helpers for dispatch observability built on the metrics facade.
// ABOUTME: The Prometheus exporter is installed once by the binary, not by the library.

use anyhow::{Context, Result};

/// Install the Prometheus recorder for the process. Call once from the binary.
pub fn install_prometheus_exporter() -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .context("Failed to install Prometheus metrics exporter")
}

/// A query was accepted for dispatch with this many target providers
pub fn record_query_submitted(targets: usize) {
    metrics::counter!("chorus_queries_total").increment(1);
    metrics::counter!("chorus_legs_total").increment(targets as u64);
}

/// A dispatch leg failed before or during forwarding
pub fn record_leg_failure(kind: &str) {
    metrics::counter!("chorus_leg_failures_total", "kind" => kind.to_string()).increment(1);
}

/// A provider's reply (success or error) was recorded into a session
pub fn record_response(provider_id: &str) {
    metrics::counter!("chorus_responses_total", "provider" => provider_id.to_string()).increment(1);
}

/// A session reached a terminal status
pub fn record_session_finished(status: &str) {
    metrics::counter!("chorus_sessions_finished_total", "status" => status.to_string()).increment(1);
}

/// A message referenced a session that is no longer tracked
pub fn record_unknown_session() {
    metrics::counter!("chorus_unknown_session_total").increment(1);
}
