//! Prometheus metrics for the CI dashboard.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook and how it was handled.
pub fn webhook_received(event_type: &str, outcome: &str) {
    counter!(
        "ci_webhooks_received_total",
        "event" => event_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a build state transition.
pub fn build_status_changed(status: &str) {
    counter!("ci_builds_total", "status" => status.to_string()).increment(1);
}

/// Record build duration, from start to terminal state.
pub fn build_duration(duration_ms: u64) {
    histogram!("ci_build_duration_ms").record(duration_ms as f64);
}

/// Record a branch lifecycle change (`created` or `resurrected`).
pub fn branch_lifecycle(change: &str) {
    counter!("ci_branches_total", "change" => change.to_string()).increment(1);
}

/// Record a commit status report (`sent`, `skipped`, `failed`, `dropped`).
pub fn status_report(result: &str) {
    counter!("ci_status_reports_total", "result" => result.to_string()).increment(1);
}
