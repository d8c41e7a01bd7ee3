use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("http_requests_total", "HTTP responses by status code");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    metrics::describe_counter!("exam_attempts_started_total", "Exam attempts started");
    metrics::describe_counter!("exam_submissions_total", "Graded exam submissions by outcome");
    metrics::describe_counter!(
        "exam_late_submissions_total",
        "Submissions received after the exam duration elapsed"
    );
    metrics::describe_counter!(
        "exam_session_guard_failures_total",
        "Session store operations that failed and were skipped"
    );
}
