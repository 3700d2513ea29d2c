//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions for the job pipeline
//! - Helper functions for recording metrics

use bizdiag_core::JobStatus;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "bizdiag_jobs_submitted_total",
        "Diagnostic jobs accepted by the submission endpoint"
    );
    describe_counter!(
        "bizdiag_jobs_finished_total",
        "Diagnostic jobs that reached a terminal status, by status"
    );
    describe_counter!(
        "bizdiag_llm_attempts_total",
        "LLM attempts by outcome (ok or the ai_status of the failure)"
    );
    describe_counter!(
        "bizdiag_dispatch_failures_total",
        "Job ids that could not be put on the dispatch queue"
    );
    describe_histogram!(
        "bizdiag_job_duration_seconds",
        "Wall time from worker start to terminal status"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted() {
    counter!("bizdiag_jobs_submitted_total").increment(1);
}

/// Record a terminal transition. `duration` is zero for jobs that never ran.
pub fn record_job_finished(status: JobStatus, duration: Duration) {
    counter!("bizdiag_jobs_finished_total", "status" => status.as_db_str()).increment(1);
    if !duration.is_zero() {
        histogram!("bizdiag_job_duration_seconds", "status" => status.as_db_str())
            .record(duration.as_secs_f64());
    }
}

pub fn record_llm_attempt(outcome: &'static str) {
    counter!("bizdiag_llm_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_dispatch_failure() {
    counter!("bizdiag_dispatch_failures_total").increment(1);
}
