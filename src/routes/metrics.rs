//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    // Force initialization of the lazy static
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

/// Register all custom metrics
fn register_metrics() {
    metrics::describe_counter!(
        "restream_streams_started_total",
        "Total number of generation streams started"
    );
    metrics::describe_counter!(
        "restream_resumes_total",
        "Total number of resume requests, by outcome"
    );
    metrics::describe_counter!(
        "restream_chunks_delivered_total",
        "Total chunks delivered to clients, by path (live or replay)"
    );
    metrics::describe_histogram!(
        "restream_stream_start_seconds",
        "Time from request receipt to stream start"
    );
}

/// Prometheus metrics endpoint handler
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a started stream
pub fn record_stream_started(durable: bool, duration_secs: f64) {
    let mode = if durable { "durable" } else { "passthrough" };
    metrics::counter!("restream_streams_started_total", "mode" => mode).increment(1);
    metrics::histogram!("restream_stream_start_seconds").record(duration_secs);
}

/// Record a resume request outcome
pub fn record_resume(outcome: &'static str) {
    metrics::counter!("restream_resumes_total", "outcome" => outcome).increment(1);
}

/// Record delivered chunks
pub fn record_chunks(path: &'static str, count: u64) {
    metrics::counter!("restream_chunks_delivered_total", "path" => path).increment(count);
}
