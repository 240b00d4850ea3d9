use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the metrics emitted by the API and the worker.
pub fn describe() {
    metrics::describe_counter!(
        "analysis_jobs_submitted_total",
        "Analysis jobs accepted by the provider"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Analysis jobs whose results were merged"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Analysis jobs marked failed"
    );
    metrics::describe_counter!(
        "webhook_accepted_total",
        "Webhook deliveries queued for processing"
    );
    metrics::describe_counter!(
        "webhook_rejected_total",
        "Webhook deliveries answered with 404"
    );
    metrics::describe_histogram!(
        "analysis_result_fetch_seconds",
        "Time to fetch all result pages of a completed job"
    );
    metrics::describe_gauge!(
        "analysis_queue_depth",
        "Completion tasks waiting for the worker"
    );
}
