use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: Prometheus text exposition of the tracker's counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Register descriptions for every metric either binary emits.
pub fn describe_metrics() {
    metrics::describe_counter!("fanout_change_records_total", "Change records received by the tracker");
    metrics::describe_counter!("fanout_record_failures_total", "Change records that failed processing");
    metrics::describe_counter!("fanout_dispatches_total", "Items released to the analysis workers");
    metrics::describe_counter!("fanout_jobs_completed_total", "Jobs moved to COMPLETED");
    metrics::describe_counter!("fanout_items_claimed_total", "Items claimed by a worker");
    metrics::describe_counter!("fanout_items_skipped_total", "Deliveries dropped because the item was already claimed");
    metrics::describe_counter!("fanout_item_failures_total", "Analysis calls that failed after retries");
    metrics::describe_counter!("fanout_result_write_failures_total", "Per-frame records not written after a successful analysis call");
    metrics::describe_counter!("fanout_search_jobs_total", "Image search jobs created");
    metrics::describe_histogram!("fanout_item_processing_seconds", "Time to analyse one item");
    metrics::describe_counter!("fanout_backoff_retries_total", "Retried calls to the analysis service");
    metrics::describe_counter!("fanout_shard_rollovers_total", "Collections rolled over after filling up");
    metrics::describe_gauge!("fanout_queue_depth", "Dispatch messages waiting for a worker");
}
