use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::sleep;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use frame_fanout::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        change_feed::ChangeFeed, notifier::RedisNotifier, timeline::TimelinePublisher,
        tracker::ProgressTracker,
    },
};

const CONSUMER_GROUP: &str = "fanout-tracker";
const RETRY_INTERVAL_MS: u64 = 1000;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing frame-fanout tracker");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    let state = AppState::from_config(&config);

    let notifier = RedisNotifier::new(
        &config.redis_url,
        &config.progress_channel,
        &config.milestone_channel,
    )
    .expect("Failed to initialize notifier");

    let timeline = TimelinePublisher::new(
        state.store.clone(),
        state.storage.clone(),
        state.cipher.clone(),
    );

    let tracker = ProgressTracker::new(
        state.store.clone(),
        state.queue.clone(),
        Arc::new(notifier),
        state.shards.clone(),
        Arc::new(timeline),
        config.tracker_settings(),
    );

    let consumer = format!("tracker-{}", uuid::Uuid::new_v4());
    tracing::info!(consumer = %consumer, "Connecting to change stream");
    let feed = ChangeFeed::connect(
        &config.redis_url,
        CONSUMER_GROUP,
        &consumer,
        config.change_batch_size,
        config.change_block_ms,
    )
    .await
    .expect("Failed to connect to change stream");

    tokio::spawn(run_tracker(feed, tracker));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/search", post(routes::search::submit_search))
        .route("/api/v1/search/{job_id}", get(routes::search::get_search))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Tracker listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

/// Read, process and acknowledge change batches until the process exits.
async fn run_tracker(mut feed: ChangeFeed, tracker: ProgressTracker) {
    loop {
        let batch = match feed.next_batch().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read change stream, will retry");
                sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;
                continue;
            }
        };

        if batch.is_empty() {
            continue;
        }

        let report = tracker.process_batch(&batch.records).await;

        let settled = batch.settled_ids(&report.failed_records);
        if let Err(e) = feed.ack(&settled).await {
            tracing::error!(error = %e, entries = settled.len(), "Failed to acknowledge changes");
        }

        // Failed records stay pending and are read again after a pause.
        if !report.failed_records.is_empty() {
            tracing::warn!(
                failed = report.failed_records.len(),
                "Leaving failed changes unacknowledged for replay"
            );
            feed.replay_pending();
            sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;
        }
    }
}
