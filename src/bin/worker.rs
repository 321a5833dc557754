use std::time::Duration;

use frame_fanout::{
    app_state::AppState,
    config::AppConfig,
    models::job::JobKind,
    services::{
        search::SearchWorker,
        worker::AnalysisWorker,
    },
};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting fan-out worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let state = AppState::from_config(&config);

    let worker = AnalysisWorker::new(
        state.store.clone(),
        state.storage.clone(),
        state.analysis.clone(),
        state.shards.clone(),
        state.cipher.clone(),
        config.backoff_policy(),
        config.worker_settings(),
    );

    let search = SearchWorker::new(
        state.store.clone(),
        state.storage.clone(),
        state.analysis.clone(),
        config.backoff_policy(),
        config.search_settings(),
    );

    tracing::info!("Worker ready, starting dispatch loop");

    loop {
        match process_next_item(&state, &worker, &search).await {
            Ok(true) => {
                tracing::debug!("Item handled, checking for next item");
            }
            Ok(false) => {
                tracing::trace!("No items available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading dispatch queue, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Handle the next dispatch message.
/// Returns Ok(true) if a message was taken, Ok(false) if the queue was empty.
async fn process_next_item(
    state: &AppState,
    worker: &AnalysisWorker,
    search: &SearchWorker,
) -> Result<bool, Box<dyn std::error::Error>> {
    let message = match state.queue.dequeue().await? {
        Some(message) => message,
        None => return Ok(false),
    };

    let result = match message.kind {
        JobKind::Analysis => worker.process(&message).await.map(|_| ()).map_err(|e| e.to_string()),
        JobKind::Search => search.process(&message).await.map(|_| ()).map_err(|e| e.to_string()),
    };

    if let Err(e) = result {
        // The item stays PROCESSING; there is no automatic re-queue.
        tracing::error!(
            job_id = %message.job_id,
            item = %message.item_key,
            kind = %message.kind,
            error = %e,
            "Item processing failed"
        );
    }

    state.queue.complete(&message).await?;
    Ok(true)
}
