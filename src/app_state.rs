use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    analysis::{AnalysisClient, AnalysisService},
    encryption::ResultCipher,
    queue::DispatchQueue,
    redis_store::RedisStore,
    search::SearchPlanner,
    shards::ShardAllocator,
    storage::{ObjectStore, S3Storage},
    store::Store,
};

/// Services shared by the tracker, the worker and the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub queue: Arc<DispatchQueue>,
    pub storage: Arc<dyn ObjectStore>,
    pub analysis: Arc<dyn AnalysisService>,
    pub cipher: Arc<ResultCipher>,
    pub shards: Arc<ShardAllocator>,
    pub search: Arc<SearchPlanner>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        queue: DispatchQueue,
        storage: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisService>,
        cipher: ResultCipher,
        config: &AppConfig,
    ) -> Self {
        let shards = ShardAllocator::new(
            store.clone(),
            analysis.clone(),
            &config.shard_family,
            &config.shard_prefix,
            config.max_shard_size,
        );

        let shards = Arc::new(shards);
        let search = SearchPlanner::new(store.clone(), storage.clone(), shards.clone());

        Self {
            store,
            queue: Arc::new(queue),
            storage,
            analysis,
            cipher: Arc::new(cipher),
            shards,
            search: Arc::new(search),
        }
    }

    /// Connect every production adapter. Panics on misconfiguration, which
    /// only happens during start-up.
    pub fn from_config(config: &AppConfig) -> Self {
        tracing::info!("Connecting to Redis");
        let store = RedisStore::new(&config.redis_url).expect("Failed to initialize Redis store");
        let queue = DispatchQueue::new(&config.redis_url).expect("Failed to initialize dispatch queue");

        tracing::info!(bucket = %config.storage_bucket, "Initializing object storage client");
        let storage = S3Storage::new(
            &config.storage_bucket,
            &config.storage_endpoint,
            &config.storage_region,
            &config.storage_access_key,
            &config.storage_secret_key,
        )
        .expect("Failed to initialize storage client");

        tracing::info!("Initializing AES-256-GCM result encryption");
        let cipher = ResultCipher::new(&config.encryption_key).expect("Failed to initialize encryption");

        tracing::info!(endpoint = %config.analysis_endpoint, "Initializing analysis client");
        let analysis = AnalysisClient::new(&config.analysis_endpoint, &config.analysis_api_token);

        Self::new(
            Arc::new(store),
            queue,
            Arc::new(storage),
            Arc::new(analysis),
            cipher,
            config,
        )
    }
}
