use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::models::analysis::{FaceMatch, ImageRef};
use crate::models::job::{DispatchMessage, JobKind, JobRecord};
use crate::models::search::{video_id, work_file_key, SearchMatch, SearchWorkFile, COLLECTIONS_PER_ITEM};
use crate::services::analysis::AnalysisService;
use crate::services::backoff::BackoffPolicy;
use crate::services::shards::{ShardAllocator, ShardError};
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::store::{Store, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    /// Collection searches in flight per item.
    pub pool_width: usize,
    /// Minimum similarity a face needs to be reported.
    pub face_match_threshold: f64,
}

/// Splits an image search over every collection of the shard family into
/// work files of [`COLLECTIONS_PER_ITEM`] collections and registers the job.
pub struct SearchPlanner {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStore>,
    shards: Arc<ShardAllocator>,
}

impl SearchPlanner {
    pub fn new(store: Arc<dyn Store>, storage: Arc<dyn ObjectStore>, shards: Arc<ShardAllocator>) -> Self {
        Self {
            store,
            storage,
            shards,
        }
    }

    /// Write the work files, then create the job. The job's insert change
    /// starts the fan-out, so every work file exists before any dispatch.
    pub async fn plan(&self, job_id: &str, topic: &str, image: ImageRef) -> Result<JobRecord, SearchError> {
        let collections = self.shards.list_shards().await?;
        if collections.is_empty() {
            return Err(SearchError::NoCollections);
        }

        let mut item_keys = Vec::new();
        for (index, chunk) in collections.chunks(COLLECTIONS_PER_ITEM).enumerate() {
            let key = work_file_key(job_id, index + 1);
            let work = SearchWorkFile {
                job_id: job_id.to_string(),
                image: image.clone(),
                collections: chunk.to_vec(),
            };
            let payload = serde_json::to_vec(&work)?;
            self.storage.put(&key, &payload, "application/json").await?;
            item_keys.push(key);
        }

        let job = JobRecord::new(job_id, topic, item_keys).with_kind(JobKind::Search);
        if !self.store.create_job(&job).await? {
            return Err(SearchError::DuplicateJob(job_id.to_string()));
        }

        metrics::counter!("fanout_search_jobs_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            image = %image.key,
            collections = collections.len(),
            items = job.parts.len(),
            "Search job created"
        );
        Ok(job)
    }
}

/// What happened to one dispatched search item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    AlreadyClaimed,
    Searched(SearchSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSummary {
    pub collections: usize,
    pub matches: usize,
    pub failed_searches: usize,
}

/// Searches the image of one work file against each of its collections.
pub struct SearchWorker {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisService>,
    backoff: BackoffPolicy,
    settings: SearchSettings,
}

impl SearchWorker {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisService>,
        backoff: BackoffPolicy,
        settings: SearchSettings,
    ) -> Self {
        Self {
            store,
            storage,
            analysis,
            backoff,
            settings,
        }
    }

    pub async fn process(&self, message: &DispatchMessage) -> Result<SearchOutcome, SearchError> {
        let job_id = message.job_id.as_str();
        let item_key = message.item_key.as_str();

        if !self.store.claim_item(job_id, item_key).await? {
            metrics::counter!("fanout_items_skipped_total").increment(1);
            tracing::info!(job_id = %job_id, item = %item_key, "Item already claimed, nothing to do");
            return Ok(SearchOutcome::AlreadyClaimed);
        }
        metrics::counter!("fanout_items_claimed_total").increment(1);
        let started = Instant::now();

        let raw = self.storage.get(item_key).await?;
        let work: SearchWorkFile = serde_json::from_slice(&raw)?;

        let searches: Vec<Option<Vec<SearchMatch>>> = stream::iter(&work.collections)
            .map(|collection| self.search_collection(job_id, &work.image, collection))
            .buffer_unordered(self.settings.pool_width.max(1))
            .collect()
            .await;

        let mut summary = SearchSummary {
            collections: work.collections.len(),
            ..SearchSummary::default()
        };
        let mut matches = Vec::new();
        for search in searches {
            match search {
                Some(found) => matches.extend(found),
                None => summary.failed_searches += 1,
            }
        }
        summary.matches = matches.len();

        self.store.append_search_matches(job_id, &matches).await?;
        self.store.mark_complete(job_id, item_key).await?;

        metrics::histogram!("fanout_item_processing_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            job_id = %job_id,
            item = %item_key,
            collections = summary.collections,
            matches = summary.matches,
            failed_searches = summary.failed_searches,
            "Search item completed"
        );
        Ok(SearchOutcome::Searched(summary))
    }

    /// Matches found in one collection, or `None` when the search failed.
    async fn search_collection(
        &self,
        job_id: &str,
        image: &ImageRef,
        collection: &str,
    ) -> Option<Vec<SearchMatch>> {
        let result = self
            .backoff
            .retry("search_faces_by_image", || {
                self.analysis.search_faces_by_image(
                    image,
                    collection,
                    self.settings.face_match_threshold,
                )
            })
            .await;

        match result {
            Ok(response) => Some(
                response
                    .face_matches
                    .iter()
                    .filter_map(|found| to_match(found, collection))
                    .collect(),
            ),
            Err(e) => {
                metrics::counter!("fanout_item_failures_total", "call" => "search_faces_by_image")
                    .increment(1);
                tracing::error!(
                    job_id = %job_id,
                    collection = %collection,
                    error = %e,
                    "Collection search failed"
                );
                None
            }
        }
    }
}

/// Faces indexed outside the analysis pipeline carry no video id and are
/// dropped.
fn to_match(found: &FaceMatch, collection: &str) -> Option<SearchMatch> {
    let image_id = found.face.external_image_id.as_deref()?;
    let Some(video) = video_id(image_id) else {
        tracing::debug!(face_id = %found.face.face_id, image_id, "Ignoring match without video id");
        return None;
    };
    Some(SearchMatch {
        face_id: found.face.face_id.clone(),
        video_id: video.to_string(),
        image_id: image_id.to_string(),
        similarity: found.similarity,
        collection: collection.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Invalid work file: {0}")]
    WorkFile(#[from] serde_json::Error),

    #[error("No collections to search")]
    NoCollections,

    #[error("Job {0} already exists")]
    DuplicateJob(String),
}
