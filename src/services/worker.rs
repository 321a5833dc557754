use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::models::aggregate::AggregateUpdate;
use crate::models::analysis::{DetectedLabel, FaceRecord, ImageRef};
use crate::models::frame::{FrameLabels, FrameRef, FrameResult};
use crate::models::job::DispatchMessage;
use crate::models::search::external_image_id;
use crate::services::aggregate::{summarize_faces, summarize_labels, Thresholds};
use crate::services::analysis::AnalysisService;
use crate::services::backoff::BackoffPolicy;
use crate::services::encryption::{EncryptionError, ResultCipher};
use crate::services::manifest::{parse_manifest, ManifestError};
use crate::services::shards::{ShardAllocator, ShardError};
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::store::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Analysis calls in flight per item.
    pub pool_width: usize,
    pub thresholds: Thresholds,
    pub label_min_confidence: f64,
    pub max_labels: u32,
    /// Prefix of per-frame result objects.
    pub results_prefix: String,
}

/// What happened to one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Another delivery already owns the item; nothing was done.
    AlreadyClaimed,
    Processed(ItemSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemSummary {
    pub frames: usize,
    pub faces_indexed: u64,
    pub faces_counted: u64,
    pub labels: usize,
    /// Analysis calls that failed plus per-frame records that were not written.
    pub failed_calls: usize,
}

#[derive(Debug, Clone, Copy)]
enum Call {
    IndexFaces,
    DetectLabels,
}

impl Call {
    fn name(self) -> &'static str {
        match self {
            Call::IndexFaces => "index_faces",
            Call::DetectLabels => "detect_labels",
        }
    }
}

enum CallOutput {
    Faces(Vec<FaceRecord>),
    Labels(Vec<DetectedLabel>),
}

struct CallOutcome {
    output: CallOutput,
    /// Whether the per-frame record was written.
    persisted: bool,
}

/// Processes one item of a job: claims it, analyses every frame of its
/// manifest and folds the results into the job's aggregate.
pub struct AnalysisWorker {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisService>,
    shards: Arc<ShardAllocator>,
    cipher: Arc<ResultCipher>,
    backoff: BackoffPolicy,
    settings: WorkerSettings,
}

impl AnalysisWorker {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisService>,
        shards: Arc<ShardAllocator>,
        cipher: Arc<ResultCipher>,
        backoff: BackoffPolicy,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            storage,
            analysis,
            shards,
            cipher,
            backoff,
            settings,
        }
    }

    pub async fn process(&self, message: &DispatchMessage) -> Result<ItemOutcome, WorkerError> {
        let job_id = message.job_id.as_str();
        let item_key = message.item_key.as_str();

        if !self.store.claim_item(job_id, item_key).await? {
            metrics::counter!("fanout_items_skipped_total").increment(1);
            tracing::info!(job_id = %job_id, item = %item_key, "Item already claimed, nothing to do");
            return Ok(ItemOutcome::AlreadyClaimed);
        }
        metrics::counter!("fanout_items_claimed_total").increment(1);
        let started = Instant::now();

        let raw = self.storage.get(item_key).await?;
        let manifest = std::str::from_utf8(&raw).map_err(|_| ManifestError::Encoding)?;
        let frames = parse_manifest(manifest)?;

        let shard_id = self
            .store
            .aggregate_shard(job_id)
            .await?
            .ok_or_else(|| WorkerError::MissingShard(job_id.to_string()))?;

        tracing::info!(
            job_id = %job_id,
            item = %item_key,
            frames = frames.len(),
            shard = %shard_id,
            "Analysing item"
        );

        let calls = frames
            .iter()
            .flat_map(|frame| [(frame, Call::IndexFaces), (frame, Call::DetectLabels)]);
        let outcomes: Vec<Option<CallOutcome>> = stream::iter(calls)
            .map(|(frame, call)| self.run_call(job_id, &shard_id, frame, call))
            .buffer_unordered(self.settings.pool_width.max(1))
            .collect()
            .await;

        let mut summary = ItemSummary {
            frames: frames.len(),
            ..ItemSummary::default()
        };
        let mut update = AggregateUpdate::new();
        for outcome in outcomes {
            let Some(outcome) = outcome else {
                summary.failed_calls += 1;
                continue;
            };
            if !outcome.persisted {
                summary.failed_calls += 1;
            }
            match outcome.output {
                CallOutput::Faces(records) => {
                    summary.faces_indexed += records.len() as u64;
                    summary.faces_counted +=
                        summarize_faces(&mut update, &records, &self.settings.thresholds);
                }
                CallOutput::Labels(labels) => {
                    summary.labels += labels.len();
                    summarize_labels(&mut update, &labels);
                }
            }
        }

        if !update.is_empty() {
            self.store.apply_aggregate(job_id, &update).await?;
        }

        self.store.mark_complete(job_id, item_key).await?;

        if summary.faces_indexed > 0 {
            self.shards
                .increment_usage(&shard_id, summary.faces_indexed as i64)
                .await?;
        }

        metrics::histogram!("fanout_item_processing_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            job_id = %job_id,
            item = %item_key,
            frames = summary.frames,
            faces_indexed = summary.faces_indexed,
            faces_counted = summary.faces_counted,
            labels = summary.labels,
            failed_calls = summary.failed_calls,
            "Item completed"
        );
        Ok(ItemOutcome::Processed(summary))
    }

    /// One analysis call followed by the writes of its per-frame record.
    /// Failures stay local to the call; a failed write keeps the analysis
    /// output so it is still counted.
    async fn run_call(
        &self,
        job_id: &str,
        shard_id: &str,
        frame: &FrameRef,
        call: Call,
    ) -> Option<CallOutcome> {
        let image = ImageRef {
            bucket: self.storage.bucket_name().to_string(),
            key: frame.key.clone(),
        };

        let analysed = match call {
            Call::IndexFaces => {
                let external_id = external_image_id(job_id, frame.name());
                self.backoff
                    .retry(call.name(), || {
                        self.analysis.index_faces(&image, shard_id, &external_id)
                    })
                    .await
                    .map(|response| CallOutput::Faces(response.face_records))
            }
            Call::DetectLabels => self
                .backoff
                .retry(call.name(), || {
                    self.analysis.detect_labels(
                        &image,
                        self.settings.label_min_confidence,
                        self.settings.max_labels,
                    )
                })
                .await
                .map(|response| CallOutput::Labels(response.labels)),
        };

        let output = match analysed {
            Ok(output) => output,
            Err(e) => {
                metrics::counter!("fanout_item_failures_total", "call" => call.name()).increment(1);
                tracing::error!(
                    job_id = %job_id,
                    frame = %frame.key,
                    call = call.name(),
                    error = %e,
                    "Frame analysis failed"
                );
                return None;
            }
        };

        let persisted = match self.persist(job_id, frame, &output).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("fanout_result_write_failures_total", "call" => call.name())
                    .increment(1);
                tracing::error!(
                    job_id = %job_id,
                    frame = %frame.key,
                    call = call.name(),
                    error = %e,
                    "Frame result write failed"
                );
                false
            }
        };

        Some(CallOutcome { output, persisted })
    }

    /// Store the per-frame record of a successful call. Empty outputs write
    /// nothing.
    async fn persist(
        &self,
        job_id: &str,
        frame: &FrameRef,
        output: &CallOutput,
    ) -> Result<(), WorkerError> {
        match output {
            CallOutput::Faces(records) => {
                tracing::debug!(job_id = %job_id, frame = %frame.key, faces = records.len(), "Faces indexed");
                if records.is_empty() {
                    return Ok(());
                }
                let path = format!(
                    "{}/frames/{}/{}.json",
                    self.settings.results_prefix,
                    job_id,
                    frame.name()
                );
                let sealed = self.cipher.seal_json(records)?;
                self.storage.put(&path, &sealed, "application/json").await?;
                self.store
                    .put_frame_result(
                        job_id,
                        &FrameResult {
                            key: frame.name().to_string(),
                            path,
                            time: frame.timestamp_ms,
                        },
                    )
                    .await?;
            }
            CallOutput::Labels(labels) => {
                if labels.is_empty() {
                    return Ok(());
                }
                self.store
                    .put_frame_labels(
                        job_id,
                        &FrameLabels {
                            key: frame.name().to_string(),
                            time: frame.timestamp_ms,
                            labels: labels.iter().map(|l| l.name.clone()).collect(),
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Job {0} has no result aggregate")]
    MissingShard(String),
}
