use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::job::{
    ChangeKind, ChangeRecord, DispatchMessage, JobKind, JobRecord, JobStatus,
};
use crate::models::progress::{Milestone, ProgressEvent, StageBounds};
use crate::services::notifier::Notifier;
use crate::services::queue::{Dispatcher, QueueError};
use crate::services::shards::{ShardAllocator, ShardError};
use crate::services::store::{Store, StoreError};
use crate::services::timeline::TimelinePublisher;

const ANALYZING_MESSAGE: &str = "Analyzing frames";
const SEARCHING_MESSAGE: &str = "Searching image against database";
const CONSOLIDATING_MESSAGE: &str = "Consolidating results";
const EXTRACTING_MESSAGE: &str = "Extracting thumbnails from individuals";
const EXTRACTING_PERCENTAGE: u32 = 95;

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    /// Items of one job allowed in PROCESSING at the same time.
    pub max_concurrent_dispatches: u32,
    /// Percentage range covered by the analysis stage.
    pub analysis_stage: StageBounds,
    /// Percentage range covered by an image search.
    pub search_stage: StageBounds,
}

impl TrackerSettings {
    fn stage(&self, kind: JobKind) -> (StageBounds, &'static str) {
        match kind {
            JobKind::Analysis => (self.analysis_stage, ANALYZING_MESSAGE),
            JobKind::Search => (self.search_stage, SEARCHING_MESSAGE),
        }
    }
}

/// Outcome of one change batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Positions in the input batch of the records that failed. Their
    /// change entries should be left unacknowledged so they are redelivered.
    pub failed_records: Vec<usize>,
    pub dispatched: usize,
    pub events: usize,
}

/// Reacts to job change notifications: releases pending items under the
/// concurrency budget, detects completion and reports progress.
pub struct ProgressTracker {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn Dispatcher>,
    notifier: Arc<dyn Notifier>,
    shards: Arc<ShardAllocator>,
    timeline: Arc<TimelinePublisher>,
    settings: TrackerSettings,
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn Dispatcher>,
        notifier: Arc<dyn Notifier>,
        shards: Arc<ShardAllocator>,
        timeline: Arc<TimelinePublisher>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            notifier,
            shards,
            timeline,
            settings,
        }
    }

    /// Handle every record of a batch. A failing record is logged and
    /// counted; it never stops the rest of the batch.
    pub async fn process_batch(&self, records: &[ChangeRecord]) -> BatchReport {
        let mut report = BatchReport {
            records: records.len(),
            ..BatchReport::default()
        };
        // Latest observed state of each job decides its single event.
        let mut events: BTreeMap<String, Option<ProgressEvent>> = BTreeMap::new();

        for (position, record) in records.iter().enumerate() {
            metrics::counter!("fanout_change_records_total", "kind" => record.kind.to_string())
                .increment(1);

            if record.kind == ChangeKind::Remove {
                report.skipped += 1;
                continue;
            }

            match self.handle_record(record, &mut report).await {
                Ok(Some((job_id, event))) => {
                    events.insert(job_id, event);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    report.failed_records.push(position);
                    metrics::counter!("fanout_record_failures_total").increment(1);
                    tracing::error!(
                        job_id = %record.job_id,
                        kind = %record.kind,
                        error = %e,
                        "Failed to process change record"
                    );
                }
            }
        }

        for event in events.into_values().flatten() {
            if !event.is_deliverable() {
                continue;
            }
            match self.notifier.publish(&event).await {
                Ok(()) => report.events += 1,
                Err(e) => tracing::warn!(topic = %event.topic, error = %e, "Failed to publish progress"),
            }
        }

        tracing::info!(
            records = report.records,
            skipped = report.skipped,
            failed = report.failed,
            dispatched = report.dispatched,
            events = report.events,
            "Change batch processed"
        );
        report
    }

    /// Returns the job id and the event its current state calls for, or
    /// `None` when the job is unknown. Change entries carry only the job id,
    /// so a job that is gone by the time its entry is read is skipped.
    async fn handle_record(
        &self,
        record: &ChangeRecord,
        report: &mut BatchReport,
    ) -> Result<Option<(String, Option<ProgressEvent>)>, TrackerError> {
        let Some(job) = self.store.get_job(&record.job_id).await? else {
            tracing::warn!(job_id = %record.job_id, "Change for unknown job");
            return Ok(None);
        };

        let event = match job.status {
            JobStatus::Processing => self.advance(&job, report).await?,
            JobStatus::Consolidating => Some(ProgressEvent::status(
                &job.topic,
                CONSOLIDATING_MESSAGE,
                self.settings.analysis_stage.last.round() as u32,
            )),
            JobStatus::Extracting => Some(ProgressEvent::status(
                &job.topic,
                EXTRACTING_MESSAGE,
                EXTRACTING_PERCENTAGE,
            )),
            JobStatus::Completed => Some(self.finish(&job).await),
        };

        Ok(Some((job.id, event)))
    }

    async fn advance(
        &self,
        job: &JobRecord,
        report: &mut BatchReport,
    ) -> Result<Option<ProgressEvent>, TrackerError> {
        let histogram = job.histogram();
        let high_water = self
            .store
            .raise_completed_mark(&job.id, histogram.completed)
            .await?;

        tracing::debug!(
            job_id = %job.id,
            total = histogram.total,
            completed = histogram.completed,
            in_progress = histogram.in_progress,
            pending = histogram.pending.len(),
            high_water,
            "Job histogram"
        );

        if histogram.is_fresh() && job.kind == JobKind::Analysis {
            self.ensure_aggregate(&job.id).await?;
        }

        if !histogram.pending.is_empty() {
            let budget = histogram.dispatch_budget(self.settings.max_concurrent_dispatches);
            if budget == 0 {
                tracing::debug!(
                    job_id = %job.id,
                    in_progress = histogram.in_progress,
                    "Concurrency budget spent, nothing dispatched"
                );
            }

            for item_key in histogram.pending.iter().take(budget) {
                let message = DispatchMessage {
                    job_id: job.id.clone(),
                    item_key: item_key.clone(),
                    kind: job.kind,
                };
                self.dispatcher.dispatch(&message).await?;
                report.dispatched += 1;
                metrics::counter!("fanout_dispatches_total").increment(1);
                tracing::debug!(job_id = %job.id, item = %item_key, "Dispatched item");
            }
        } else if histogram.is_done()
            && self
                .store
                .transition_status(&job.id, JobStatus::Processing, JobStatus::Completed)
                .await?
        {
            metrics::counter!("fanout_jobs_completed_total").increment(1);
            tracing::info!(job_id = %job.id, items = histogram.total, "All items completed");
        }

        let (stage, message) = self.settings.stage(job.kind);
        Ok(stage
            .percentage(high_water, histogram.total)
            .map(|percentage| ProgressEvent::status(&job.topic, message, percentage)))
    }

    /// Aggregate record and shard are fixed the first time a job is seen fresh.
    async fn ensure_aggregate(&self, job_id: &str) -> Result<(), TrackerError> {
        if self.store.aggregate_shard(job_id).await?.is_some() {
            return Ok(());
        }

        let shard_id = self.shards.fetch_current_shard().await?;
        if self.store.init_aggregate(job_id, &shard_id).await? {
            tracing::info!(job_id = %job_id, shard = %shard_id, "Initialised result aggregate");
        }
        Ok(())
    }

    /// Side effects of an observed completion. All best effort. A search
    /// job only redirects to its results.
    async fn finish(&self, job: &JobRecord) -> ProgressEvent {
        if job.kind == JobKind::Search {
            return ProgressEvent::redirect(&job.topic, &job.id);
        }

        match self.timeline.publish(&job.id).await {
            Ok(notice) => {
                if let Err(e) = self.notifier.result(&notice).await {
                    tracing::error!(job_id = %job.id, key = %notice.key, error = %e, "Failed to announce label timeline");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to publish label timeline");
            }
        }

        let milestone = Milestone {
            identifier: job.id.clone(),
            status: JobStatus::Completed,
        };
        if let Err(e) = self.notifier.milestone(&milestone).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to send milestone");
        }

        ProgressEvent::redirect(&job.topic, &job.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Dispatch error: {0}")]
    Queue(#[from] QueueError),
}
