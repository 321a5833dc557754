use async_trait::async_trait;

use crate::models::aggregate::{AggregateUpdate, ResultAggregate};
use crate::models::frame::{FrameLabels, FrameResult};
use crate::models::job::{JobRecord, JobStatus};
use crate::models::search::SearchMatch;
use crate::models::shard::ShardControl;

/// Shared key-value state used by every tracker and worker process.
///
/// All mutation goes through conditional writes or atomic increments;
/// implementations must never read-modify-write on the client side.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Job records ──────────────────────────────────────────────────

    /// Insert `job` if no record exists for its id. Emits an insert change.
    async fn create_job(&self, job: &JobRecord) -> Result<bool, StoreError>;

    /// Strongly consistent read of a job record and all of its parts.
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// PENDING -> PROCESSING for one item. `false` means another dispatch
    /// already claimed it.
    async fn claim_item(&self, job_id: &str, item_key: &str) -> Result<bool, StoreError>;

    /// Unconditionally set an item to COMPLETED.
    async fn mark_complete(&self, job_id: &str, item_key: &str) -> Result<(), StoreError>;

    /// Set job status to `to` only if it currently is `from`.
    async fn transition_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError>;

    /// Atomic max on the job's completed-items high-water mark; returns the
    /// retained value. A missing job is left absent and yields 0.
    async fn raise_completed_mark(&self, job_id: &str, completed: u64) -> Result<u64, StoreError>;

    // ── Shard control ────────────────────────────────────────────────

    async fn shard_control(&self, family: &str) -> Result<Option<ShardControl>, StoreError>;

    /// Create the control record pointing at `shard_id` unless one exists.
    /// Returns whichever shard is current afterwards.
    async fn init_shard_control(&self, family: &str, shard_id: &str) -> Result<String, StoreError>;

    /// Append `new_shard`, make it current and reset the count, but only if
    /// `expected_current` is still current. Returns the current shard after
    /// the call.
    async fn rollover_shard(
        &self,
        family: &str,
        expected_current: &str,
        new_shard: &str,
    ) -> Result<String, StoreError>;

    /// Atomic add on the family's usage count; returns the new value.
    async fn increment_shard_usage(&self, family: &str, delta: i64) -> Result<i64, StoreError>;

    // ── Result aggregates ────────────────────────────────────────────

    /// Create a zeroed aggregate bound to `shard_id` unless one exists.
    async fn init_aggregate(&self, job_id: &str, shard_id: &str) -> Result<bool, StoreError>;

    /// Shard fixed for the job when its aggregate was created.
    async fn aggregate_shard(&self, job_id: &str) -> Result<Option<String>, StoreError>;

    /// Apply every delta of `update` in one atomic batch.
    async fn apply_aggregate(&self, job_id: &str, update: &AggregateUpdate) -> Result<(), StoreError>;

    async fn get_aggregate(&self, job_id: &str) -> Result<Option<ResultAggregate>, StoreError>;

    // ── Per-frame records ────────────────────────────────────────────

    async fn put_frame_result(&self, job_id: &str, result: &FrameResult) -> Result<(), StoreError>;

    async fn put_frame_labels(&self, job_id: &str, labels: &FrameLabels) -> Result<(), StoreError>;

    /// All per-frame labels of a job ordered by frame time.
    async fn frame_labels(&self, job_id: &str) -> Result<Vec<FrameLabels>, StoreError>;

    // ── Search matches ───────────────────────────────────────────────

    /// Append matches found by one search item.
    async fn append_search_matches(&self, job_id: &str, matches: &[SearchMatch]) -> Result<(), StoreError>;

    /// Every match recorded for a search job, in arrival order.
    async fn search_matches(&self, job_id: &str) -> Result<Vec<SearchMatch>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Reject status writes that would move a job backwards.
pub fn ensure_transition(from: JobStatus, to: JobStatus) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}
