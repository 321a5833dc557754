use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Topic value that suppresses progress delivery for a job.
pub const NO_TOPIC: &str = "none";

/// Lifecycle of a parent job (one video).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Processing,
    Consolidating,
    Extracting,
    Completed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Processing => 0,
            JobStatus::Consolidating | JobStatus::Extracting => 1,
            JobStatus::Completed => 2,
        }
    }

    /// Status only moves forward: PROCESSING -> {CONSOLIDATING|EXTRACTING} -> COMPLETED.
    /// PROCESSING may also go straight to COMPLETED.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// What a job's items are: frame batches to analyse, or collection
/// batches an image is searched against.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, EnumString, Display, PartialEq, Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    #[default]
    Analysis,
    Search,
}

/// Status of one item inside a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PartStatus {
    Pending,
    Processing,
    Completed,
}

/// A parent job and the status of each of its items.
///
/// `parts` is a `BTreeMap` so that pending items are always released in
/// the same order no matter which replica reads the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub kind: JobKind,
    pub status: JobStatus,
    pub parts: BTreeMap<String, PartStatus>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// New PROCESSING analysis job with every item PENDING.
    pub fn new<I, S>(id: impl Into<String>, topic: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            topic: topic.into(),
            kind: JobKind::Analysis,
            status: JobStatus::Processing,
            parts: items
                .into_iter()
                .map(|k| (k.into(), PartStatus::Pending))
                .collect(),
            created_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn has_topic(&self) -> bool {
        self.topic != NO_TOPIC
    }

    /// Scan the parts map into a status histogram plus the pending keys in
    /// map order.
    pub fn histogram(&self) -> PartHistogram {
        let mut histogram = PartHistogram {
            total: self.parts.len() as u64,
            ..PartHistogram::default()
        };

        for (key, status) in &self.parts {
            match status {
                PartStatus::Completed => histogram.completed += 1,
                PartStatus::Processing => histogram.in_progress += 1,
                PartStatus::Pending => histogram.pending.push(key.clone()),
            }
        }

        histogram
    }
}

/// Per-job item counts for one tracker cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartHistogram {
    pub total: u64,
    pub completed: u64,
    pub in_progress: u64,
    pub pending: Vec<String>,
}

impl PartHistogram {
    /// No item has been claimed or finished yet.
    pub fn is_fresh(&self) -> bool {
        self.completed == 0 && self.in_progress == 0
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.completed == self.total
    }

    /// How many pending items may be released this cycle.
    pub fn dispatch_budget(&self, max_concurrent: u32) -> usize {
        let budget = i64::from(max_concurrent) - self.in_progress as i64;
        if budget <= 0 {
            return 0;
        }
        (budget as usize).min(self.pending.len())
    }
}

/// Fire-and-forget message asking a worker to process one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchMessage {
    pub job_id: String,
    pub item_key: String,
    /// Which worker handles the item.
    #[serde(default)]
    pub kind: JobKind,
}

/// Kind of write that produced a change record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

/// One entry of an inbound change notification. Carries no state; the
/// tracker always reads the stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub job_id: String,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn modify(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind: ChangeKind::Modify,
        }
    }
}
