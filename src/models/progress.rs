use serde::{Deserialize, Serialize};

use super::job::{JobStatus, NO_TOPIC};

/// Message pushed to the notification channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub payload: ProgressPayload,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Status,
    Redirect,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl ProgressEvent {
    pub fn status(topic: &str, message: &str, percentage: u32) -> Self {
        Self {
            topic: topic.to_string(),
            kind: ProgressKind::Status,
            payload: ProgressPayload {
                message: Some(message.to_string()),
                percentage: Some(percentage),
                identifier: None,
            },
        }
    }

    pub fn redirect(topic: &str, job_id: &str) -> Self {
        Self {
            topic: topic.to_string(),
            kind: ProgressKind::Redirect,
            payload: ProgressPayload {
                identifier: Some(job_id.to_string()),
                ..ProgressPayload::default()
            },
        }
    }

    pub fn is_deliverable(&self) -> bool {
        self.topic != NO_TOPIC
    }
}

/// Lifecycle milestone, published once a job is observed in a new status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Milestone {
    pub identifier: String,
    pub status: JobStatus,
}

/// Announces a result object written for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ResultNotice {
    #[serde(rename = "Type")]
    pub kind: ResultKind,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultKind {
    /// Label timeline of a video.
    Tags,
}

/// Start and end percentage of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBounds {
    pub initial: f64,
    pub last: f64,
}

impl StageBounds {
    pub fn new(initial: f64, last: f64) -> Self {
        Self { initial, last }
    }

    /// `round(initial + (last - initial) * done / total)`; `None` when
    /// either count is zero, since nothing meaningful can be shown yet.
    pub fn percentage(&self, done: u64, total: u64) -> Option<u32> {
        if total == 0 || done == 0 {
            return None;
        }
        let done = done.min(total) as f64;
        let value = self.initial + (self.last - self.initial) * done / total as f64;
        Some(value.round() as u32)
    }
}
