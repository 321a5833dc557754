use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::frame::FrameLabels;
use crate::models::progress::{ResultKind, ResultNotice};
use crate::services::encryption::{EncryptionError, ResultCipher};
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::store::{Store, StoreError};

/// Every label seen in a video and the seconds at which it appears.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelTimeline {
    pub tags: Vec<TagTimes>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagTimes {
    pub tag: String,
    pub times: Vec<i64>,
}

/// Group per-frame labels by tag. Tags come out sorted; times keep frame
/// order as given.
pub fn build_label_timeline(frames: &[FrameLabels]) -> LabelTimeline {
    let mut by_tag: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for frame in frames {
        let seconds = frame.time / 1000;
        for label in &frame.labels {
            by_tag.entry(label.as_str()).or_default().push(seconds);
        }
    }

    LabelTimeline {
        tags: by_tag
            .into_iter()
            .map(|(tag, times)| TagTimes {
                tag: tag.to_string(),
                times,
            })
            .collect(),
    }
}

pub fn timeline_key(job_id: &str) -> String {
    format!("labels/{job_id}.json")
}

/// Writes a completed job's label timeline to the object store.
pub struct TimelinePublisher {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStore>,
    cipher: Arc<ResultCipher>,
}

impl TimelinePublisher {
    pub fn new(store: Arc<dyn Store>, storage: Arc<dyn ObjectStore>, cipher: Arc<ResultCipher>) -> Self {
        Self {
            store,
            storage,
            cipher,
        }
    }

    /// Build and overwrite `labels/{job_id}.json`; returns the notice
    /// announcing where it landed.
    pub async fn publish(&self, job_id: &str) -> Result<ResultNotice, TimelineError> {
        let frames = self.store.frame_labels(job_id).await?;
        let timeline = build_label_timeline(&frames);
        let sealed = self.cipher.seal_json(&timeline)?;

        let key = timeline_key(job_id);
        self.storage.put(&key, &sealed, "application/json").await?;

        tracing::info!(job_id = %job_id, key = %key, tags = timeline.tags.len(), "Label timeline published");
        Ok(ResultNotice {
            kind: ResultKind::Tags,
            bucket: self.storage.bucket_name().to_string(),
            key,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
}
