use garde::Validate;
use serde::Deserialize;

use crate::models::progress::StageBounds;
use crate::services::aggregate::Thresholds;
use crate::services::backoff::BackoffPolicy;
use crate::services::search::SearchSettings;
use crate::services::tracker::TrackerSettings;
use crate::services::worker::WorkerSettings;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Tracker health/metrics bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Redis connection string: store, dispatch queue, change stream and pub/sub
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// Object store bucket holding frames, manifests and results
    #[garde(length(min = 1, max = 63))]
    pub storage_bucket: String,

    /// Object store endpoint URL (S3-compatible)
    #[garde(length(min = 1))]
    pub storage_endpoint: String,

    #[serde(default = "default_storage_region")]
    #[garde(length(min = 1))]
    pub storage_region: String,

    #[garde(length(min = 1))]
    pub storage_access_key: String,

    #[garde(length(min = 1))]
    pub storage_secret_key: String,

    /// Analysis service base URL
    #[garde(length(min = 1))]
    pub analysis_endpoint: String,

    #[garde(length(min = 1))]
    pub analysis_api_token: String,

    /// AES-256-GCM key for result objects (base64-encoded, 32 bytes)
    #[garde(length(min = 1))]
    pub encryption_key: String,

    /// Items of one job allowed in flight at once
    #[serde(default = "default_max_concurrent_dispatches")]
    #[garde(range(min = 1, max = 1000))]
    pub max_concurrent_dispatches: u32,

    /// Usage at which a collection is rolled over
    #[serde(default = "default_max_shard_size")]
    #[garde(range(min = 1))]
    pub max_shard_size: i64,

    #[serde(default = "default_shard_prefix")]
    #[garde(length(min = 1, max = 32))]
    pub shard_prefix: String,

    #[serde(default = "default_shard_family")]
    #[garde(length(min = 1))]
    pub shard_family: String,

    #[serde(default = "default_progress_initial")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub progress_initial: f64,

    #[serde(default = "default_progress_final")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub progress_final: f64,

    /// Progress range of an image search
    #[serde(default = "default_search_progress_initial")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub search_progress_initial: f64,

    #[serde(default = "default_search_progress_final")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub search_progress_final: f64,

    /// Minimum similarity of a reported search match
    #[serde(default = "default_search_face_match_threshold")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub search_face_match_threshold: f64,

    #[serde(default = "default_backoff_max_attempts")]
    #[garde(range(min = 1, max = 20))]
    pub backoff_max_attempts: u32,

    #[serde(default = "default_backoff_max_seconds")]
    #[garde(range(min = 1, max = 300))]
    pub backoff_max_seconds: u64,

    /// Analysis calls in flight per item
    #[serde(default = "default_worker_pool_width")]
    #[garde(range(min = 1, max = 64))]
    pub worker_pool_width: usize,

    #[serde(default = "default_face_confidence_threshold")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub face_confidence_threshold: f64,

    #[serde(default = "default_attribute_confidence_threshold")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub attribute_confidence_threshold: f64,

    #[serde(default = "default_label_confidence_threshold")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub label_confidence_threshold: f64,

    #[serde(default = "default_max_labels")]
    #[garde(range(min = 1, max = 1000))]
    pub max_labels: u32,

    #[serde(default = "default_change_batch_size")]
    #[garde(range(min = 1, max = 1000))]
    pub change_batch_size: usize,

    #[serde(default = "default_change_block_ms")]
    #[garde(range(min = 1, max = 60_000))]
    pub change_block_ms: usize,

    #[serde(default = "default_progress_channel")]
    #[garde(length(min = 1))]
    pub progress_channel: String,

    #[serde(default = "default_milestone_channel")]
    #[garde(length(min = 1))]
    pub milestone_channel: String,

    #[serde(default = "default_results_bucket_prefix")]
    #[garde(length(min = 1))]
    pub results_bucket_prefix: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_storage_region() -> String {
    "auto".to_string()
}

fn default_max_concurrent_dispatches() -> u32 {
    5
}

fn default_max_shard_size() -> i64 {
    100_000
}

fn default_shard_prefix() -> String {
    "DVA-".to_string()
}

fn default_shard_family() -> String {
    "COLLECTIONS".to_string()
}

fn default_progress_initial() -> f64 {
    60.0
}

fn default_progress_final() -> f64 {
    90.0
}

fn default_search_progress_initial() -> f64 {
    20.0
}

fn default_search_progress_final() -> f64 {
    95.0
}

fn default_search_face_match_threshold() -> f64 {
    85.0
}

fn default_backoff_max_attempts() -> u32 {
    5
}

fn default_backoff_max_seconds() -> u64 {
    15
}

fn default_worker_pool_width() -> usize {
    4
}

fn default_face_confidence_threshold() -> f64 {
    95.0
}

fn default_attribute_confidence_threshold() -> f64 {
    90.0
}

fn default_label_confidence_threshold() -> f64 {
    90.0
}

fn default_max_labels() -> u32 {
    10
}

fn default_change_batch_size() -> usize {
    25
}

fn default_change_block_ms() -> usize {
    5000
}

fn default_progress_channel() -> String {
    "fanout:progress".to_string()
}

fn default_milestone_channel() -> String {
    "fanout:milestones".to_string()
}

fn default_results_bucket_prefix() -> String {
    "results".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Field ranges plus the checks spanning several fields.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|report| ConfigError::Invalid(report.to_string()))?;

        if self.progress_initial >= self.progress_final {
            return Err(ConfigError::Invalid(format!(
                "progress_initial ({}) must be below progress_final ({})",
                self.progress_initial, self.progress_final
            )));
        }
        if self.search_progress_initial >= self.search_progress_final {
            return Err(ConfigError::Invalid(format!(
                "search_progress_initial ({}) must be below search_progress_final ({})",
                self.search_progress_initial, self.search_progress_final
            )));
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            max_concurrent_dispatches: self.max_concurrent_dispatches,
            analysis_stage: StageBounds::new(self.progress_initial, self.progress_final),
            search_stage: StageBounds::new(self.search_progress_initial, self.search_progress_final),
        }
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            pool_width: self.worker_pool_width,
            face_match_threshold: self.search_face_match_threshold,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            pool_width: self.worker_pool_width,
            thresholds: Thresholds {
                face_response: self.face_confidence_threshold,
                attribute: self.attribute_confidence_threshold,
            },
            label_min_confidence: self.label_confidence_threshold,
            max_labels: self.max_labels,
            results_prefix: self.results_bucket_prefix.clone(),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.backoff_max_attempts,
            std::time::Duration::from_secs(self.backoff_max_seconds),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
