use async_trait::async_trait;
use redis::AsyncCommands;

use crate::models::progress::{Milestone, ProgressEvent, ResultNotice};

/// Best-effort channel for user-facing progress and lifecycle milestones.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event` unless its topic is the "none" sentinel.
    async fn publish(&self, event: &ProgressEvent) -> Result<(), NotifyError>;

    async fn milestone(&self, milestone: &Milestone) -> Result<(), NotifyError>;

    /// Announce a result object; shares the milestone channel.
    async fn result(&self, notice: &ResultNotice) -> Result<(), NotifyError>;
}

/// Redis pub/sub notifier.
pub struct RedisNotifier {
    client: redis::Client,
    progress_channel: String,
    milestone_channel: String,
}

impl RedisNotifier {
    pub fn new(
        redis_url: &str,
        progress_channel: &str,
        milestone_channel: &str,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            progress_channel: progress_channel.to_string(),
            milestone_channel: milestone_channel.to_string(),
        })
    }

    async fn send(&self, channel: &str, payload: String) -> Result<(), NotifyError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let receivers: u64 = conn.publish(channel, payload).await?;
        tracing::debug!(channel, receivers, "Published notification");
        Ok(())
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, event: &ProgressEvent) -> Result<(), NotifyError> {
        if !event.is_deliverable() {
            return Ok(());
        }
        self.send(&self.progress_channel, serde_json::to_string(event)?)
            .await
    }

    async fn milestone(&self, milestone: &Milestone) -> Result<(), NotifyError> {
        self.send(&self.milestone_channel, serde_json::to_string(milestone)?)
            .await
    }

    async fn result(&self, notice: &ResultNotice) -> Result<(), NotifyError> {
        self.send(&self.milestone_channel, serde_json::to_string(notice)?)
            .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
