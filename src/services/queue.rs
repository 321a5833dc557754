use async_trait::async_trait;
use redis::AsyncCommands;

use crate::models::job::DispatchMessage;

const QUEUE_KEY: &str = "fanout:dispatch";
const PROCESSING_KEY: &str = "fanout:dispatch:processing";

/// Fire-and-forget delivery of work dispatch notifications.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, message: &DispatchMessage) -> Result<(), QueueError>;
}

/// Redis list queue between the tracker and the analysis workers.
pub struct DispatchQueue {
    client: redis::Client,
}

impl DispatchQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Pop the oldest message, parking it on the processing list until
    /// [`DispatchQueue::complete`] is called.
    pub async fn dequeue(&self) -> Result<Option<DispatchMessage>, QueueError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove a handled message from the processing list.
    pub async fn complete(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(message)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    /// Messages waiting for a worker.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(QUEUE_KEY).await?)
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for DispatchQueue {
    async fn dispatch(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(message)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
