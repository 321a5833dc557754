use std::str::FromStr;

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::models::job::{ChangeKind, ChangeRecord};
use crate::services::redis_store::CHANGE_STREAM;

/// One read from the change stream.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    pub records: Vec<ChangeRecord>,
    /// Entry id of each record, position for position.
    pub record_ids: Vec<String>,
    /// Entries that could not be parsed. Acknowledged with the batch since
    /// a replay cannot fix them.
    pub malformed_ids: Vec<String>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty() && self.malformed_ids.is_empty()
    }

    /// Entry ids safe to acknowledge: everything except the records at the
    /// `failed` positions.
    pub fn settled_ids(&self, failed: &[usize]) -> Vec<String> {
        self.record_ids
            .iter()
            .enumerate()
            .filter(|(position, _)| !failed.contains(position))
            .map(|(_, id)| id.clone())
            .chain(self.malformed_ids.iter().cloned())
            .collect()
    }
}

/// Consumer-group reader over the job change stream.
///
/// Delivery is at-least-once: entries are only acknowledged once the
/// tracker has handled them, so a crash or a failed record replays them.
pub struct ChangeFeed {
    conn: redis::aio::MultiplexedConnection,
    group: String,
    consumer: String,
    batch_size: usize,
    block_ms: usize,
    /// While set, reads walk this consumer's unacknowledged entries after
    /// the given id instead of waiting for new ones.
    replay_from: Option<String>,
}

impl ChangeFeed {
    pub async fn connect(
        redis_url: &str,
        group: &str,
        consumer: &str,
        batch_size: usize,
        block_ms: usize,
    ) -> Result<Self, FeedError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(CHANGE_STREAM, group, "0")
            .await
        {
            Ok(()) => tracing::info!(stream = CHANGE_STREAM, group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            conn,
            group: group.to_string(),
            consumer: consumer.to_string(),
            batch_size,
            block_ms,
            replay_from: Some("0".to_string()),
        })
    }

    /// Walk the unacknowledged entries again from the start before reading
    /// new ones. A pass already under way carries on from where it is.
    pub fn replay_pending(&mut self) {
        if self.replay_from.is_none() {
            self.replay_from = Some("0".to_string());
        }
    }

    /// Next batch of change records, or an empty batch when the block
    /// timeout passes without new entries.
    pub async fn next_batch(&mut self) -> Result<ChangeBatch, FeedError> {
        let start = self.replay_from.clone().unwrap_or_else(|| ">".to_string());
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size);
        if self.replay_from.is_none() {
            options = options.block(self.block_ms);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[CHANGE_STREAM], &[start.as_str()], &options)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        if self.replay_from.is_some() {
            self.replay_from = entries.last().map(|entry| entry.id.clone());
            if self.replay_from.is_none() {
                tracing::debug!(consumer = %self.consumer, "No unacknowledged changes left to replay");
            }
        }

        let mut batch = ChangeBatch::default();
        for entry in entries {
            match parse_entry(&entry) {
                Some(record) => {
                    batch.records.push(record);
                    batch.record_ids.push(entry.id);
                }
                None => {
                    tracing::warn!(entry_id = %entry.id, "Skipping malformed change entry");
                    batch.malformed_ids.push(entry.id);
                }
            }
        }
        Ok(batch)
    }

    pub async fn ack(&mut self, entry_ids: &[String]) -> Result<(), FeedError> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        self.conn
            .xack::<_, _, _, ()>(CHANGE_STREAM, &self.group, entry_ids)
            .await?;
        Ok(())
    }
}

fn parse_entry(entry: &StreamId) -> Option<ChangeRecord> {
    let job_id: String = entry.get("job_id")?;
    let kind: String = entry.get("kind")?;
    Some(ChangeRecord {
        job_id,
        kind: ChangeKind::from_str(&kind).ok()?,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
