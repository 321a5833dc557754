use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};

use crate::models::aggregate::{AggregateUpdate, ResultAggregate, SHARD_FIELD};
use crate::models::frame::{FrameLabels, FrameResult};
use crate::models::job::{ChangeKind, JobKind, JobRecord, JobStatus, PartStatus};
use crate::models::search::SearchMatch;
use crate::models::shard::ShardControl;
use crate::services::store::{ensure_transition, Store, StoreError};

/// Stream every job write is appended to; consumed by the tracker.
pub const CHANGE_STREAM: &str = "fanout:changes";

/// Approximate cap on retained change entries.
const CHANGE_STREAM_MAX_LEN: &str = "100000";

/// Insert a job with all parts PENDING if absent.
/// KEYS: job, parts, stream. ARGV: job_id, topic, status, created_at, maxlen, kind, parts...
const CREATE_JOB: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'topic', ARGV[2], 'status', ARGV[3], 'created_at', ARGV[4], 'kind', ARGV[6], 'max_completed', 0)
for i = 7, #ARGV do
  redis.call('HSET', KEYS[2], ARGV[i], 'PENDING')
end
redis.call('XADD', KEYS[3], 'MAXLEN', '~', ARGV[5], '*', 'job_id', ARGV[1], 'kind', 'insert')
return 1
"#;

/// Compare-and-set one hash field, announcing the change on success.
/// KEYS: hash, stream. ARGV: field, expected, new, job_id, maxlen.
const COMPARE_AND_SET: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[5], '*', 'job_id', ARGV[4], 'kind', 'modify')
return 1
"#;

/// Keep the larger of the stored and candidate mark. Never creates the job.
/// KEYS: job. ARGV: candidate.
const RAISE_MARK: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local current = tonumber(redis.call('HGET', KEYS[1], 'max_completed') or '0')
local candidate = tonumber(ARGV[1])
if candidate > current then
  redis.call('HSET', KEYS[1], 'max_completed', candidate)
  return candidate
end
return current
"#;

/// KEYS: control, ids. ARGV: shard.
const INIT_SHARD_CONTROL: &str = r#"
local current = redis.call('HGET', KEYS[1], 'current')
if current then
  return current
end
redis.call('HSET', KEYS[1], 'current', ARGV[1], 'count', 0)
redis.call('RPUSH', KEYS[2], ARGV[1])
return ARGV[1]
"#;

/// KEYS: control, ids. ARGV: expected current, new shard.
const ROLLOVER_SHARD: &str = r#"
local current = redis.call('HGET', KEYS[1], 'current')
if current ~= ARGV[1] then
  return current
end
redis.call('HSET', KEYS[1], 'current', ARGV[2], 'count', 0)
redis.call('RPUSH', KEYS[2], ARGV[2])
return ARGV[2]
"#;

/// KEYS: aggregate. ARGV: field, value, field, value...
const INIT_AGGREGATE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// Redis-backed implementation of [`Store`].
pub struct RedisStore {
    client: redis::Client,
    create_job: Script,
    compare_and_set: Script,
    raise_mark: Script,
    init_shard_control: Script,
    rollover_shard: Script,
    init_aggregate: Script,
}

fn job_key(job_id: &str) -> String {
    format!("fanout:job:{job_id}")
}

fn parts_key(job_id: &str) -> String {
    format!("fanout:job:{job_id}:parts")
}

fn control_key(family: &str) -> String {
    format!("fanout:shards:{family}")
}

fn shard_ids_key(family: &str) -> String {
    format!("fanout:shards:{family}:ids")
}

fn aggregate_key(job_id: &str) -> String {
    format!("fanout:results:{job_id}")
}

fn aggregate_labels_key(job_id: &str) -> String {
    format!("fanout:results:{job_id}:labels")
}

fn frame_results_key(job_id: &str) -> String {
    format!("fanout:frames:{job_id}")
}

fn frame_labels_key(job_id: &str) -> String {
    format!("fanout:frame-labels:{job_id}")
}

fn search_matches_key(job_id: &str) -> String {
    format!("fanout:search:{job_id}")
}

fn corrupt(key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            create_job: Script::new(CREATE_JOB),
            compare_and_set: Script::new(COMPARE_AND_SET),
            raise_mark: Script::new(RAISE_MARK),
            init_shard_control: Script::new(INIT_SHARD_CONTROL),
            rollover_shard: Script::new(ROLLOVER_SHARD),
            init_aggregate: Script::new(INIT_AGGREGATE),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn swap_field(
        &self,
        hash_key: &str,
        field: &str,
        expected: &str,
        new: &str,
        job_id: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let swapped: i64 = self
            .compare_and_set
            .key(hash_key)
            .key(CHANGE_STREAM)
            .arg(field)
            .arg(expected)
            .arg(new)
            .arg(job_id)
            .arg(CHANGE_STREAM_MAX_LEN)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}

fn parse_job(
    job_id: &str,
    fields: HashMap<String, String>,
    parts: HashMap<String, String>,
) -> Result<JobRecord, StoreError> {
    let key = job_key(job_id);
    let status = fields
        .get("status")
        .ok_or_else(|| corrupt(&key, "missing status"))?
        .parse::<JobStatus>()
        .map_err(|e| corrupt(&key, e.to_string()))?;
    let created_at = fields
        .get("created_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    // Jobs written before search existed carry no kind.
    let kind = fields
        .get("kind")
        .map(|raw| raw.parse::<JobKind>())
        .transpose()
        .map_err(|e| corrupt(&key, e.to_string()))?
        .unwrap_or_default();

    let parts = parts
        .into_iter()
        .map(|(item, status)| {
            status
                .parse::<PartStatus>()
                .map(|status| (item, status))
                .map_err(|e| corrupt(&parts_key(job_id), e.to_string()))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(JobRecord {
        id: job_id.to_string(),
        topic: fields.get("topic").cloned().unwrap_or_default(),
        kind,
        status,
        parts,
        created_at,
    })
}

#[async_trait]
impl Store for RedisStore {
    async fn create_job(&self, job: &JobRecord) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let mut invocation = self.create_job.key(job_key(&job.id));
        invocation
            .key(parts_key(&job.id))
            .key(CHANGE_STREAM)
            .arg(&job.id)
            .arg(&job.topic)
            .arg(job.status.to_string())
            .arg(job.created_at.to_rfc3339())
            .arg(CHANGE_STREAM_MAX_LEN)
            .arg(job.kind.to_string());
        for item in job.parts.keys() {
            invocation.arg(item);
        }
        let created: i64 = invocation.invoke_async(&mut conn).await?;

        tracing::debug!(job_id = %job.id, kind = %ChangeKind::Insert, created = created == 1, "create_job");
        Ok(created == 1)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let (fields, parts): (HashMap<String, String>, HashMap<String, String>) = redis::pipe()
            .hgetall(job_key(job_id))
            .hgetall(parts_key(job_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        parse_job(job_id, fields, parts).map(Some)
    }

    async fn claim_item(&self, job_id: &str, item_key: &str) -> Result<bool, StoreError> {
        self.swap_field(
            &parts_key(job_id),
            item_key,
            &PartStatus::Pending.to_string(),
            &PartStatus::Processing.to_string(),
            job_id,
        )
        .await
    }

    async fn mark_complete(&self, job_id: &str, item_key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(parts_key(job_id), item_key, PartStatus::Completed.to_string())
            .ignore()
            .cmd("XADD")
            .arg(CHANGE_STREAM)
            .arg("MAXLEN")
            .arg("~")
            .arg(CHANGE_STREAM_MAX_LEN)
            .arg("*")
            .arg("job_id")
            .arg(job_id)
            .arg("kind")
            .arg(ChangeKind::Modify.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn transition_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        self.swap_field(
            &job_key(job_id),
            "status",
            &from.to_string(),
            &to.to_string(),
            job_id,
        )
        .await
    }

    async fn raise_completed_mark(&self, job_id: &str, completed: u64) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let mark: i64 = self
            .raise_mark
            .key(job_key(job_id))
            .arg(completed)
            .invoke_async(&mut conn)
            .await?;
        Ok(mark.max(0) as u64)
    }

    async fn shard_control(&self, family: &str) -> Result<Option<ShardControl>, StoreError> {
        let mut conn = self.connection().await?;
        let (fields, shard_ids): (HashMap<String, String>, Vec<String>) = redis::pipe()
            .hgetall(control_key(family))
            .lrange(shard_ids_key(family), 0, -1)
            .query_async(&mut conn)
            .await?;

        let Some(current_shard_id) = fields.get("current").cloned() else {
            return Ok(None);
        };
        let count = fields
            .get("count")
            .map(|raw| raw.parse::<i64>())
            .transpose()
            .map_err(|e| corrupt(&control_key(family), e.to_string()))?
            .unwrap_or(0);

        Ok(Some(ShardControl {
            current_shard_id,
            count,
            shard_ids,
        }))
    }

    async fn init_shard_control(&self, family: &str, shard_id: &str) -> Result<String, StoreError> {
        let mut conn = self.connection().await?;
        let current: String = self
            .init_shard_control
            .key(control_key(family))
            .key(shard_ids_key(family))
            .arg(shard_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(current)
    }

    async fn rollover_shard(
        &self,
        family: &str,
        expected_current: &str,
        new_shard: &str,
    ) -> Result<String, StoreError> {
        let mut conn = self.connection().await?;
        let current: Option<String> = self
            .rollover_shard
            .key(control_key(family))
            .key(shard_ids_key(family))
            .arg(expected_current)
            .arg(new_shard)
            .invoke_async(&mut conn)
            .await?;
        current.ok_or_else(|| corrupt(&control_key(family), "rollover without control record"))
    }

    async fn increment_shard_usage(&self, family: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let count: i64 = conn.hincr(control_key(family), "count", delta).await?;
        Ok(count)
    }

    async fn init_aggregate(&self, job_id: &str, shard_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let mut invocation = self.init_aggregate.key(aggregate_key(job_id));
        for (field, value) in ResultAggregate::zeroed_fields(shard_id) {
            invocation.arg(field).arg(value);
        }
        let created: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(created == 1)
    }

    async fn aggregate_shard(&self, job_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let shard: Option<String> = conn.hget(aggregate_key(job_id), SHARD_FIELD).await?;
        Ok(shard)
    }

    async fn apply_aggregate(&self, job_id: &str, update: &AggregateUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }

        let counters_key = aggregate_key(job_id);
        let labels_key = aggregate_labels_key(job_id);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (path, delta) in update.counters() {
            pipe.hincr(&counters_key, path, *delta).ignore();
        }
        for (label, delta) in update.labels() {
            pipe.hincr(&labels_key, label, *delta).ignore();
        }

        let mut conn = self.connection().await?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_aggregate(&self, job_id: &str) -> Result<Option<ResultAggregate>, StoreError> {
        let mut conn = self.connection().await?;
        let (fields, labels): (HashMap<String, String>, HashMap<String, i64>) = redis::pipe()
            .hgetall(aggregate_key(job_id))
            .hgetall(aggregate_labels_key(job_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResultAggregate::from_fields(fields, labels)))
    }

    async fn put_frame_result(&self, job_id: &str, result: &FrameResult) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(result)?;
        conn.hset::<_, _, _, ()>(frame_results_key(job_id), &result.key, payload)
            .await?;
        Ok(())
    }

    async fn put_frame_labels(&self, job_id: &str, labels: &FrameLabels) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(labels)?;
        conn.hset::<_, _, _, ()>(frame_labels_key(job_id), &labels.key, payload)
            .await?;
        Ok(())
    }

    async fn frame_labels(&self, job_id: &str) -> Result<Vec<FrameLabels>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: HashMap<String, String> = conn.hgetall(frame_labels_key(job_id)).await?;

        let mut frames = Vec::with_capacity(raw.len());
        for (key, payload) in raw {
            match serde_json::from_str::<FrameLabels>(&payload) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    tracing::error!(job_id, frame = %key, error = %e, "Skipping unparsable frame labels");
                }
            }
        }
        frames.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.key.cmp(&b.key)));
        Ok(frames)
    }

    async fn append_search_matches(&self, job_id: &str, matches: &[SearchMatch]) -> Result<(), StoreError> {
        if matches.is_empty() {
            return Ok(());
        }
        let payloads = matches
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(search_matches_key(job_id), payloads).await?;
        Ok(())
    }

    async fn search_matches(&self, job_id: &str) -> Result<Vec<SearchMatch>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(search_matches_key(job_id), 0, -1).await?;
        raw.iter()
            .map(|payload| serde_json::from_str(payload).map_err(StoreError::from))
            .collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
