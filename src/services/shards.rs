use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::services::analysis::AnalysisService;
use crate::services::store::{Store, StoreError};

/// Attempts at creating a shard under a fresh random id before giving up.
pub const MAX_CREATE_ATTEMPTS: u32 = 10;

const SUFFIX_LEN: usize = 10;

/// Hands out the current analysis collection of one family and rolls over
/// to a new one once the current collection is full.
pub struct ShardAllocator {
    store: Arc<dyn Store>,
    analysis: Arc<dyn AnalysisService>,
    family: String,
    prefix: String,
    max_shard_size: i64,
}

impl ShardAllocator {
    pub fn new(
        store: Arc<dyn Store>,
        analysis: Arc<dyn AnalysisService>,
        family: &str,
        prefix: &str,
        max_shard_size: i64,
    ) -> Self {
        Self {
            store,
            analysis,
            family: family.to_string(),
            prefix: prefix.to_string(),
            max_shard_size,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Shard new work should index into, creating or rolling over as needed.
    pub async fn fetch_current_shard(&self) -> Result<String, ShardError> {
        let Some(control) = self.store.shard_control(&self.family).await? else {
            let created = self.create_shard().await?;
            let current = self.store.init_shard_control(&self.family, &created).await?;
            if current != created {
                tracing::warn!(
                    family = %self.family,
                    orphaned = %created,
                    current = %current,
                    "Lost shard initialisation race, collection left unused"
                );
            } else {
                tracing::info!(family = %self.family, shard = %current, "Initialised shard control");
            }
            return Ok(current);
        };

        if !control.is_full(self.max_shard_size) {
            return Ok(control.current_shard_id);
        }

        tracing::info!(
            family = %self.family,
            shard = %control.current_shard_id,
            count = control.count,
            max = self.max_shard_size,
            "Shard full, rolling over"
        );

        let created = self.create_shard().await?;
        let current = self
            .store
            .rollover_shard(&self.family, &control.current_shard_id, &created)
            .await?;

        if current == created {
            metrics::counter!("fanout_shard_rollovers_total").increment(1);
        } else {
            tracing::warn!(
                family = %self.family,
                orphaned = %created,
                current = %current,
                "Concurrent rollover won, collection left unused"
            );
        }
        Ok(current)
    }

    /// Credit `delta` units to the family's current shard.
    ///
    /// The counter is not fenced on `shard_id`: an increment that races a
    /// rollover lands on the new shard.
    pub async fn increment_usage(&self, shard_id: &str, delta: i64) -> Result<i64, ShardError> {
        let count = self.store.increment_shard_usage(&self.family, delta).await?;
        tracing::debug!(family = %self.family, shard = %shard_id, delta, count, "Shard usage incremented");
        Ok(count)
    }

    pub async fn list_shards(&self) -> Result<Vec<String>, ShardError> {
        Ok(self
            .store
            .shard_control(&self.family)
            .await?
            .map(|control| control.shard_ids)
            .unwrap_or_default())
    }

    async fn create_shard(&self) -> Result<String, ShardError> {
        for attempt in 0..MAX_CREATE_ATTEMPTS {
            let shard_id = new_shard_id(&self.prefix);
            match self.analysis.create_collection(&shard_id).await {
                Ok(()) => {
                    tracing::info!(shard = %shard_id, attempt, "Created collection");
                    return Ok(shard_id);
                }
                Err(e) => {
                    tracing::warn!(shard = %shard_id, attempt, error = %e, "Collection creation failed");
                }
            }
        }

        tracing::error!(
            family = %self.family,
            attempts = MAX_CREATE_ATTEMPTS,
            "Giving up on collection creation"
        );
        Err(ShardError::CreationExhausted {
            attempts: MAX_CREATE_ATTEMPTS,
        })
    }
}

/// `prefix` followed by a random uppercase alphanumeric suffix.
pub fn new_shard_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("{prefix}{suffix}")
}

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Could not create a collection after {attempts} attempts")]
    CreationExhausted { attempts: u32 },
}
