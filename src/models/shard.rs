use serde::{Deserialize, Serialize};

/// Control record for one family of size-bounded analysis collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardControl {
    /// Shard new work should index into.
    pub current_shard_id: String,
    /// Usage of `current_shard_id`; reset to 0 on rollover.
    pub count: i64,
    /// Every shard ever created for the family, oldest first.
    pub shard_ids: Vec<String>,
}

impl ShardControl {
    pub fn new(shard_id: impl Into<String>) -> Self {
        let shard_id = shard_id.into();
        Self {
            current_shard_id: shard_id.clone(),
            count: 0,
            shard_ids: vec![shard_id],
        }
    }

    pub fn is_full(&self, max_shard_size: i64) -> bool {
        self.count > max_shard_size
    }
}
