pub mod aggregate;
pub mod analysis;
pub mod backoff;
pub mod change_feed;
pub mod encryption;
pub mod manifest;
pub mod notifier;
pub mod queue;
pub mod redis_store;
pub mod search;
pub mod shards;
pub mod storage;
pub mod store;
pub mod timeline;
pub mod tracker;
pub mod worker;
