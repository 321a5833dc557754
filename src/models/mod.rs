pub mod aggregate;
pub mod analysis;
pub mod frame;
pub mod job;
pub mod progress;
pub mod search;
pub mod shard;
