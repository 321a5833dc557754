//! Fan-out coordinator for per-frame video analysis.
//!
//! A tracker process follows job change notifications, releases frame
//! batches to analysis workers under a per-job concurrency budget and
//! reports progress; worker processes claim each batch exactly once, call
//! the external face/label analysis service and fold the results into the
//! job's aggregate record. All coordination goes through Redis.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
