//! Soundmap Transcode Worker Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod job_queue;
pub mod notifier;
pub mod object_store;
pub mod staging;
pub mod transcoding;
pub mod worker;

// Re-export commonly used types for convenience
pub use job_queue::{JobPayload, JobStatus, SqliteQueueStore, TranscodeQueueStore};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use worker::{JobOutcome, TranscodeWorker};
