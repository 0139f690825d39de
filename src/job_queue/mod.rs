//! Durable transcode job queue.
//!
//! Jobs move through a small state machine:
//! PENDING → IN_PROGRESS → COMPLETED, or on failure → RETRY_WAITING →
//! PENDING (until the attempt ceiling) → FAILED. Attempts that never report
//! an outcome are returned to PENDING once their lease expires.

mod models;
mod retry_policy;
mod schema;
mod store;

pub use models::{
    CallbackTarget, Envelope, JobPayload, JobStatus, QueueStats, TranscodeJob, ValidationError,
};
pub use retry_policy::RetryPolicy;
pub use store::{SqliteQueueStore, TranscodeQueueStore};

#[cfg(feature = "mock")]
pub use store::MockTranscodeQueueStore;
