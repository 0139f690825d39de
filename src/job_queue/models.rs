//! Data models for the transcode queue.
//!
//! Defines queue jobs, statuses, payloads, and related types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a transcode queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    RetryWaiting,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::RetryWaiting => "RETRY_WAITING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "RETRY_WAITING" => Some(JobStatus::RetryWaiting),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Payload of a transcode request, as enqueued by the producing application.
///
/// The required fields are optional at the serde boundary: a malformed
/// payload still deserializes and fails through the normal pipeline.
/// [`JobPayload::validate`] enforces presence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobPayload {
    /// Identifier of the sound record in the producing application.
    pub sound_id: Option<String>,
    /// Object-store key of the original uploaded file.
    pub source_key: Option<String>,
    /// Callback URL for completion notification.
    pub webhook_url: Option<String>,
    /// Shared secret the callback receiver authenticates against.
    pub secret: Option<String>,
}

impl JobPayload {
    pub fn new(sound_id: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            sound_id: Some(sound_id.into()),
            source_key: Some(source_key.into()),
            webhook_url: None,
            secret: None,
        }
    }

    pub fn with_callback(mut self, url: impl Into<String>, secret: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self.secret = Some(secret.into());
        self
    }

    /// Check the required fields and produce a validated envelope.
    ///
    /// Empty strings count as missing, matching the behavior of the
    /// producing application's own checks. The callback target is only
    /// populated when both the URL and the secret are present.
    pub fn validate(&self) -> Result<Envelope, ValidationError> {
        let source_key = match self.source_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return Err(ValidationError::MissingSourceKey),
        };
        let sound_id = match self.sound_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ValidationError::MissingSoundId),
        };

        let callback = match (self.webhook_url.as_deref(), self.secret.as_deref()) {
            (Some(url), Some(secret)) if !url.is_empty() && !secret.is_empty() => {
                Some(CallbackTarget {
                    url: url.to_string(),
                    secret: secret.to_string(),
                })
            }
            _ => None,
        };

        Ok(Envelope {
            sound_id,
            source_key,
            callback,
        })
    }
}

/// Errors raised by [`JobPayload::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing soundId in job payload")]
    MissingSoundId,

    #[error("missing sourceKey in job payload")]
    MissingSourceKey,
}

/// A payload whose required fields have been checked.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sound_id: String,
    pub source_key: String,
    pub callback: Option<CallbackTarget>,
}

/// Where to deliver the completion callback.
#[derive(Debug, Clone)]
pub struct CallbackTarget {
    pub url: String,
    pub secret: String,
}

/// A transcode job row in the queue.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Unique identifier (UUID), assigned at enqueue time.
    pub id: String,
    /// Current status in the state machine.
    pub status: JobStatus,
    /// The request payload as enqueued by the producer.
    pub payload: JobPayload,
    /// When the job was added to the queue (Unix timestamp, seconds).
    pub created_at: i64,
    /// When the current/last attempt started.
    pub started_at: Option<i64>,
    /// When the job reached a terminal state.
    pub completed_at: Option<i64>,
    /// Earliest time the next retry may be claimed.
    pub next_retry_at: Option<i64>,
    /// Number of attempts delivered so far (incremented at claim).
    pub attempt_count: i32,
    /// Attempt ceiling before the job is failed permanently.
    pub max_attempts: i32,
    /// Error message from the most recent failed attempt.
    pub error_message: Option<String>,
    /// Wall-clock duration of the successful attempt.
    pub processing_duration_ms: Option<i64>,
}

/// Counts of jobs per status, for operator inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub retry_waiting: usize,
    pub completed: usize,
    pub failed: usize,
}
