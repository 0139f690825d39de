//! Worker loop orchestrating the transcode pipeline.
//!
//! Each job attempt runs the same sequence: validate the payload, download
//! the source object into staging, probe it, transcode it, upload the
//! result, delete the original (unless the derived key equals the source
//! key), notify the callback target, clean up staging, and report exactly
//! one outcome to the queue. A failure at any pipeline step short-circuits
//! to a best-effort failure callback, unconditional cleanup, and a failure
//! report; callback and delete-original failures never fail the job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{QueueSettings, WorkerSettings};
use crate::job_queue::{
    Envelope, RetryPolicy, TranscodeJob, TranscodeQueueStore, ValidationError,
};
use crate::notifier::CompletionNotifier;
use crate::object_store::{ObjectStore, StoreError};
use crate::staging::{JobWorkspace, StagingArea, StagingError};
use crate::transcoding::{AudioTranscoder, MediaProber, ProbeError, TechnicalMetadata, TranscodeError};

/// Terminal result of one job attempt.
#[derive(Debug)]
pub enum JobOutcome {
    Ready {
        output_url: String,
        metadata: TechnicalMetadata,
    },
    Failed(JobFailure),
}

/// Structured failure produced at the attempt boundary.
///
/// Every pipeline step's error is folded into one of these variants; the
/// variant's message becomes both the queue's recorded error and (where a
/// callback target exists) the failure notification trigger.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("invalid job payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("download failed: {0}")]
    Download(#[from] StoreError),

    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("upload failed: {0}")]
    Upload(StoreError),
}

impl JobFailure {
    /// Validation failures are local precondition errors with no retry
    /// benefit; everything else may be transient and is left to the
    /// queue's attempt ceiling.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobFailure::Validation(_))
    }
}

/// Derive the delivery key from a source key by swapping the extension.
///
/// Only the extension of the final path segment is replaced; a key without
/// an extension gets `.mp3` appended.
pub fn derive_output_key(source_key: &str) -> String {
    let dir_end = source_key.rfind('/').map_or(0, |i| i + 1);
    let name = &source_key[dir_end..];
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => {
            format!("{}{}.mp3", &source_key[..dir_end], &name[..i])
        }
        _ => format!("{}.mp3", source_key),
    }
}

/// The transcode worker: claims jobs from the queue across a fixed number
/// of concurrent slots and runs the pipeline for each attempt.
pub struct TranscodeWorker {
    queue: Arc<dyn TranscodeQueueStore>,
    object_store: Arc<dyn ObjectStore>,
    prober: Arc<dyn MediaProber>,
    transcoder: Arc<dyn AudioTranscoder>,
    notifier: Arc<dyn CompletionNotifier>,
    staging: StagingArea,
    retry_policy: RetryPolicy,
    worker_settings: WorkerSettings,
    queue_settings: QueueSettings,
}

impl TranscodeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn TranscodeQueueStore>,
        object_store: Arc<dyn ObjectStore>,
        prober: Arc<dyn MediaProber>,
        transcoder: Arc<dyn AudioTranscoder>,
        notifier: Arc<dyn CompletionNotifier>,
        staging: StagingArea,
        worker_settings: WorkerSettings,
        queue_settings: QueueSettings,
    ) -> Self {
        let retry_policy = RetryPolicy::new(&queue_settings);
        Self {
            queue,
            object_store,
            prober,
            transcoder,
            notifier,
            staging,
            retry_policy,
            worker_settings,
            queue_settings,
        }
    }

    /// Run the worker until the shutdown token is cancelled.
    ///
    /// Spawns one task per concurrency slot plus a queue-maintenance task.
    /// A job in flight runs to completion; shutdown is observed between
    /// jobs.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            slots = self.worker_settings.concurrency,
            "transcode worker starting"
        );

        let mut handles = Vec::new();
        for slot in 0..self.worker_settings.concurrency {
            let worker = self.clone();
            let token = shutdown.child_token();
            handles.push(tokio::spawn(async move {
                worker.run_slot(slot, token).await;
            }));
        }

        let worker = self.clone();
        let token = shutdown.child_token();
        handles.push(tokio::spawn(async move {
            worker.run_maintenance(token).await;
        }));

        for handle in handles {
            let _ = handle.await;
        }

        info!("transcode worker stopped");
    }

    /// One concurrency slot: claim, process, repeat.
    async fn run_slot(&self, slot: usize, shutdown: CancellationToken) {
        info!(slot, "worker slot started");
        let poll_interval = Duration::from_secs(self.worker_settings.poll_interval_secs.max(1));

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = match self.queue.claim_next() {
                Ok(job) => job,
                Err(e) => {
                    error!(slot, "failed to claim next job: {:#}", e);
                    None
                }
            };

            match claimed {
                Some(job) => self.run_attempt(&job).await,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }

        info!(slot, "worker slot stopped");
    }

    /// Periodic queue maintenance: promote elapsed retries and requeue
    /// attempts whose lease expired without a terminal report.
    async fn run_maintenance(&self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.queue_settings.maintenance_interval_secs.max(1));
        let lease = self.queue_settings.lease_timeout_secs as i64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }

            match self.queue.promote_retry_ready() {
                Ok(n) if n > 0 => info!(promoted = n, "promoted retry-waiting jobs"),
                Ok(_) => {}
                Err(e) => error!("failed to promote retry-waiting jobs: {:#}", e),
            }

            match self.queue.requeue_stale(lease) {
                Ok(n) if n > 0 => warn!(requeued = n, "requeued stale in-progress jobs"),
                Ok(_) => {}
                Err(e) => error!("failed to requeue stale jobs: {:#}", e),
            }
        }
    }

    /// Process one claimed job and report exactly one outcome to the queue.
    pub async fn run_attempt(&self, job: &TranscodeJob) {
        let started = Instant::now();
        let outcome = self.process_job(job).await;

        match outcome {
            JobOutcome::Ready { output_url, .. } => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                info!(
                    job_id = %job.id,
                    elapsed_ms,
                    output_url = %output_url,
                    "job completed"
                );
                if let Err(e) = self.queue.mark_completed(&job.id, elapsed_ms) {
                    error!(job_id = %job.id, "failed to report completion: {:#}", e);
                }
            }
            JobOutcome::Failed(failure) => {
                let message = failure.to_string();
                if self
                    .retry_policy
                    .should_retry(failure.is_retryable(), job.attempt_count)
                {
                    let next_retry_at = self.retry_policy.next_retry_at(job.attempt_count);
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempt_count,
                        next_retry_at,
                        "job attempt failed, retry scheduled: {}",
                        message
                    );
                    if let Err(e) = self.queue.mark_retry_waiting(&job.id, next_retry_at, &message)
                    {
                        error!(job_id = %job.id, "failed to schedule retry: {:#}", e);
                    }
                } else {
                    error!(
                        job_id = %job.id,
                        attempt = job.attempt_count,
                        "job failed permanently: {}",
                        message
                    );
                    if let Err(e) = self.queue.mark_failed(&job.id, &message) {
                        error!(job_id = %job.id, "failed to report failure: {:#}", e);
                    }
                }
            }
        }
    }

    /// The per-attempt pipeline. Always returns an outcome; never reports
    /// to the queue itself.
    async fn process_job(&self, job: &TranscodeJob) -> JobOutcome {
        // 1. Validate before any I/O. No callback context is trusted on a
        // payload that failed validation, so no notification is attempted.
        let envelope = match job.payload.validate() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(job_id = %job.id, "rejecting job: {}", e);
                return JobOutcome::Failed(JobFailure::Validation(e));
            }
        };

        info!(
            job_id = %job.id,
            sound_id = %envelope.sound_id,
            source_key = %envelope.source_key,
            attempt = job.attempt_count,
            "processing job"
        );

        let workspace = match self.staging.acquire(&job.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                let failure = JobFailure::Staging(e);
                self.notify_failure(&envelope, &failure).await;
                return JobOutcome::Failed(failure);
            }
        };

        let result = self.execute_pipeline(job, &envelope, &workspace).await;

        // Notify before releasing the workspace, mirroring the step order:
        // the callback is part of the attempt, cleanup is the last act.
        let outcome = match result {
            Ok((output_url, metadata)) => {
                if let Some(callback) = &envelope.callback {
                    if let Err(e) = self
                        .notifier
                        .notify_ready(callback, &envelope.sound_id, &output_url, &metadata)
                        .await
                    {
                        warn!(
                            job_id = %job.id,
                            sound_id = %envelope.sound_id,
                            "ready callback failed (ignored): {}",
                            e
                        );
                    }
                }
                JobOutcome::Ready {
                    output_url,
                    metadata,
                }
            }
            Err(failure) => {
                self.notify_failure(&envelope, &failure).await;
                JobOutcome::Failed(failure)
            }
        };

        if let Err(e) = workspace.cleanup().await {
            warn!(job_id = %job.id, "failed to remove staging dir: {}", e);
        }

        outcome
    }

    /// Steps 2-6: download, probe, transcode, upload, delete-original.
    async fn execute_pipeline(
        &self,
        job: &TranscodeJob,
        envelope: &Envelope,
        workspace: &JobWorkspace,
    ) -> Result<(String, TechnicalMetadata), JobFailure> {
        // 2. Download the original into staging
        let source = self.object_store.get(&envelope.source_key).await?;
        let input_path = workspace.write_input(&source).await?;
        info!(
            job_id = %job.id,
            bytes = source.len(),
            "downloaded source object"
        );

        // 3. Probe technical metadata
        let metadata = self.prober.probe(&input_path).await?;
        info!(
            job_id = %job.id,
            duration_seconds = metadata.duration_seconds,
            codec = %metadata.codec,
            channel_layout = metadata.channel_layout.as_str(),
            "probed source audio"
        );

        // 4. Transcode to the delivery format
        let output_path = workspace.output_path();
        self.transcoder.transcode(&input_path, &output_path).await?;

        // 5. Upload the result under the derived key
        let output_key = derive_output_key(&envelope.source_key);
        let encoded = workspace.read_output().await?;
        let output_url = self
            .object_store
            .put(&output_key, encoded, "audio/mpeg")
            .await
            .map_err(JobFailure::Upload)?;

        // 6. Delete the original, unless that would destroy the result
        if output_key == envelope.source_key {
            info!(
                job_id = %job.id,
                key = %output_key,
                "source already carries the delivery extension, skipping delete"
            );
        } else if let Err(e) = self.object_store.delete(&envelope.source_key).await {
            warn!(
                job_id = %job.id,
                source_key = %envelope.source_key,
                "failed to delete original object (ignored): {}",
                e
            );
        }

        Ok((output_url, metadata))
    }

    /// Best-effort failure callback; swallows its own errors.
    async fn notify_failure(&self, envelope: &Envelope, failure: &JobFailure) {
        let callback = match &envelope.callback {
            Some(callback) => callback,
            None => return,
        };
        if let Err(e) = self
            .notifier
            .notify_failed(callback, &envelope.sound_id)
            .await
        {
            warn!(
                sound_id = %envelope.sound_id,
                "failure callback failed (ignored): {} (original failure: {})",
                e,
                failure
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_output_key_swaps_extension() {
        assert_eq!(derive_output_key("u1/100-test.wav"), "u1/100-test.mp3");
        assert_eq!(derive_output_key("file.flac"), "file.mp3");
        assert_eq!(
            derive_output_key("user-id/1700-file.ogg"),
            "user-id/1700-file.mp3"
        );
    }

    #[test]
    fn test_derive_output_key_already_mp3() {
        assert_eq!(derive_output_key("u1/file.mp3"), "u1/file.mp3");
    }

    #[test]
    fn test_derive_output_key_no_extension() {
        assert_eq!(derive_output_key("u1/noext"), "u1/noext.mp3");
        // a dot in a directory name is not an extension
        assert_eq!(derive_output_key("u1.dir/noext"), "u1.dir/noext.mp3");
    }

    #[test]
    fn test_validation_failures_never_retry() {
        let failure = JobFailure::Validation(ValidationError::MissingSourceKey);
        assert!(!failure.is_retryable());

        let failure = JobFailure::Download(StoreError::Unavailable("timeout".to_string()));
        assert!(failure.is_retryable());

        let failure = JobFailure::Probe(ProbeError::ProbeFailed("corrupt".to_string()));
        assert!(failure.is_retryable());
    }
}
