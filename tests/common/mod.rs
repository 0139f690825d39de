//! Common test infrastructure
//!
//! Provides in-memory fakes for every external collaborator of the worker
//! (object store, prober, transcoder, notifier) plus a harness that wires
//! them into a real `TranscodeWorker` over a real SQLite-backed queue.
//! Tests should only import from this module, not from internal submodules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use soundmap_worker::config::{QueueSettings, WorkerSettings};
use soundmap_worker::job_queue::{
    CallbackTarget, JobPayload, JobStatus, QueueStats, SqliteQueueStore, TranscodeJob,
    TranscodeQueueStore,
};
use soundmap_worker::notifier::{CompletionNotifier, NotifyError};
use soundmap_worker::object_store::{ObjectStore, StoreError};
use soundmap_worker::staging::StagingArea;
use soundmap_worker::transcoding::{
    AudioTranscoder, ChannelLayout, MediaProber, ProbeError, TechnicalMetadata, TranscodeError,
};
use soundmap_worker::worker::TranscodeWorker;

/// One recorded object-store interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(String),
    /// Key and content type.
    Put(String, String),
    Delete(String),
}

/// Object store holding blobs in a HashMap and recording every call.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<StoreCall>>,
    pub fail_get: bool,
    pub fail_put: bool,
    pub fail_delete: bool,
}

impl FakeObjectStore {
    pub fn insert_object(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }

    pub fn has_object(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Get(key.to_string()));
        if self.fail_get {
            return Err(StoreError::Unavailable("injected get failure".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Put(key.to_string(), content_type.to_string()));
        if self.fail_put {
            return Err(StoreError::Unavailable("injected put failure".to_string()));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(format!("http://localhost:3900/sounds/{}", key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Delete(key.to_string()));
        if self.fail_delete {
            return Err(StoreError::Unavailable(
                "injected delete failure".to_string(),
            ));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Prober returning a scripted result instead of running ffprobe.
pub struct ScriptedProber {
    /// None simulates a corrupt/unparseable file.
    pub metadata: Option<TechnicalMetadata>,
}

#[async_trait]
impl MediaProber for ScriptedProber {
    async fn probe(&self, _path: &Path) -> Result<TechnicalMetadata, ProbeError> {
        match &self.metadata {
            Some(metadata) => Ok(metadata.clone()),
            None => Err(ProbeError::ProbeFailed(
                "injected probe failure".to_string(),
            )),
        }
    }
}

/// Transcoder writing a fixed byte marker instead of running ffmpeg.
pub struct ScriptedTranscoder {
    pub fail: bool,
}

#[async_trait]
impl AudioTranscoder for ScriptedTranscoder {
    async fn transcode(&self, _input: &Path, output: &Path) -> Result<(), TranscodeError> {
        if self.fail {
            return Err(TranscodeError::EncodeFailed(
                "injected transcode failure".to_string(),
            ));
        }
        tokio::fs::write(output, b"transcoded-mp3-bytes").await?;
        Ok(())
    }
}

/// One recorded callback delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyCall {
    Ready { sound_id: String, mp3_url: String },
    Failed { sound_id: String },
}

/// Notifier recording calls; optionally errors after recording, like an
/// unreachable callback endpoint would.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifyCall>>,
    last_metadata: Mutex<Option<TechnicalMetadata>>,
    last_secret: Mutex<Option<String>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<NotifyCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_metadata(&self) -> Option<TechnicalMetadata> {
        self.last_metadata.lock().unwrap().clone()
    }

    pub fn last_secret(&self) -> Option<String> {
        self.last_secret.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify_ready(
        &self,
        target: &CallbackTarget,
        sound_id: &str,
        mp3_url: &str,
        metadata: &TechnicalMetadata,
    ) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(NotifyCall::Ready {
            sound_id: sound_id.to_string(),
            mp3_url: mp3_url.to_string(),
        });
        *self.last_metadata.lock().unwrap() = Some(metadata.clone());
        *self.last_secret.lock().unwrap() = Some(target.secret.clone());
        if self.fail {
            return Err(NotifyError::Rejected(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        Ok(())
    }

    async fn notify_failed(
        &self,
        target: &CallbackTarget,
        sound_id: &str,
    ) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(NotifyCall::Failed {
            sound_id: sound_id.to_string(),
        });
        *self.last_secret.lock().unwrap() = Some(target.secret.clone());
        if self.fail {
            return Err(NotifyError::Rejected(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        Ok(())
    }
}

/// Queue wrapper counting terminal outcome reports, for asserting the
/// exactly-one-outcome-per-attempt property.
pub struct CountingQueue {
    inner: SqliteQueueStore,
    outcome_reports: Mutex<usize>,
}

impl CountingQueue {
    pub fn new(inner: SqliteQueueStore) -> Self {
        Self {
            inner,
            outcome_reports: Mutex::new(0),
        }
    }

    pub fn outcome_reports(&self) -> usize {
        *self.outcome_reports.lock().unwrap()
    }
}

impl TranscodeQueueStore for CountingQueue {
    fn enqueue(&self, payload: JobPayload) -> anyhow::Result<TranscodeJob> {
        self.inner.enqueue(payload)
    }

    fn get_job(&self, id: &str) -> anyhow::Result<Option<TranscodeJob>> {
        self.inner.get_job(id)
    }

    fn claim_next(&self) -> anyhow::Result<Option<TranscodeJob>> {
        self.inner.claim_next()
    }

    fn mark_completed(&self, id: &str, processing_duration_ms: i64) -> anyhow::Result<()> {
        *self.outcome_reports.lock().unwrap() += 1;
        self.inner.mark_completed(id, processing_duration_ms)
    }

    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> anyhow::Result<()> {
        *self.outcome_reports.lock().unwrap() += 1;
        self.inner.mark_retry_waiting(id, next_retry_at, error)
    }

    fn mark_failed(&self, id: &str, error: &str) -> anyhow::Result<()> {
        *self.outcome_reports.lock().unwrap() += 1;
        self.inner.mark_failed(id, error)
    }

    fn promote_retry_ready(&self) -> anyhow::Result<usize> {
        self.inner.promote_retry_ready()
    }

    fn requeue_stale(&self, stale_threshold_secs: i64) -> anyhow::Result<usize> {
        self.inner.requeue_stale(stale_threshold_secs)
    }

    fn list_failed(&self, limit: usize, offset: usize) -> anyhow::Result<Vec<TranscodeJob>> {
        self.inner.list_failed(limit, offset)
    }

    fn requeue_failed(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.requeue_failed(id)
    }

    fn stats(&self) -> anyhow::Result<QueueStats> {
        self.inner.stats()
    }
}

/// Knobs for building a harness with injected failures.
pub struct HarnessOptions {
    pub max_attempts: u32,
    pub fail_get: bool,
    pub fail_put: bool,
    pub fail_delete: bool,
    /// None simulates a corrupt file that cannot be probed.
    pub probe_metadata: Option<TechnicalMetadata>,
    pub fail_transcode: bool,
    pub fail_notify: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fail_get: false,
            fail_put: false,
            fail_delete: false,
            probe_metadata: Some(sample_metadata()),
            fail_transcode: false,
            fail_notify: false,
        }
    }
}

/// A fully wired worker over fakes, plus handles to observe them.
pub struct Harness {
    pub worker: Arc<TranscodeWorker>,
    pub queue: Arc<CountingQueue>,
    pub store: Arc<FakeObjectStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub staging_dir: PathBuf,
    _temp: TempDir,
}

impl Harness {
    pub async fn build(options: HarnessOptions) -> Self {
        let temp = TempDir::new().unwrap();

        let queue = Arc::new(CountingQueue::new(
            SqliteQueueStore::new(temp.path().join("transcode_queue.db"), options.max_attempts)
                .unwrap(),
        ));

        let store = Arc::new(FakeObjectStore {
            fail_get: options.fail_get,
            fail_put: options.fail_put,
            fail_delete: options.fail_delete,
            ..Default::default()
        });

        let notifier = Arc::new(RecordingNotifier {
            fail: options.fail_notify,
            ..Default::default()
        });

        let staging_dir = temp.path().join("staging");
        let staging = StagingArea::new(&staging_dir);
        staging.init().await.unwrap();

        let worker = Arc::new(TranscodeWorker::new(
            queue.clone(),
            store.clone(),
            Arc::new(ScriptedProber {
                metadata: options.probe_metadata,
            }),
            Arc::new(ScriptedTranscoder {
                fail: options.fail_transcode,
            }),
            notifier.clone(),
            staging,
            WorkerSettings::default(),
            QueueSettings {
                max_attempts: options.max_attempts,
                ..Default::default()
            },
        ));

        Self {
            worker,
            queue,
            store,
            notifier,
            staging_dir,
            _temp: temp,
        }
    }

    /// Enqueue a payload, claim it, and run one attempt to completion.
    /// Returns the claimed job (with its attempt count).
    pub async fn run_one_attempt(&self, payload: JobPayload) -> TranscodeJob {
        self.queue.enqueue(payload).unwrap();
        let job = self.queue.claim_next().unwrap().expect("job to claim");
        self.worker.run_attempt(&job).await;
        job
    }

    pub fn job_status(&self, id: &str) -> JobStatus {
        self.queue.get_job(id).unwrap().unwrap().status
    }

    /// True when no per-job staging directory is left behind.
    pub fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(&self.staging_dir)
            .map(|entries| entries.count() == 0)
            .unwrap_or(true)
    }
}

/// The probe result used across the pipeline tests: a small stereo WAV.
pub fn sample_metadata() -> TechnicalMetadata {
    TechnicalMetadata {
        duration_seconds: 5.0,
        sample_rate_hz: 44100,
        bitrate_bps: 1_411_200,
        channel_count: 2,
        channel_layout: ChannelLayout::Stereo,
        codec: "pcm_s16le".to_string(),
        container_format: "wav".to_string(),
        bit_depth: 16,
    }
}

/// A complete payload with callback target, matching the sample WAV.
pub fn sample_payload() -> JobPayload {
    JobPayload::new("s1", "u1/100-test.wav").with_callback("https://app/hook", "shh")
}
