//! Transcode queue storage and persistence.
//!
//! Provides SQLite-backed storage for transcode jobs with atomic claiming,
//! retry scheduling, and lease-style redelivery of abandoned attempts.

use super::models::{JobPayload, JobStatus, QueueStats, TranscodeJob};
use super::schema;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Trait for transcode queue storage operations.
///
/// Delivery contract: a job is handed to at most one claimer at a time;
/// exactly one terminal report (`mark_completed` / `mark_retry_waiting` /
/// `mark_failed`) is expected per claimed attempt. Attempts that never
/// report are recovered by [`TranscodeQueueStore::requeue_stale`].
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait TranscodeQueueStore: Send + Sync {
    /// Add a new job to the queue in PENDING state. Returns the stored job.
    fn enqueue(&self, payload: JobPayload) -> Result<TranscodeJob>;

    /// Get a job by ID.
    fn get_job(&self, id: &str) -> Result<Option<TranscodeJob>>;

    /// Atomically claim the oldest PENDING job (PENDING → IN_PROGRESS).
    ///
    /// Increments the attempt count and stamps the attempt start time.
    /// Returns None when the queue has no deliverable job.
    fn claim_next(&self) -> Result<Option<TranscodeJob>>;

    /// Report a successful attempt (IN_PROGRESS → COMPLETED).
    fn mark_completed(&self, id: &str, processing_duration_ms: i64) -> Result<()>;

    /// Schedule another delivery after a failed attempt
    /// (IN_PROGRESS → RETRY_WAITING).
    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> Result<()>;

    /// Report a permanently failed attempt (→ FAILED).
    fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    /// Promote RETRY_WAITING jobs whose backoff has elapsed back to PENDING.
    /// Returns the number of jobs promoted.
    fn promote_retry_ready(&self) -> Result<usize>;

    /// Return IN_PROGRESS jobs whose attempt started more than
    /// `stale_threshold_secs` ago to PENDING for redelivery.
    /// Returns the number of jobs requeued.
    fn requeue_stale(&self, stale_threshold_secs: i64) -> Result<usize>;

    /// List permanently failed jobs, most recent first.
    fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<TranscodeJob>>;

    /// Put a FAILED job back to PENDING with a fresh attempt budget.
    /// Returns false if the job does not exist or is not FAILED.
    fn requeue_failed(&self, id: &str) -> Result<bool>;

    /// Get job counts per status.
    fn stats(&self) -> Result<QueueStats>;
}

/// SQLite-backed transcode queue store.
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
    /// Attempt ceiling stamped on newly enqueued jobs.
    default_max_attempts: u32,
}

impl SqliteQueueStore {
    /// Open an existing queue database or create a new one.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `default_max_attempts` - Attempt ceiling for newly enqueued jobs
    pub fn new<P: AsRef<Path>>(db_path: P, default_max_attempts: u32) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            let conn = Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            schema::validate(&conn).context("Failed to validate transcode queue schema")?;
            conn
        } else {
            let conn = Connection::open(&db_path)?;
            schema::create(&conn)?;
            info!(
                "Created new transcode queue database at {:?}",
                db_path.as_ref()
            );
            conn
        };

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
            default_max_attempts,
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory(default_max_attempts: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create(&conn)?;
        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
            default_max_attempts,
        })
    }

    /// Helper to convert a database row to a TranscodeJob.
    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<TranscodeJob> {
        let payload_json: String = row.get("payload")?;
        Ok(TranscodeJob {
            id: row.get("id")?,
            status: JobStatus::from_db_str(&row.get::<_, String>("status")?)
                .unwrap_or(JobStatus::Failed),
            payload: serde_json::from_str(&payload_json).unwrap_or_default(),
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            next_retry_at: row.get("next_retry_at")?,
            attempt_count: row.get("attempt_count")?,
            max_attempts: row.get("max_attempts")?,
            error_message: row.get("error_message")?,
            processing_duration_ms: row.get("processing_duration_ms")?,
        })
    }

    /// Get current timestamp in seconds.
    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl TranscodeQueueStore for SqliteQueueStore {
    fn enqueue(&self, payload: JobPayload) -> Result<TranscodeJob> {
        let conn = self.conn.lock().unwrap();
        let job = TranscodeJob {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            payload,
            created_at: Self::now(),
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            attempt_count: 0,
            max_attempts: self.default_max_attempts as i32,
            error_message: None,
            processing_duration_ms: None,
        };
        let payload_json = serde_json::to_string(&job.payload)?;
        conn.execute(
            r#"INSERT INTO transcode_queue (
                id, status, payload, created_at, attempt_count, max_attempts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                job.id,
                job.status.as_db_str(),
                payload_json,
                job.created_at,
                job.attempt_count,
                job.max_attempts,
            ],
        )?;
        Ok(job)
    }

    fn get_job(&self, id: &str) -> Result<Option<TranscodeJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                "SELECT * FROM transcode_queue WHERE id = ?1",
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn claim_next(&self) -> Result<Option<TranscodeJob>> {
        // Single connection behind a mutex: select-then-update is atomic
        // with respect to other claimers in this process.
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM transcode_queue WHERE status = 'PENDING'
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };

        conn.execute(
            "UPDATE transcode_queue
             SET status = 'IN_PROGRESS', started_at = ?1, attempt_count = attempt_count + 1
             WHERE id = ?2",
            params![Self::now(), id],
        )?;

        let job = conn.query_row(
            "SELECT * FROM transcode_queue WHERE id = ?1",
            params![id],
            Self::row_to_job,
        )?;
        Ok(Some(job))
    }

    fn mark_completed(&self, id: &str, processing_duration_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE transcode_queue
             SET status = 'COMPLETED', completed_at = ?1, next_retry_at = NULL,
                 error_message = NULL, processing_duration_ms = ?2
             WHERE id = ?3",
            params![Self::now(), processing_duration_ms, id],
        )?;
        Ok(())
    }

    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE transcode_queue
             SET status = 'RETRY_WAITING', next_retry_at = ?1, error_message = ?2
             WHERE id = ?3",
            params![next_retry_at, error, id],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE transcode_queue
             SET status = 'FAILED', completed_at = ?1, next_retry_at = NULL,
                 error_message = ?2
             WHERE id = ?3",
            params![Self::now(), error, id],
        )?;
        Ok(())
    }

    fn promote_retry_ready(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let promoted = conn.execute(
            "UPDATE transcode_queue
             SET status = 'PENDING', next_retry_at = NULL
             WHERE status = 'RETRY_WAITING' AND next_retry_at <= ?1",
            params![Self::now()],
        )?;
        Ok(promoted)
    }

    fn requeue_stale(&self, stale_threshold_secs: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Self::now() - stale_threshold_secs;
        let requeued = conn.execute(
            "UPDATE transcode_queue
             SET status = 'PENDING', started_at = NULL
             WHERE status = 'IN_PROGRESS' AND started_at IS NOT NULL AND started_at <= ?1",
            params![cutoff],
        )?;
        Ok(requeued)
    }

    fn list_failed(&self, limit: usize, offset: usize) -> Result<Vec<TranscodeJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM transcode_queue WHERE status = 'FAILED'
             ORDER BY completed_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let jobs = stmt
            .query_map(params![limit, offset], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn requeue_failed(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE transcode_queue
             SET status = 'PENDING', attempt_count = 0, error_message = NULL,
                 completed_at = NULL, next_retry_at = NULL, started_at = NULL
             WHERE id = ?1 AND status = 'FAILED'",
            params![id],
        )?;
        Ok(changed > 0)
    }

    fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM transcode_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            match JobStatus::from_db_str(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::InProgress) => stats.in_progress = count,
                Some(JobStatus::RetryWaiting) => stats.retry_waiting = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }
}
