//! Database schema for transcode_queue.db.

use anyhow::{bail, Result};
use rusqlite::Connection;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_QUEUE_TABLE: &str = r#"
CREATE TABLE transcode_queue (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    next_retry_at INTEGER,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    error_message TEXT,
    processing_duration_ms INTEGER
)
"#;

const CREATE_INDICES: &[&str] = &[
    "CREATE INDEX idx_queue_status_created ON transcode_queue (status, created_at)",
    "CREATE INDEX idx_queue_next_retry ON transcode_queue (next_retry_at)",
];

/// Create the schema on a fresh database and stamp the version.
pub fn create(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_QUEUE_TABLE, [])?;
    for index in CREATE_INDICES {
        conn.execute(index, [])?;
    }
    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
    Ok(())
}

/// Verify an existing database carries a version this build understands.
pub fn validate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        bail!("transcode queue database has no schema version (not a queue database?)");
    }
    if version > SCHEMA_VERSION {
        bail!(
            "transcode queue database version {} is too new (max supported: {})",
            version,
            SCHEMA_VERSION
        );
    }
    Ok(())
}
