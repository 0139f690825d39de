//! Per-attempt staging workspace for the two large binary artifacts.
//!
//! Every attempt gets its own directory named after the queue job id, so
//! concurrent attempts never collide on disk. The workspace is released
//! through [`JobWorkspace::cleanup`]; a workspace dropped without cleanup
//! (a panicked or aborted attempt) removes itself best-effort.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Errors that can occur while managing staging files.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory for per-attempt workspaces under one base directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    base_dir: PathBuf,
}

impl StagingArea {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Initialize the staging area (creates the base directory).
    pub async fn init(&self) -> Result<(), StagingError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Acquire a fresh workspace for one job attempt.
    pub async fn acquire(&self, job_id: &str) -> Result<JobWorkspace, StagingError> {
        let dir = self.base_dir.join(job_id);
        fs::create_dir_all(&dir).await?;
        Ok(JobWorkspace {
            dir,
            released: false,
        })
    }
}

/// Scoped staging directory for one job attempt.
pub struct JobWorkspace {
    dir: PathBuf,
    released: bool,
}

impl JobWorkspace {
    /// Path of the downloaded source artifact.
    pub fn input_path(&self) -> PathBuf {
        self.dir.join("input")
    }

    /// Path the transcoder writes the delivery artifact to.
    pub fn output_path(&self) -> PathBuf {
        self.dir.join("output.mp3")
    }

    /// Write the downloaded source bytes and return the input path.
    pub async fn write_input(&self, bytes: &[u8]) -> Result<PathBuf, StagingError> {
        let path = self.input_path();
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Read back the transcoded output bytes.
    pub async fn read_output(&self) -> Result<Vec<u8>, StagingError> {
        Ok(fs::read(self.output_path()).await?)
    }

    /// Remove the workspace directory and everything in it.
    pub async fn cleanup(mut self) -> Result<(), StagingError> {
        self.released = true;
        if fs::try_exists(&self.dir).await? {
            fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.released && self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                warn!("Failed to remove staging dir {:?} on drop: {}", self.dir, e);
            }
        }
    }
}
