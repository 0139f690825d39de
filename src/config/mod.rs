mod file_config;

pub use file_config::{FileConfig, NotifierConfig, QueueConfig, StorageConfig, WorkerConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub storage_endpoint: Option<String>,
    pub storage_public_endpoint: Option<String>,
    pub storage_bucket: Option<String>,
    pub storage_region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub temp_dir: PathBuf,

    // Feature configs (with defaults)
    pub storage: StorageSettings,
    pub worker: WorkerSettings,
    pub queue: QueueSettings,
    pub notifier: NotifierSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present; storage credentials may
    /// also come from the `S3_*` environment variables.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let temp_dir = file
            .temp_dir
            .map(PathBuf::from)
            .or_else(|| cli.temp_dir.clone())
            .unwrap_or_else(|| PathBuf::from("/tmp/soundmap-worker"));

        // Storage settings - TOML, then CLI, then environment, then defaults
        let st_file = file.storage.unwrap_or_default();
        let endpoint = st_file
            .endpoint
            .or_else(|| cli.storage_endpoint.clone())
            .or_else(|| env_var("S3_ENDPOINT"))
            .unwrap_or_else(|| "http://localhost:3900".to_string());
        let public_endpoint = st_file
            .public_endpoint
            .or_else(|| cli.storage_public_endpoint.clone())
            .or_else(|| env_var("PUBLIC_S3_ENDPOINT"))
            .unwrap_or_else(|| endpoint.clone());
        let storage = StorageSettings {
            public_endpoint,
            endpoint,
            region: st_file
                .region
                .or_else(|| cli.storage_region.clone())
                .or_else(|| env_var("S3_REGION"))
                .unwrap_or_else(|| "garage".to_string()),
            bucket: st_file
                .bucket
                .or_else(|| cli.storage_bucket.clone())
                .or_else(|| env_var("S3_BUCKET_SOUNDS"))
                .unwrap_or_else(|| "sounds".to_string()),
            access_key: st_file
                .access_key
                .or_else(|| env_var("S3_ACCESS_KEY"))
                .unwrap_or_else(|| "minioadmin".to_string()),
            secret_key: st_file
                .secret_key
                .or_else(|| env_var("S3_SECRET_KEY"))
                .unwrap_or_else(|| "minioadmin".to_string()),
            timeout_secs: st_file.timeout_secs.unwrap_or(300),
        };

        let wk_file = file.worker.unwrap_or_default();
        let worker = WorkerSettings {
            concurrency: wk_file
                .concurrency
                .or(cli.concurrency)
                .unwrap_or(2)
                .max(1),
            target_bitrate_kbps: wk_file.target_bitrate_kbps.unwrap_or(128),
            poll_interval_secs: wk_file.poll_interval_secs.unwrap_or(1),
        };

        let q_file = file.queue.unwrap_or_default();
        let queue = QueueSettings {
            max_attempts: q_file.max_attempts.unwrap_or(3),
            initial_backoff_secs: q_file.initial_backoff_secs.unwrap_or(5),
            backoff_multiplier: q_file.backoff_multiplier.unwrap_or(2.0),
            max_backoff_secs: q_file.max_backoff_secs.unwrap_or(300),
            lease_timeout_secs: q_file.lease_timeout_secs.unwrap_or(1800),
            maintenance_interval_secs: q_file.maintenance_interval_secs.unwrap_or(10),
        };

        let n_file = file.notifier.unwrap_or_default();
        let notifier = NotifierSettings {
            timeout_secs: n_file.timeout_secs.unwrap_or(30),
        };

        Ok(Self {
            db_dir,
            temp_dir,
            storage,
            worker,
            queue,
            notifier,
        })
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("transcode_queue.db")
    }
}

/// Read a non-empty environment variable.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub public_endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub target_bitrate_kbps: u32,
    pub poll_interval_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            target_bitrate_kbps: 128,
            poll_interval_secs: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: u64,
    pub lease_timeout_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 5,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300,
            lease_timeout_secs: 1800,
            maintenance_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub timeout_secs: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}
