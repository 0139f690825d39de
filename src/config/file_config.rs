use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub temp_dir: Option<String>,

    // Feature configs
    pub storage: Option<StorageConfig>,
    pub worker: Option<WorkerConfig>,
    pub queue: Option<QueueConfig>,
    pub notifier: Option<NotifierConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    /// Endpoint baked into public URLs; must be reachable by browsers.
    pub public_endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: Option<usize>,
    pub target_bitrate_kbps: Option<u32>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_secs: Option<u64>,
    pub lease_timeout_secs: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NotifierConfig {
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
