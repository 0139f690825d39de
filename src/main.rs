use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use soundmap_worker::config;
use soundmap_worker::job_queue::SqliteQueueStore;
use soundmap_worker::notifier::HttpCallbackNotifier;
use soundmap_worker::object_store::S3ObjectStore;
use soundmap_worker::staging::StagingArea;
use soundmap_worker::transcoding::{check_ffmpeg_available, FfmpegTranscoder, FfprobeProber};
use soundmap_worker::worker::TranscodeWorker;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the transcode queue database.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Directory for per-job staging files.
    #[clap(long, value_parser = parse_path)]
    pub temp_dir: Option<PathBuf>,

    /// Number of jobs transcoded concurrently.
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Object store API endpoint (e.g. http://localhost:3900).
    #[clap(long)]
    pub storage_endpoint: Option<String>,

    /// Object store endpoint baked into public URLs (browser-reachable).
    #[clap(long)]
    pub storage_public_endpoint: Option<String>,

    /// Object store bucket holding the sounds.
    #[clap(long)]
    pub storage_bucket: Option<String>,

    /// Object store region name.
    #[clap(long)]
    pub storage_region: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            temp_dir: args.temp_dir.clone(),
            concurrency: args.concurrency,
            storage_endpoint: args.storage_endpoint.clone(),
            storage_public_endpoint: args.storage_public_endpoint.clone(),
            storage_bucket: args.storage_bucket.clone(),
            storage_region: args.storage_region.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!(
        "soundmap-worker {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  temp_dir: {:?}", app_config.temp_dir);
    info!("  storage endpoint: {}", app_config.storage.endpoint);
    info!("  storage bucket: {}", app_config.storage.bucket);
    info!("  concurrency: {}", app_config.worker.concurrency);

    // Fail fast when the transcoding toolchain is missing
    check_ffmpeg_available().await?;

    // Create queue store (will create DB if not exists)
    if !app_config.queue_db_path().exists() {
        info!(
            "Creating new transcode queue database at {:?}",
            app_config.queue_db_path()
        );
    }
    let queue = Arc::new(SqliteQueueStore::new(
        app_config.queue_db_path(),
        app_config.queue.max_attempts,
    )?);

    let object_store = Arc::new(S3ObjectStore::new(&app_config.storage)?);

    let staging = StagingArea::new(&app_config.temp_dir);
    staging.init().await?;

    let worker = Arc::new(TranscodeWorker::new(
        queue,
        object_store,
        Arc::new(FfprobeProber),
        Arc::new(FfmpegTranscoder::new(
            app_config.worker.target_bitrate_kbps,
        )),
        Arc::new(HttpCallbackNotifier::new(app_config.notifier.timeout_secs)),
        staging,
        app_config.worker.clone(),
        app_config.queue.clone(),
    ));

    let shutdown_token = CancellationToken::new();

    info!(
        "Ready to transcode ({} slots, {} kbps target)",
        app_config.worker.concurrency, app_config.worker.target_bitrate_kbps
    );

    tokio::select! {
        _ = worker.clone().run(shutdown_token.clone()) => {
            info!("Worker stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Give the worker slots a moment to shut down gracefully
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
