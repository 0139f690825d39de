//! Operator CLI for inspecting and repairing the transcode queue.
//!
//! Covers the reconciliation gap left by the swallow-and-log callback
//! policy: sounds stuck in a processing state upstream can be traced to a
//! failed or abandoned queue job here, and re-driven with `requeue`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use soundmap_worker::job_queue::{JobPayload, SqliteQueueStore, TranscodeQueueStore};

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.is_dir() {
        return Err(format!("Directory does not exist: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[command(name = "worker-admin")]
struct CliArgs {
    /// Directory containing the transcode queue database.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show job counts per queue status.
    Stats,

    /// List permanently failed jobs with their recorded errors.
    Failed {
        #[clap(long, default_value_t = 20)]
        limit: usize,

        #[clap(long, default_value_t = 0)]
        offset: usize,
    },

    /// Put a failed job back into the queue with a fresh attempt budget.
    Requeue { job_id: String },

    /// Insert a transcode job, e.g. to re-drive a stuck sound.
    Enqueue {
        #[clap(long)]
        sound_id: String,

        #[clap(long)]
        source_key: String,

        #[clap(long)]
        webhook_url: Option<String>,

        #[clap(long)]
        secret: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let db_path = args.db_dir.join("transcode_queue.db");
    if !db_path.exists() {
        bail!("No transcode queue database at {:?}", db_path);
    }
    let store =
        SqliteQueueStore::new(&db_path, 3).context("Failed to open transcode queue database")?;

    match args.command {
        Command::Stats => {
            let stats = store.stats()?;
            println!("pending:       {}", stats.pending);
            println!("in progress:   {}", stats.in_progress);
            println!("retry waiting: {}", stats.retry_waiting);
            println!("completed:     {}", stats.completed);
            println!("failed:        {}", stats.failed);
        }
        Command::Failed { limit, offset } => {
            let jobs = store.list_failed(limit, offset)?;
            if jobs.is_empty() {
                println!("No failed jobs.");
                return Ok(());
            }
            for job in jobs {
                println!(
                    "{}  sound={}  key={}  attempts={}  error={}",
                    job.id,
                    job.payload.sound_id.as_deref().unwrap_or("-"),
                    job.payload.source_key.as_deref().unwrap_or("-"),
                    job.attempt_count,
                    job.error_message.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Requeue { job_id } => {
            if store.requeue_failed(&job_id)? {
                println!("Requeued job {}", job_id);
            } else {
                bail!("Job {} not found or not in FAILED state", job_id);
            }
        }
        Command::Enqueue {
            sound_id,
            source_key,
            webhook_url,
            secret,
        } => {
            let mut payload = JobPayload::new(sound_id, source_key);
            if let (Some(url), Some(secret)) = (webhook_url, secret) {
                payload = payload.with_callback(url, secret);
            }
            let job = store.enqueue(payload)?;
            println!("Enqueued job {}", job.id);
        }
    }

    Ok(())
}
