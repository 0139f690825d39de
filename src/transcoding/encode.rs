//! Audio transcoding to the delivery format using ffmpeg.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Errors that can occur during transcoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("ffmpeg failed: {0}")]
    EncodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts a local audio file into the delivery format.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// Transcoder backed by the ffmpeg binary, producing constant-bitrate MP3.
pub struct FfmpegTranscoder {
    bitrate_kbps: u32,
}

impl FfmpegTranscoder {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        transcode_to_mp3(input, output, self.bitrate_kbps).await
    }
}

/// Convert an audio file to MP3 at the given constant bitrate.
///
/// ffmpeg's stderr is surfaced inside the error so operators can tell an
/// unsupported codec from a full disk.
pub async fn transcode_to_mp3(
    input_path: &Path,
    output_path: &Path,
    bitrate_kbps: u32,
) -> Result<(), TranscodeError> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let output = Command::new("ffmpeg")
        .args([
            "-i",
            input_path.to_str().unwrap_or(""),
            "-f",
            "mp3",
            "-b:a",
            &format!("{}k", bitrate_kbps),
            "-vn", // No video
            "-y",  // Overwrite output
        ])
        .arg(output_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::EncodeFailed(stderr.to_string()));
    }

    Ok(())
}

/// Check that ffmpeg and ffprobe are available on this host.
pub async fn check_ffmpeg_available() -> Result<(), TranscodeError> {
    for binary in ["ffprobe", "ffmpeg"] {
        let status = Command::new(binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {}
            _ => {
                return Err(TranscodeError::EncodeFailed(format!(
                    "{} not found or not working",
                    binary
                )));
            }
        }
    }
    Ok(())
}
