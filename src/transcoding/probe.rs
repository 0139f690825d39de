//! Audio metadata extraction using ffprobe.

use super::metadata::{ChannelLayout, TechnicalMetadata};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Errors that can occur while probing a file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid probe output: {0}")]
    InvalidOutput(String),
}

/// Extracts [`TechnicalMetadata`] from a local media file.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<TechnicalMetadata, ProbeError>;
}

/// Prober backed by the ffprobe binary.
pub struct FfprobeProber;

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<TechnicalMetadata, ProbeError> {
        probe_media(path).await
    }
}

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i64>,
    channel_layout: Option<String>,
    bit_rate: Option<String>,
    bits_per_sample: Option<i64>,
}

/// Probe a media file with ffprobe and extract its technical metadata.
pub async fn probe_media(path: &Path) -> Result<TechnicalMetadata, ProbeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::ProbeFailed(stderr.to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let probe: FfprobeOutput = serde_json::from_str(&stdout)
        .map_err(|e| ProbeError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    metadata_from_probe(probe)
}

/// Map raw ffprobe output into [`TechnicalMetadata`].
///
/// Absent optional fields get zero/default sentinels rather than failing
/// the whole probe; a missing audio stream is an error.
fn metadata_from_probe(probe: FfprobeOutput) -> Result<TechnicalMetadata, ProbeError> {
    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| ProbeError::InvalidOutput("No audio stream found".to_string()))?;

    let duration_seconds: f64 = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);

    let sample_rate_hz: u32 = audio_stream
        .sample_rate
        .as_ref()
        .and_then(|sr| sr.parse().ok())
        .unwrap_or(0);

    // Prefer the container-level bitrate, fall back to the stream value
    let bitrate_bps: u64 = probe
        .format
        .bit_rate
        .as_ref()
        .or(audio_stream.bit_rate.as_ref())
        .and_then(|b| b.parse().ok())
        .unwrap_or(0);

    let channel_count = audio_stream.channels.unwrap_or(1).max(1) as u32;
    let channel_layout =
        ChannelLayout::normalize(audio_stream.channel_layout.as_deref(), channel_count);

    let container_format = probe
        .format
        .format_name
        .as_deref()
        .and_then(|name| name.split(',').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown")
        .to_string();

    Ok(TechnicalMetadata {
        duration_seconds,
        sample_rate_hz,
        bitrate_bps,
        channel_count,
        channel_layout,
        codec: audio_stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        container_format,
        bit_depth: audio_stream.bits_per_sample.unwrap_or(0).max(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> FfprobeOutput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_metadata_from_wav_probe() {
        let probe = parse(
            r#"{
                "format": {
                    "format_name": "wav",
                    "duration": "5.000000",
                    "bit_rate": "1411200"
                },
                "streams": [{
                    "codec_type": "audio",
                    "codec_name": "pcm_s16le",
                    "sample_rate": "44100",
                    "channels": 2,
                    "channel_layout": "stereo",
                    "bits_per_sample": 16
                }]
            }"#,
        );

        let metadata = metadata_from_probe(probe).unwrap();
        assert_eq!(metadata.duration_seconds, 5.0);
        assert_eq!(metadata.sample_rate_hz, 44100);
        assert_eq!(metadata.bitrate_bps, 1_411_200);
        assert_eq!(metadata.channel_count, 2);
        assert_eq!(metadata.channel_layout, ChannelLayout::Stereo);
        assert_eq!(metadata.codec, "pcm_s16le");
        assert_eq!(metadata.container_format, "wav");
        assert_eq!(metadata.bit_depth, 16);
    }

    #[test]
    fn test_missing_optional_fields_get_sentinels() {
        let probe = parse(
            r#"{
                "format": {},
                "streams": [{ "codec_type": "audio" }]
            }"#,
        );

        let metadata = metadata_from_probe(probe).unwrap();
        assert_eq!(metadata.duration_seconds, 0.0);
        assert_eq!(metadata.sample_rate_hz, 0);
        assert_eq!(metadata.bitrate_bps, 0);
        assert_eq!(metadata.channel_count, 1);
        assert_eq!(metadata.channel_layout, ChannelLayout::Mono);
        assert_eq!(metadata.codec, "unknown");
        assert_eq!(metadata.container_format, "unknown");
        assert_eq!(metadata.bit_depth, 0);
    }

    #[test]
    fn test_compound_format_name_takes_first_component() {
        let probe = parse(
            r#"{
                "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2" },
                "streams": [{ "codec_type": "audio", "codec_name": "aac", "channels": 2 }]
            }"#,
        );

        let metadata = metadata_from_probe(probe).unwrap();
        assert_eq!(metadata.container_format, "mov");
    }

    #[test]
    fn test_stream_bitrate_fallback() {
        let probe = parse(
            r#"{
                "format": { "format_name": "ogg" },
                "streams": [{
                    "codec_type": "audio",
                    "codec_name": "vorbis",
                    "channels": 2,
                    "bit_rate": "192000"
                }]
            }"#,
        );

        let metadata = metadata_from_probe(probe).unwrap();
        assert_eq!(metadata.bitrate_bps, 192_000);
    }

    #[test]
    fn test_no_audio_stream_is_an_error() {
        let probe = parse(
            r#"{
                "format": { "format_name": "matroska" },
                "streams": [{ "codec_type": "video", "codec_name": "h264" }]
            }"#,
        );

        assert!(matches!(
            metadata_from_probe(probe),
            Err(ProbeError::InvalidOutput(_))
        ));
    }
}
