//! Technical metadata describing a probed audio file.

use serde::{Deserialize, Serialize};

/// Categorical speaker-channel arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    #[serde(rename = "mono")]
    Mono,
    #[serde(rename = "stereo")]
    Stereo,
    #[serde(rename = "5.1")]
    Surround51,
    #[serde(rename = "7.1")]
    Surround71,
    #[serde(rename = "other")]
    Other,
}

impl ChannelLayout {
    /// Normalize a probed layout string and channel count into a layout.
    ///
    /// A recognized layout string is used verbatim; otherwise the layout is
    /// inferred from the channel count (1 mono, 2 stereo, 6 5.1); anything
    /// else is Other.
    pub fn normalize(reported: Option<&str>, channel_count: u32) -> Self {
        match reported {
            Some("mono") => return ChannelLayout::Mono,
            Some("stereo") => return ChannelLayout::Stereo,
            Some("5.1") => return ChannelLayout::Surround51,
            Some("7.1") => return ChannelLayout::Surround71,
            _ => {}
        }
        match channel_count {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            6 => ChannelLayout::Surround51,
            _ => ChannelLayout::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelLayout::Mono => "mono",
            ChannelLayout::Stereo => "stereo",
            ChannelLayout::Surround51 => "5.1",
            ChannelLayout::Surround71 => "7.1",
            ChannelLayout::Other => "other",
        }
    }
}

/// Technical characteristics of an audio file, extracted once per job.
///
/// Serializes with the field names the completion callback receiver expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMetadata {
    /// Duration in seconds.
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    /// Sample rate in Hz (0 when the source does not report it).
    #[serde(rename = "sampleRate")]
    pub sample_rate_hz: u32,
    /// Bitrate in bits per second (0 when the source does not report it).
    #[serde(rename = "bitrate")]
    pub bitrate_bps: u64,
    /// Number of audio channels.
    #[serde(rename = "channels")]
    pub channel_count: u32,
    #[serde(rename = "channelLayout")]
    pub channel_layout: ChannelLayout,
    /// Codec name, e.g. "pcm_s16le".
    pub codec: String,
    /// Container format, e.g. "wav".
    #[serde(rename = "fileFormat")]
    pub container_format: String,
    /// Bits per sample (0 when the source format does not report it).
    #[serde(rename = "bitDepth")]
    pub bit_depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_inferred_from_channel_count() {
        assert_eq!(ChannelLayout::normalize(None, 1), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::normalize(None, 2), ChannelLayout::Stereo);
        assert_eq!(ChannelLayout::normalize(None, 6), ChannelLayout::Surround51);
        assert_eq!(ChannelLayout::normalize(None, 3), ChannelLayout::Other);
        assert_eq!(ChannelLayout::normalize(None, 8), ChannelLayout::Other);
    }

    #[test]
    fn test_recognized_layout_string_wins() {
        // A recognized layout string is used verbatim, whatever the count says
        assert_eq!(
            ChannelLayout::normalize(Some("7.1"), 2),
            ChannelLayout::Surround71
        );
        assert_eq!(
            ChannelLayout::normalize(Some("mono"), 6),
            ChannelLayout::Mono
        );
    }

    #[test]
    fn test_unrecognized_layout_string_falls_back_to_count() {
        assert_eq!(
            ChannelLayout::normalize(Some("quad"), 3),
            ChannelLayout::Other
        );
        assert_eq!(
            ChannelLayout::normalize(Some("downmix"), 2),
            ChannelLayout::Stereo
        );
    }

    #[test]
    fn test_callback_field_names() {
        let metadata = TechnicalMetadata {
            duration_seconds: 5.0,
            sample_rate_hz: 44100,
            bitrate_bps: 1_411_200,
            channel_count: 2,
            channel_layout: ChannelLayout::Stereo,
            codec: "pcm_s16le".to_string(),
            container_format: "wav".to_string(),
            bit_depth: 16,
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "duration": 5.0,
                "sampleRate": 44100,
                "bitrate": 1_411_200,
                "channels": 2,
                "channelLayout": "stereo",
                "codec": "pcm_s16le",
                "fileFormat": "wav",
                "bitDepth": 16,
            })
        );
    }
}
