//! Audio probing and transcoding via ffmpeg/ffprobe.

mod encode;
mod metadata;
mod probe;

pub use encode::{
    check_ffmpeg_available, transcode_to_mp3, AudioTranscoder, FfmpegTranscoder, TranscodeError,
};
pub use metadata::{ChannelLayout, TechnicalMetadata};
pub use probe::{probe_media, FfprobeProber, MediaProber, ProbeError};

#[cfg(feature = "mock")]
pub use encode::MockAudioTranscoder;
#[cfg(feature = "mock")]
pub use probe::MockMediaProber;
