//! Media data model: track formats and samples.

pub mod format;
pub mod sample;

pub use format::{
    AacProfile, AudioParams, ColorFormat, MIME_AUDIO_AAC, MIME_AUDIO_RAW, MIME_VIDEO_AVC,
    MIME_VIDEO_RAW, MediaParams, TrackFormat, TrackKind, VideoParams,
};
pub use sample::{BufferInfo, Sample, SampleFlags};
