//! Track format descriptions shared by demuxers, codecs and muxers.

use serde::{Deserialize, Serialize};

/// MIME type of H.264/AVC elementary streams.
pub const MIME_VIDEO_AVC: &str = "video/avc";
/// MIME type of AAC elementary streams.
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
/// MIME type of decoded video frames.
pub const MIME_VIDEO_RAW: &str = "video/raw";
/// MIME type of decoded PCM audio.
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// Elementary stream kind. A job carries at most one track of each kind,
/// so the kind doubles as the track identifier throughout the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// MIME type every output track of this kind must carry.
    pub fn required_mime(self) -> &'static str {
        match self {
            TrackKind::Video => MIME_VIDEO_AVC,
            TrackKind::Audio => MIME_AUDIO_AAC,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout requested from a video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    /// Frames are rendered by the decoder straight into the encoder's input surface.
    Surface,
    Yuv420Planar,
    Yuv420SemiPlanar,
}

/// AAC object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AacProfile {
    /// AAC Low Complexity
    Lc,
    /// High Efficiency AAC
    He,
}

/// Video-specific parameters of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: Option<u32>,
    /// Seconds between key frames
    pub key_frame_interval: Option<u32>,
    pub color_format: Option<ColorFormat>,
}

impl VideoParams {
    /// Returns (long edge, short edge) regardless of orientation.
    pub fn edges(&self) -> (u32, u32) {
        if self.width >= self.height {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        }
    }

    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }
}

/// Audio-specific parameters of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub bitrate: Option<u32>,
    pub profile: Option<AacProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaParams {
    Video(VideoParams),
    Audio(AudioParams),
}

/// Immutable description of one track's encoding.
///
/// Produced by demuxers for input tracks, by format strategies for requested
/// output tracks, and by encoders for the format they actually emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub mime: String,
    /// Track duration in microseconds, when the container records one
    pub duration_us: Option<i64>,
    pub params: MediaParams,
}

impl TrackFormat {
    pub fn video(mime: impl Into<String>, params: VideoParams) -> Self {
        Self {
            mime: mime.into(),
            duration_us: None,
            params: MediaParams::Video(params),
        }
    }

    pub fn audio(mime: impl Into<String>, params: AudioParams) -> Self {
        Self {
            mime: mime.into(),
            duration_us: None,
            params: MediaParams::Audio(params),
        }
    }

    /// Returns a copy of this format carrying the given duration.
    pub fn with_duration(self, duration_us: Option<i64>) -> Self {
        Self {
            duration_us,
            ..self
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self.params {
            MediaParams::Video(_) => TrackKind::Video,
            MediaParams::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn video_params(&self) -> Option<&VideoParams> {
        match &self.params {
            MediaParams::Video(params) => Some(params),
            MediaParams::Audio(_) => None,
        }
    }

    pub fn audio_params(&self) -> Option<&AudioParams> {
        match &self.params {
            MediaParams::Audio(params) => Some(params),
            MediaParams::Video(_) => None,
        }
    }

    /// Checks the MIME type against the codec family this kind must use.
    pub fn has_required_mime(&self) -> bool {
        self.mime == self.kind().required_mime()
    }
}

impl std::fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.params {
            MediaParams::Video(v) => write!(
                f,
                "{} {}x{}@{}fps bitrate={:?}",
                self.mime, v.width, v.height, v.frame_rate, v.bitrate
            ),
            MediaParams::Audio(a) => write!(
                f,
                "{} {}Hz {}ch bitrate={:?}",
                self.mime, a.sample_rate, a.channel_count, a.bitrate
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(width: u32, height: u32) -> TrackFormat {
        TrackFormat::video(
            MIME_VIDEO_AVC,
            VideoParams {
                width,
                height,
                frame_rate: 30,
                bitrate: None,
                key_frame_interval: None,
                color_format: None,
            },
        )
    }

    #[test]
    fn test_kind_and_required_mime() {
        let format = video(1920, 1080);
        assert_eq!(format.kind(), TrackKind::Video);
        assert!(format.has_required_mime());
        assert!(format.audio_params().is_none());

        let audio = TrackFormat::audio(
            "audio/opus",
            AudioParams {
                sample_rate: 48_000,
                channel_count: 2,
                bitrate: None,
                profile: None,
            },
        );
        assert_eq!(audio.kind(), TrackKind::Audio);
        assert!(!audio.has_required_mime());
    }

    #[test]
    fn test_edges_ignore_orientation() {
        let landscape = video(1920, 1080);
        let portrait = video(1080, 1920);
        assert_eq!(landscape.video_params().unwrap().edges(), (1920, 1080));
        assert_eq!(portrait.video_params().unwrap().edges(), (1920, 1080));
        assert!(!portrait.video_params().unwrap().is_landscape());
    }

    #[test]
    fn test_serde_tags_params_by_kind() {
        let format = video(1280, 720).with_duration(Some(10_000_000));
        let json = serde_json::to_string(&format).unwrap();
        assert!(json.contains("\"kind\":\"video\""));

        let parsed: TrackFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, format);
    }
}
