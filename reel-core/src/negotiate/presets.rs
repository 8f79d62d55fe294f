//! Ready-made strategies.
//!
//! The 720p preset follows a common phone camera recording profile: 16:9
//! 1280x720 AVC at 8 Mbps, 30 fps, a key frame every 3 seconds. Audio is
//! copied unless both an audio bitrate and a channel count are given.

use super::policy::{AspectRatio, AudioPolicy, AudioSetting, PolicyStrategy, VideoPolicy};
use super::{FormatStrategy, OutputDecision};
use crate::TranscodeError;
use crate::media::TrackFormat;

pub const HD720_LONG_EDGE: u32 = 1280;
pub const HD720_SHORT_EDGE: u32 = 720;
pub const DEFAULT_VIDEO_BITRATE: u32 = 8_000_000;
const DEFAULT_FRAME_RATE: u32 = 30;
const DEFAULT_KEY_FRAME_INTERVAL: u32 = 3;

/// 720p at the default bitrate, audio copied.
pub fn hd720() -> PolicyStrategy {
    hd720_with_bitrate(DEFAULT_VIDEO_BITRATE)
}

/// 720p at `bitrate` bits per second, audio copied.
pub fn hd720_with_bitrate(bitrate: u32) -> PolicyStrategy {
    hd720_with_audio(bitrate, AudioSetting::AsIs, AudioSetting::AsIs)
}

/// 720p at `bitrate`, audio re-encoded to AAC when both audio settings are given.
pub fn hd720_with_audio(
    bitrate: u32,
    audio_bitrate: AudioSetting,
    audio_channels: AudioSetting,
) -> PolicyStrategy {
    PolicyStrategy::new(
        VideoPolicy {
            long_edge: HD720_LONG_EDGE,
            short_edge: HD720_SHORT_EDGE,
            ratio: AspectRatio::WIDESCREEN,
            bitrate,
            frame_rate: DEFAULT_FRAME_RATE,
            key_frame_interval: DEFAULT_KEY_FRAME_INTERVAL,
        },
        AudioPolicy {
            bitrate: audio_bitrate,
            channels: audio_channels,
            sample_rate: AudioSetting::AsIs,
        },
    )
}

/// Copies every track unchanged into the output container.
pub fn remux() -> RemuxStrategy {
    RemuxStrategy
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemuxStrategy;

impl FormatStrategy for RemuxStrategy {
    fn video_output(&self, _input: &TrackFormat) -> Result<OutputDecision, TranscodeError> {
        Ok(OutputDecision::PassThrough)
    }

    fn audio_output(&self, _input: &TrackFormat) -> Result<OutputDecision, TranscodeError> {
        Ok(OutputDecision::PassThrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MIME_VIDEO_AVC, VideoParams};

    #[test]
    fn test_hd720_defaults() {
        let strategy = hd720();
        assert_eq!(strategy.video.bitrate, DEFAULT_VIDEO_BITRATE);
        assert_eq!(strategy.video.ratio, AspectRatio::WIDESCREEN);
        assert_eq!(strategy.audio, AudioPolicy::default());
    }

    #[test]
    fn test_remux_never_reencodes() {
        let input = TrackFormat::video(
            MIME_VIDEO_AVC,
            VideoParams {
                width: 640,
                height: 480,
                frame_rate: 25,
                bitrate: None,
                key_frame_interval: None,
                color_format: None,
            },
        );
        assert!(remux().video_output(&input).unwrap().is_pass_through());
    }
}
