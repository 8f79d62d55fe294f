//! Fixed-ratio scaling policy with optional audio re-encoding.

use super::{FormatStrategy, OutputDecision};
use crate::TranscodeError;
use crate::media::{
    AacProfile, AudioParams, ColorFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC, TrackFormat,
    VideoParams,
};

/// Long-edge to short-edge ratio, e.g. 16:9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub long: u32,
    pub short: u32,
}

impl AspectRatio {
    pub const WIDESCREEN: AspectRatio = AspectRatio { long: 16, short: 9 };

    /// Exact match; no rounding tolerance.
    pub fn matches(&self, long_edge: u32, short_edge: u32) -> bool {
        if long_edge == 0 || short_edge == 0 {
            return false;
        }
        u64::from(long_edge) * u64::from(self.short) == u64::from(short_edge) * u64::from(self.long)
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.long, self.short)
    }
}

/// A value that is either copied from the input or set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSetting {
    #[default]
    AsIs,
    Value(u32),
}

impl AudioSetting {
    /// Maps the legacy negative sentinel to `AsIs`.
    pub fn from_raw(raw: i64) -> Self {
        match u32::try_from(raw) {
            Ok(value) => AudioSetting::Value(value),
            Err(_) => AudioSetting::AsIs,
        }
    }
}

/// Target video geometry and rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPolicy {
    pub long_edge: u32,
    pub short_edge: u32,
    pub ratio: AspectRatio,
    /// Bits per second
    pub bitrate: u32,
    pub frame_rate: u32,
    /// Seconds between key frames
    pub key_frame_interval: u32,
}

/// Audio handling. Either setting left `AsIs` keeps the track untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioPolicy {
    pub bitrate: AudioSetting,
    pub channels: AudioSetting,
    /// Only the input's own rate is accepted
    pub sample_rate: AudioSetting,
}

/// Strategy built from a video and an audio policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStrategy {
    pub video: VideoPolicy,
    pub audio: AudioPolicy,
}

impl PolicyStrategy {
    pub fn new(video: VideoPolicy, audio: AudioPolicy) -> Self {
        Self { video, audio }
    }
}

impl FormatStrategy for PolicyStrategy {
    fn video_output(&self, input: &TrackFormat) -> Result<OutputDecision, TranscodeError> {
        let Some(params) = input.video_params() else {
            return Ok(OutputDecision::PassThrough);
        };

        let (long, short) = params.edges();
        if !self.video.ratio.matches(long, short) {
            return Err(TranscodeError::UnsupportedAspectRatio {
                width: params.width,
                height: params.height,
                ratio: self.video.ratio.to_string(),
            });
        }

        let (width, height) = if params.is_landscape() {
            (self.video.long_edge, self.video.short_edge)
        } else {
            (self.video.short_edge, self.video.long_edge)
        };

        Ok(OutputDecision::Reencode(TrackFormat::video(
            MIME_VIDEO_AVC,
            VideoParams {
                width,
                height,
                frame_rate: self.video.frame_rate,
                bitrate: Some(self.video.bitrate),
                key_frame_interval: Some(self.video.key_frame_interval),
                color_format: Some(ColorFormat::Surface),
            },
        )))
    }

    fn audio_output(&self, input: &TrackFormat) -> Result<OutputDecision, TranscodeError> {
        let (AudioSetting::Value(bitrate), AudioSetting::Value(channels)) =
            (self.audio.bitrate, self.audio.channels)
        else {
            return Ok(OutputDecision::PassThrough);
        };
        let Some(params) = input.audio_params() else {
            return Ok(OutputDecision::PassThrough);
        };

        if let AudioSetting::Value(rate) = self.audio.sample_rate
            && rate != params.sample_rate
        {
            return Err(TranscodeError::UnsupportedAudioConversion {
                reason: format!(
                    "resampling {} Hz to {rate} Hz is not supported",
                    params.sample_rate
                ),
            });
        }

        if channels != params.channel_count {
            return Err(TranscodeError::UnsupportedAudioConversion {
                reason: format!(
                    "converting {} channels to {channels} is not supported",
                    params.channel_count
                ),
            });
        }

        Ok(OutputDecision::Reencode(TrackFormat::audio(
            MIME_AUDIO_AAC,
            AudioParams {
                sample_rate: params.sample_rate,
                channel_count: channels,
                bitrate: Some(bitrate),
                profile: Some(AacProfile::Lc),
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::negotiate::presets;

    fn video_input(width: u32, height: u32) -> TrackFormat {
        TrackFormat::video(
            MIME_VIDEO_AVC,
            VideoParams {
                width,
                height,
                frame_rate: 30,
                bitrate: Some(20_000_000),
                key_frame_interval: None,
                color_format: None,
            },
        )
    }

    fn audio_input(sample_rate: u32, channel_count: u32) -> TrackFormat {
        TrackFormat::audio(
            MIME_AUDIO_AAC,
            AudioParams {
                sample_rate,
                channel_count,
                bitrate: Some(128_000),
                profile: Some(AacProfile::Lc),
            },
        )
    }

    #[test]
    fn test_landscape_1080p_scales_to_720p() {
        let strategy = presets::hd720_with_bitrate(8_000_000);
        let decision = strategy.video_output(&video_input(1920, 1080)).unwrap();
        let target = decision.target_format().unwrap().video_params().unwrap().clone();

        assert_eq!((target.width, target.height), (1280, 720));
        assert_eq!(target.bitrate, Some(8_000_000));
        assert_eq!(target.frame_rate, 30);
        assert_eq!(target.key_frame_interval, Some(3));
        assert_eq!(target.color_format, Some(ColorFormat::Surface));
    }

    #[test]
    fn test_portrait_keeps_orientation() {
        let strategy = presets::hd720();
        let decision = strategy.video_output(&video_input(1080, 1920)).unwrap();
        let target = decision.target_format().unwrap().video_params().unwrap().clone();
        assert_eq!((target.width, target.height), (720, 1280));
    }

    #[test]
    fn test_four_by_three_rejected() {
        let strategy = presets::hd720();
        let error = strategy.video_output(&video_input(640, 480)).unwrap_err();
        assert!(matches!(
            error,
            TranscodeError::UnsupportedAspectRatio {
                width: 640,
                height: 480,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_sized_video_rejected() {
        let strategy = presets::hd720();
        assert!(strategy.video_output(&video_input(0, 0)).is_err());
    }

    #[test]
    fn test_audio_as_is_passes_through() {
        let strategy = presets::hd720_with_audio(8_000_000, AudioSetting::AsIs, AudioSetting::Value(2));
        let decision = strategy.audio_output(&audio_input(44_100, 2)).unwrap();
        assert!(decision.is_pass_through());

        let strategy = presets::hd720_with_audio(8_000_000, AudioSetting::Value(96_000), AudioSetting::AsIs);
        assert!(strategy.audio_output(&audio_input(44_100, 2)).unwrap().is_pass_through());
    }

    #[test]
    fn test_audio_reencode_preserves_sample_rate() {
        let strategy = presets::hd720_with_audio(
            8_000_000,
            AudioSetting::Value(96_000),
            AudioSetting::Value(2),
        );
        let decision = strategy.audio_output(&audio_input(48_000, 2)).unwrap();
        let target = decision.target_format().unwrap();
        let params = target.audio_params().unwrap();

        assert_eq!(target.mime, MIME_AUDIO_AAC);
        assert_eq!(params.sample_rate, 48_000);
        assert_eq!(params.channel_count, 2);
        assert_eq!(params.bitrate, Some(96_000));
        assert_eq!(params.profile, Some(AacProfile::Lc));
    }

    #[test]
    fn test_resampling_request_fails() {
        let mut strategy = presets::hd720_with_audio(
            8_000_000,
            AudioSetting::Value(96_000),
            AudioSetting::Value(2),
        );
        strategy.audio.sample_rate = AudioSetting::Value(48_000);

        let error = strategy.audio_output(&audio_input(44_100, 2)).unwrap_err();
        assert!(matches!(error, TranscodeError::UnsupportedAudioConversion { .. }));
    }

    #[test]
    fn test_rechanneling_request_fails() {
        let strategy = presets::hd720_with_audio(
            8_000_000,
            AudioSetting::Value(96_000),
            AudioSetting::Value(1),
        );
        let error = strategy.audio_output(&audio_input(44_100, 2)).unwrap_err();
        assert!(matches!(error, TranscodeError::UnsupportedAudioConversion { .. }));
    }

    #[test]
    fn test_audio_setting_from_legacy_sentinel() {
        assert_eq!(AudioSetting::from_raw(-1), AudioSetting::AsIs);
        assert_eq!(AudioSetting::from_raw(128_000), AudioSetting::Value(128_000));
    }

    proptest! {
        #[test]
        fn widescreen_inputs_keep_orientation_corrected_ratio(scale in 1u32..=240, portrait in any::<bool>()) {
            let (long, short) = (16 * scale, 9 * scale);
            let input = if portrait { video_input(short, long) } else { video_input(long, short) };

            let decision = presets::hd720().video_output(&input).unwrap();
            let target = decision.target_format().unwrap().video_params().unwrap().clone();

            prop_assert_eq!(target.is_landscape(), !portrait);
            let (out_long, out_short) = target.edges();
            prop_assert!(AspectRatio::WIDESCREEN.matches(out_long, out_short));
        }

        #[test]
        fn non_widescreen_inputs_are_rejected(width in 1u32..4000, height in 1u32..4000) {
            let long = width.max(height);
            let short = width.min(height);
            prop_assume!(long * 9 != short * 16);

            let result = presets::hd720().video_output(&video_input(width, height));
            let is_aspect_error = matches!(result, Err(TranscodeError::UnsupportedAspectRatio { .. }));
            prop_assert!(is_aspect_error);
        }
    }
}
