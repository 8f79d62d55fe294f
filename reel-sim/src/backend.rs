//! `MediaBackend` wiring the simulated services together, with fault
//! injection for failure-path tests.

use std::fs::File;
use std::path::Path;

use reel_core::media::{
    AudioParams, MIME_AUDIO_AAC, MIME_AUDIO_RAW, MIME_VIDEO_AVC, MIME_VIDEO_RAW, MediaParams,
    TrackFormat, VideoParams,
};
use reel_core::service::{Codec, CodecError, Demuxer, MediaBackend, Muxer};

use crate::codec::{CodecRole, SimCodec, SimCodecConfig};
use crate::demuxer::SimDemuxer;
use crate::muxer::SimMuxer;
use crate::probe::{HandleKind, HandleProbe};

/// Failures to inject into services created by a [`SimBackend`].
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// MIME types with no codec at all
    pub unavailable: Vec<String>,
    /// Encoders announce this MIME instead of the requested one
    pub encoder_mime: Option<String>,
    /// Encoders fail after accepting this many inputs
    pub fail_encoder_after: Option<usize>,
    /// Decoders fail after accepting this many inputs
    pub fail_decoder_after: Option<usize>,
}

/// Deterministic backend over reel containers.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    probe: HandleProbe,
    codec_config: SimCodecConfig,
    faults: FaultPlan,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec_config(mut self, config: SimCodecConfig) -> Self {
        self.codec_config = config;
        self
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_unavailable_codec(mut self, mime: &str) -> Self {
        self.faults.unavailable.push(mime.to_string());
        self
    }

    pub fn with_encoder_mime(mut self, mime: &str) -> Self {
        self.faults.encoder_mime = Some(mime.to_string());
        self
    }

    pub fn with_failing_encoder(mut self, after_inputs: usize) -> Self {
        self.faults.fail_encoder_after = Some(after_inputs);
        self
    }

    pub fn with_failing_decoder(mut self, after_inputs: usize) -> Self {
        self.faults.fail_decoder_after = Some(after_inputs);
        self
    }

    /// Live-handle counter shared by every service this backend creates.
    pub fn probe(&self) -> &HandleProbe {
        &self.probe
    }

    fn check_supported(&self, mime: &str, role: &str) -> Result<(), CodecError> {
        let supported = mime == MIME_VIDEO_AVC || mime == MIME_AUDIO_AAC;
        if !supported || self.faults.unavailable.iter().any(|m| m == mime) {
            return Err(CodecError::Unavailable {
                mime: mime.to_string(),
                reason: format!("no simulated {role}"),
            });
        }
        Ok(())
    }
}

/// Format a decoder of `input` emits.
fn decoded_format(input: &TrackFormat) -> TrackFormat {
    match &input.params {
        MediaParams::Video(video) => TrackFormat::video(
            MIME_VIDEO_RAW,
            VideoParams {
                bitrate: None,
                key_frame_interval: None,
                ..video.clone()
            },
        ),
        MediaParams::Audio(audio) => TrackFormat::audio(
            MIME_AUDIO_RAW,
            AudioParams {
                bitrate: None,
                profile: None,
                ..audio.clone()
            },
        ),
    }
}

fn validate_encoder_format(output: &TrackFormat) -> Result<(), CodecError> {
    let valid = match &output.params {
        MediaParams::Video(video) => video.width > 0 && video.height > 0 && video.frame_rate > 0,
        MediaParams::Audio(audio) => audio.sample_rate > 0 && audio.channel_count > 0,
    };
    if valid {
        Ok(())
    } else {
        Err(CodecError::Configure {
            reason: format!("unusable encoder format {output}"),
        })
    }
}

impl MediaBackend for SimBackend {
    fn open_demuxer(&self, input: File) -> Result<Box<dyn Demuxer>, CodecError> {
        let demuxer = SimDemuxer::open(input, self.probe.open(HandleKind::Demuxer))?;
        Ok(Box::new(demuxer))
    }

    fn create_decoder(&self, input: &TrackFormat) -> Result<Box<dyn Codec>, CodecError> {
        self.check_supported(&input.mime, "decoder")?;
        let mut codec = SimCodec::new(
            CodecRole::Decoder,
            input.clone(),
            decoded_format(input),
            self.codec_config,
            self.probe.open(HandleKind::Codec),
        );
        if let Some(after) = self.faults.fail_decoder_after {
            codec = codec.failing_after(after);
        }
        Ok(Box::new(codec))
    }

    fn create_encoder(&self, output: &TrackFormat) -> Result<Box<dyn Codec>, CodecError> {
        self.check_supported(&output.mime, "encoder")?;
        validate_encoder_format(output)?;

        let raw = decoded_format(output);
        let mut emitted = output.clone().with_duration(None);
        if let Some(mime) = &self.faults.encoder_mime {
            emitted.mime = mime.clone();
        }
        let mut codec = SimCodec::new(
            CodecRole::Encoder,
            raw,
            emitted,
            self.codec_config,
            self.probe.open(HandleKind::Codec),
        );
        if let Some(after) = self.faults.fail_encoder_after {
            codec = codec.failing_after(after);
        }
        Ok(Box::new(codec))
    }

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>, CodecError> {
        let muxer = SimMuxer::create(output, self.probe.open(HandleKind::Muxer))?;
        Ok(Box::new(muxer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avc(width: u32, height: u32) -> TrackFormat {
        TrackFormat::video(
            MIME_VIDEO_AVC,
            VideoParams {
                width,
                height,
                frame_rate: 30,
                bitrate: Some(8_000_000),
                key_frame_interval: Some(3),
                color_format: None,
            },
        )
    }

    #[test]
    fn test_supported_codecs_are_counted() {
        let backend = SimBackend::new();
        let mut decoder = backend.create_decoder(&avc(1920, 1080)).unwrap();
        let mut encoder = backend.create_encoder(&avc(1280, 720)).unwrap();
        assert_eq!(backend.probe().live_of(HandleKind::Codec), 2);

        assert_eq!(encoder.output_format().unwrap().mime, MIME_VIDEO_AVC);
        assert!(decoder.output_format().is_none());

        decoder.release();
        encoder.release();
        assert_eq!(backend.probe().live(), 0);
    }

    #[test]
    fn test_unknown_and_disabled_codecs_unavailable() {
        let backend = SimBackend::new().with_unavailable_codec(MIME_AUDIO_AAC);
        let mut hevc = avc(1920, 1080);
        hevc.mime = "video/hevc".to_string();

        assert!(matches!(
            backend.create_decoder(&hevc),
            Err(CodecError::Unavailable { .. })
        ));
        let aac = TrackFormat::audio(
            MIME_AUDIO_AAC,
            AudioParams {
                sample_rate: 48_000,
                channel_count: 2,
                bitrate: None,
                profile: None,
            },
        );
        assert!(matches!(
            backend.create_encoder(&aac),
            Err(CodecError::Unavailable { .. })
        ));
        assert_eq!(backend.probe().opened(), 0);
    }

    #[test]
    fn test_encoder_mime_override() {
        let backend = SimBackend::new().with_encoder_mime("video/hevc");
        let mut encoder = backend.create_encoder(&avc(1280, 720)).unwrap();
        assert_eq!(encoder.output_format().unwrap().mime, "video/hevc");
        encoder.release();
    }

    #[test]
    fn test_degenerate_encoder_format_rejected() {
        let backend = SimBackend::new();
        assert!(matches!(
            backend.create_encoder(&avc(0, 720)),
            Err(CodecError::Configure { .. })
        ));
    }

    #[test]
    fn test_missing_output_directory_fails_muxer_creation() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let result = backend.create_muxer(&dir.path().join("missing").join("out.reel"));
        assert!(matches!(result, Err(CodecError::Io(_))));
        assert_eq!(backend.probe().live(), 0);
    }
}
