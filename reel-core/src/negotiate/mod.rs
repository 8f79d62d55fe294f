//! Output format negotiation.
//!
//! A [`FormatStrategy`] decides, per input track, whether the track is copied
//! unchanged or re-encoded to a concrete target format. Negotiation is pure:
//! the same input format and strategy always produce the same decision.

pub mod policy;
pub mod presets;

pub use policy::{AspectRatio, AudioPolicy, AudioSetting, PolicyStrategy, VideoPolicy};

use crate::TranscodeError;
use crate::media::{TrackFormat, TrackKind};

/// What to do with one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDecision {
    /// Copy coded samples unchanged
    PassThrough,
    /// Decode and re-encode to the given format
    Reencode(TrackFormat),
}

impl OutputDecision {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, OutputDecision::PassThrough)
    }

    pub fn target_format(&self) -> Option<&TrackFormat> {
        match self {
            OutputDecision::PassThrough => None,
            OutputDecision::Reencode(format) => Some(format),
        }
    }
}

/// Policy deciding the output format of each track.
pub trait FormatStrategy: Send + Sync {
    /// # Errors
    ///
    /// - `TranscodeError::UnsupportedAspectRatio` - Input cannot be scaled under this policy
    fn video_output(&self, input: &TrackFormat) -> Result<OutputDecision, TranscodeError>;

    /// # Errors
    ///
    /// - `TranscodeError::UnsupportedAudioConversion` - Policy asks for resampling or re-channeling
    fn audio_output(&self, input: &TrackFormat) -> Result<OutputDecision, TranscodeError>;
}

/// Asks `strategy` for the output decision of the track described by `input`.
///
/// # Errors
///
/// - `TranscodeError::UnsupportedAspectRatio` - Video input does not match the policy's ratio
/// - `TranscodeError::UnsupportedAudioConversion` - Audio policy requires resampling or re-channeling
pub fn negotiate(
    input: &TrackFormat,
    strategy: &dyn FormatStrategy,
) -> Result<OutputDecision, TranscodeError> {
    let decision = match input.kind() {
        TrackKind::Video => strategy.video_output(input)?,
        TrackKind::Audio => strategy.audio_output(input)?,
    };

    match &decision {
        OutputDecision::PassThrough => {
            tracing::debug!("{} track ({}) passes through", input.kind(), input);
        }
        OutputDecision::Reencode(target) => {
            tracing::debug!("{} track re-encodes {} -> {}", input.kind(), input, target);
        }
    }

    Ok(decision)
}
