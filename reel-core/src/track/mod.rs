//! Per-track pipelines.
//!
//! Each track of a job is driven by one [`TrackTranscoder`]. Pass-through
//! tracks relay coded samples from the demuxer straight to the muxer;
//! re-encoded tracks run demuxer -> decoder -> encoder -> muxer. Both share
//! the same lifecycle:
//!
//! ```text
//! Uninitialized --setup--> Initialized --first step--> Running --eos--> Finished
//! ```

pub mod passthrough;
pub mod reencode;

use std::time::Duration;

pub use passthrough::PassThroughTrack;
pub use reencode::{AudioBridge, AudioTrack, FrameBridge, ReencodeTrack, VideoBridge, VideoTrack};

use crate::TranscodeError;
use crate::channel::TrackReader;
use crate::media::{TrackFormat, TrackKind};
use crate::muxer::SharedMuxer;
use crate::service::CodecError;

/// Lifecycle of a track pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackState {
    Uninitialized,
    /// Codecs configured but not started
    Initialized,
    Running,
    /// End-of-stream delivered to the muxer; terminal
    Finished,
}

impl TrackState {
    pub(crate) fn advance(&mut self, kind: TrackKind, next: TrackState) {
        debug_assert!(next > *self, "track state must move forward");
        tracing::debug!("{kind} track {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// Driver of one track's pipeline.
pub trait TrackTranscoder: Send {
    fn kind(&self) -> TrackKind;

    fn state(&self) -> TrackState;

    /// Configures the codecs for the negotiated formats.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::CodecUnavailable` - Platform cannot create a required codec
    /// - `TranscodeError::InvalidOutputFormat` - Output would not be AVC / AAC
    fn setup(&mut self) -> Result<(), TranscodeError>;

    /// Performs one bounded unit of work and reports whether anything moved.
    /// A finished track does nothing and returns `false`.
    ///
    /// # Errors
    ///
    /// Codec and muxer failures are terminal for the whole job.
    fn step_pipeline(&mut self) -> Result<bool, TranscodeError>;

    fn is_finished(&self) -> bool {
        self.state() == TrackState::Finished
    }

    /// Highest timestamp handed to the muxer so far.
    fn written_pts_us(&self) -> i64;

    /// Tears down codec resources. Idempotent.
    fn release(&mut self);
}

/// Everything a track pipeline needs from the engine.
pub struct TrackWiring {
    pub reader: TrackReader,
    pub muxer: SharedMuxer,
    /// Format of the input track as reported by the demuxer
    pub input: TrackFormat,
    pub dequeue_timeout: Duration,
}

pub(crate) fn not_set_up(kind: TrackKind) -> TranscodeError {
    TranscodeError::Codec(CodecError::IllegalState {
        reason: format!("{kind} track stepped before setup"),
    })
}

pub(crate) fn check_output_mime(kind: TrackKind, format: &TrackFormat) -> Result<(), TranscodeError> {
    if format.kind() == kind && format.has_required_mime() {
        return Ok(());
    }
    Err(TranscodeError::InvalidOutputFormat {
        kind,
        expected: kind.required_mime().to_string(),
        actual: format.mime.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MIME_VIDEO_RAW;
    use crate::test_mocks::mock_format;

    #[test]
    fn test_state_order() {
        assert!(TrackState::Uninitialized < TrackState::Initialized);
        assert!(TrackState::Running < TrackState::Finished);

        let mut state = TrackState::Uninitialized;
        state.advance(TrackKind::Video, TrackState::Initialized);
        assert_eq!(state, TrackState::Initialized);
    }

    #[test]
    fn test_output_mime_check() {
        assert!(check_output_mime(TrackKind::Video, &mock_format(TrackKind::Video)).is_ok());
        assert!(check_output_mime(TrackKind::Video, &mock_format(TrackKind::Audio)).is_err());

        let mut raw = mock_format(TrackKind::Video);
        raw.mime = MIME_VIDEO_RAW.to_string();
        let error = check_output_mime(TrackKind::Video, &raw).unwrap_err();
        assert!(matches!(
            error,
            TranscodeError::InvalidOutputFormat { ref actual, .. } if actual == MIME_VIDEO_RAW
        ));
    }
}
