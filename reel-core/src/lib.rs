//! Reel Core - Track-level media transcoding engine
//!
//! Demuxes a container into its video and audio tracks, runs each track
//! through its own decode and re-encode (or pass-through) pipeline, and
//! interleaves both results into a single output container. Platform codecs
//! and container formats are reached only through the [`service`] traits.

pub mod channel;
pub mod config;
pub mod engine;
pub mod media;
pub mod muxer;
pub mod negotiate;
pub mod queue;
pub mod service;
pub mod track;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

// Re-export main types for convenient access
pub use config::ReelConfig;
pub use engine::{CancellationFlag, Progress, ProgressSink, TranscodeOutcome, TranscoderEngine};
pub use media::{Sample, SampleFlags, TrackFormat, TrackKind};
pub use muxer::{InterleavingMuxer, MuxerError, MuxerState};
pub use negotiate::{FormatStrategy, OutputDecision, negotiate};
pub use queue::{JobHandle, JobId, TranscodeEvent, TranscodeQueue, TranscodeRequest};
pub use service::{CodecError, MediaBackend};

/// Job-level errors. Every variant aborts the whole transcode.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Unsupported aspect ratio {width}x{height}, expected {ratio}")]
    UnsupportedAspectRatio {
        width: u32,
        height: u32,
        ratio: String,
    },

    #[error("Unsupported audio conversion: {reason}")]
    UnsupportedAudioConversion { reason: String },

    #[error("Codec unavailable for {mime}: {reason}")]
    CodecUnavailable { mime: String, reason: String },

    #[error("Invalid {kind} output format: expected {expected}, got {actual}")]
    InvalidOutputFormat {
        kind: TrackKind,
        expected: String,
        actual: String,
    },

    #[error("No audio or video track found in input")]
    NoTracksFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(CodecError),

    #[error("Muxer error: {0}")]
    Muxer(#[from] MuxerError),

    #[error("Transcode cancelled")]
    Cancelled,

    #[error("Transcode queue is shutting down")]
    QueueShutdown,
}

impl From<CodecError> for TranscodeError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(e) => TranscodeError::Io(e),
            CodecError::Unavailable { mime, reason } => {
                TranscodeError::CodecUnavailable { mime, reason }
            }
            other => TranscodeError::Codec(other),
        }
    }
}

impl TranscodeError {
    /// Cancellation is a terminal outcome of its own, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TranscodeError::Cancelled)
    }

    /// Checks if the input itself cannot be transcoded under the chosen policy.
    pub fn is_input_rejection(&self) -> bool {
        matches!(
            self,
            TranscodeError::UnsupportedAspectRatio { .. }
                | TranscodeError::UnsupportedAudioConversion { .. }
                | TranscodeError::NoTracksFound
        )
    }

    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            TranscodeError::UnsupportedAspectRatio { width, height, ratio } => {
                format!("This video is not {ratio} ({width}x{height}) and cannot be transcoded")
            }
            TranscodeError::UnsupportedAudioConversion { reason } => {
                format!("Audio cannot be converted: {reason}")
            }
            TranscodeError::CodecUnavailable { mime, .. } => {
                format!("No codec on this platform can handle {mime}")
            }
            TranscodeError::InvalidOutputFormat { kind, actual, .. } => {
                format!("The {kind} encoder produced an unsupported format ({actual})")
            }
            TranscodeError::NoTracksFound => "The input has no audio or video track".to_string(),
            TranscodeError::Io(_) => "File system error occurred".to_string(),
            TranscodeError::Codec(_) | TranscodeError::Muxer(_) => {
                "Transcoding failed inside the media pipeline".to_string()
            }
            TranscodeError::Cancelled => "Transcode was cancelled".to_string(),
            TranscodeError::QueueShutdown => "Transcoder is shutting down".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TranscodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_map_to_taxonomy() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            TranscodeError::from(CodecError::Io(io)),
            TranscodeError::Io(_)
        ));

        let unavailable = CodecError::Unavailable {
            mime: "video/avc".to_string(),
            reason: "no encoder".to_string(),
        };
        assert!(matches!(
            TranscodeError::from(unavailable),
            TranscodeError::CodecUnavailable { .. }
        ));

        let failed = CodecError::Failed {
            reason: "boom".to_string(),
        };
        assert!(matches!(
            TranscodeError::from(failed),
            TranscodeError::Codec(_)
        ));
    }

    #[test]
    fn test_error_classification() {
        assert!(TranscodeError::Cancelled.is_cancellation());
        assert!(!TranscodeError::NoTracksFound.is_cancellation());
        assert!(TranscodeError::NoTracksFound.is_input_rejection());
        assert!(
            TranscodeError::UnsupportedAspectRatio {
                width: 640,
                height: 480,
                ratio: "16:9".to_string(),
            }
            .user_message()
            .contains("640x480")
        );
    }
}
