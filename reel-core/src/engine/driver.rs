//! Top-level transcode driver.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::progress::{CancellationFlag, Progress, ProgressReporter, ProgressSink};
use crate::TranscodeError;
use crate::channel::TrackReader;
use crate::config::EngineConfig;
use crate::media::{TrackFormat, TrackKind};
use crate::muxer::{InterleavingMuxer, SharedMuxer};
use crate::negotiate::{FormatStrategy, OutputDecision, negotiate};
use crate::service::{Demuxer, MediaBackend, SharedDemuxer};
use crate::track::{
    AudioBridge, AudioTrack, PassThroughTrack, TrackTranscoder, TrackWiring, VideoBridge,
    VideoTrack,
};

/// Terminal result of a job. Exactly one is reported per job.
#[derive(Debug)]
pub enum TranscodeOutcome {
    Completed,
    Cancelled,
    Failed(TranscodeError),
}

impl TranscodeOutcome {
    pub fn from_result(result: Result<(), TranscodeError>) -> Self {
        match result {
            Ok(()) => TranscodeOutcome::Completed,
            Err(e) if e.is_cancellation() => TranscodeOutcome::Cancelled,
            Err(e) => TranscodeOutcome::Failed(e),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TranscodeOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranscodeOutcome::Cancelled)
    }
}

impl std::fmt::Display for TranscodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeOutcome::Completed => f.write_str("completed"),
            TranscodeOutcome::Cancelled => f.write_str("cancelled"),
            TranscodeOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Input track chosen for the job together with its negotiated decision.
struct PlannedTrack {
    index: usize,
    input: TrackFormat,
    decision: OutputDecision,
}

struct EngineTrack {
    transcoder: Box<dyn TrackTranscoder>,
    duration_us: Option<i64>,
}

/// Owns the demuxer, the track pipelines and the muxer of one job.
///
/// Every resource is released exactly once, whether the job completes,
/// fails or is cancelled, and also when the engine is dropped unrun.
pub struct TranscoderEngine {
    demuxer: SharedDemuxer,
    muxer: SharedMuxer,
    tracks: Vec<EngineTrack>,
    config: EngineConfig,
    cancel: CancellationFlag,
    released: bool,
}

impl TranscoderEngine {
    /// Opens `input`, negotiates every track and prepares the pipelines.
    ///
    /// Negotiation happens before the output is created, so a rejected input
    /// leaves no file behind.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::NoTracksFound` - Input has neither video nor audio
    /// - `TranscodeError::UnsupportedAspectRatio` - Video cannot be scaled under `strategy`
    /// - `TranscodeError::UnsupportedAudioConversion` - Audio policy requires resampling or re-channeling
    /// - `TranscodeError::CodecUnavailable` - Platform lacks a required codec
    /// - `TranscodeError::InvalidOutputFormat` - A track would not end up AVC / AAC
    /// - `TranscodeError::Io` - Input unreadable or output not writable
    pub fn open(
        backend: Arc<dyn MediaBackend>,
        input: File,
        output: &Path,
        strategy: &dyn FormatStrategy,
        config: EngineConfig,
    ) -> Result<Self, TranscodeError> {
        let mut demuxer = backend.open_demuxer(input)?;

        let planned = match plan_tracks(demuxer.as_mut(), strategy) {
            Ok(planned) => planned,
            Err(e) => {
                demuxer.release();
                return Err(e);
            }
        };
        let sink = match backend.create_muxer(output) {
            Ok(sink) => sink,
            Err(e) => {
                demuxer.release();
                return Err(e.into());
            }
        };

        let container_duration = demuxer.duration_us();
        let demuxer: SharedDemuxer = Arc::new(Mutex::new(demuxer));
        let kinds: Vec<TrackKind> = planned.iter().map(|p| p.input.kind()).collect();
        let muxer = InterleavingMuxer::new(sink, &kinds).into_shared();

        let tracks = planned
            .into_iter()
            .map(|planned| {
                let kind = planned.input.kind();
                let duration_us = planned.input.duration_us.or(container_duration);
                let wiring = TrackWiring {
                    reader: TrackReader::new(demuxer.clone(), planned.index),
                    muxer: muxer.clone(),
                    input: planned.input,
                    dequeue_timeout: config.dequeue_timeout,
                };
                let transcoder: Box<dyn TrackTranscoder> = match (planned.decision, kind) {
                    (OutputDecision::PassThrough, _) => Box::new(PassThroughTrack::new(wiring)),
                    (OutputDecision::Reencode(target), TrackKind::Video) => Box::new(
                        VideoTrack::new(wiring, target, backend.clone(), VideoBridge),
                    ),
                    (OutputDecision::Reencode(target), TrackKind::Audio) => Box::new(
                        AudioTrack::new(wiring, target, backend.clone(), AudioBridge),
                    ),
                };
                EngineTrack {
                    transcoder,
                    duration_us,
                }
            })
            .collect();

        // From here on Drop releases everything if setup fails
        let mut engine = Self {
            demuxer,
            muxer,
            tracks,
            config,
            cancel: CancellationFlag::new(),
            released: false,
        };
        for track in &mut engine.tracks {
            track.transcoder.setup()?;
        }

        tracing::info!(
            "Transcode opened: {} -> {}",
            engine
                .track_kinds()
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join("+"),
            output.display()
        );
        Ok(engine)
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.tracks.iter().map(|t| t.transcoder.kind()).collect()
    }

    /// Flag that stops [`TranscoderEngine::run`] at its next iteration.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Uses an externally owned flag instead of the engine's own.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Mean per-track completion; indeterminate while any unfinished track
    /// has no known duration.
    pub fn progress(&self) -> Progress {
        if self.tracks.is_empty() {
            return Progress::Indeterminate;
        }
        let mut total = 0.0;
        for track in &self.tracks {
            if track.transcoder.is_finished() {
                total += 1.0;
                continue;
            }
            match track.duration_us {
                Some(duration) if duration > 0 => {
                    let written = track.transcoder.written_pts_us() as f64;
                    total += (written / duration as f64).clamp(0.0, 1.0);
                }
                _ => return Progress::Indeterminate,
            }
        }
        Progress::Fraction(total / self.tracks.len() as f64)
    }

    /// Pumps every track until all are finished, then finalizes the output.
    ///
    /// Blocks the calling thread; run it on a dedicated worker.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Cancelled` - Cancellation flag observed; output left unfinalized
    /// - `TranscodeError::Codec` - A codec failed; the sibling track is aborted too
    /// - `TranscodeError::Muxer` - Container writer rejected a sample or the finalization
    pub fn run(mut self, sink: &mut dyn ProgressSink) -> Result<(), TranscodeError> {
        let result = self.pump(sink);
        self.release();

        match &result {
            Ok(()) => tracing::info!("Transcode completed"),
            Err(e) if e.is_cancellation() => tracing::warn!("Transcode cancelled"),
            Err(e) => tracing::error!("Transcode failed: {e}"),
        }
        result
    }

    fn pump(&mut self, sink: &mut dyn ProgressSink) -> Result<(), TranscodeError> {
        let mut reporter = ProgressReporter::new(self.config.progress_interval_steps);
        let mut iterations: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            if self.tracks.iter().all(|t| t.transcoder.is_finished()) {
                break;
            }

            let mut progressed = false;
            for track in &mut self.tracks {
                if !track.transcoder.is_finished() {
                    progressed |= track.transcoder.step_pipeline()?;
                }
            }
            iterations += 1;
            reporter.tick(self.progress(), sink);

            if !progressed {
                std::thread::sleep(self.config.idle_sleep);
            }
        }

        self.muxer.lock().finish()?;
        reporter.finish(sink);
        tracing::debug!("Pump loop done after {iterations} iterations");
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for track in &mut self.tracks {
            track.transcoder.release();
        }
        self.muxer.lock().release();
        self.demuxer.lock().release();
    }
}

impl Drop for TranscoderEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Picks the first video and first audio track and negotiates both.
fn plan_tracks(
    demuxer: &mut dyn Demuxer,
    strategy: &dyn FormatStrategy,
) -> Result<Vec<PlannedTrack>, TranscodeError> {
    let mut video = None;
    let mut audio = None;
    for index in 0..demuxer.track_count() {
        let format = demuxer.track_format(index)?;
        let slot = match format.kind() {
            TrackKind::Video => &mut video,
            TrackKind::Audio => &mut audio,
        };
        if slot.is_none() {
            *slot = Some((index, format));
        }
    }

    let mut planned = Vec::new();
    for (index, input) in [video, audio].into_iter().flatten() {
        let decision = negotiate(&input, strategy)?;
        planned.push(PlannedTrack {
            index,
            input,
            decision,
        });
    }
    if planned.is_empty() {
        return Err(TranscodeError::NoTracksFound);
    }

    for track in &planned {
        demuxer.select_track(track.index)?;
    }
    Ok(planned)
}
