//! Interleaving front-end of the container writer.
//!
//! The container writer cannot be started until every track's output format
//! is fixed, yet one track may produce output long before the other's encoder
//! settles. [`InterleavingMuxer`] buffers samples per track until all expected
//! formats are registered, starts the writer exactly once, and from then on
//! forwards samples in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::media::{Sample, TrackFormat, TrackKind};
use crate::service::{CodecError, Muxer};

/// Muxer handle shared by the engine and every track transcoder.
pub type SharedMuxer = Arc<Mutex<InterleavingMuxer>>;

/// Lifecycle of the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Waiting for output formats, samples are buffered
    Unstarted,
    /// Writer open, samples pass straight through
    Started,
    /// Container finalized
    Finished,
}

/// Misuse of the muxer or failure of the container writer behind it.
#[derive(Debug, Error)]
pub enum MuxerError {
    #[error("muxer already finished")]
    AlreadyFinished,

    #[error("muxer never started, an output format is missing")]
    NotStarted,

    #[error("{kind} timestamp went backwards: {previous_us} -> {pts_us}")]
    TimestampRegression {
        kind: TrackKind,
        previous_us: i64,
        pts_us: i64,
    },

    #[error("no {kind} track expected by this muxer")]
    UnknownTrack { kind: TrackKind },

    #[error("{kind} output format registered twice")]
    DuplicateFormat { kind: TrackKind },

    #[error("{kind} track already ended")]
    TrackEnded { kind: TrackKind },

    #[error("{kind} track has not ended")]
    TrackNotEnded { kind: TrackKind },

    #[error("container writer failed: {0}")]
    Sink(#[from] CodecError),
}

#[derive(Debug)]
struct Lane {
    kind: TrackKind,
    format: Option<TrackFormat>,
    container_track: usize,
    pending: VecDeque<Sample>,
    last_pts_us: Option<i64>,
    ended: bool,
    written: u64,
}

impl Lane {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            format: None,
            container_track: 0,
            pending: VecDeque::new(),
            last_pts_us: None,
            ended: false,
            written: 0,
        }
    }
}

/// Single consumer fed by one producer per track.
pub struct InterleavingMuxer {
    sink: Box<dyn Muxer>,
    state: MuxerState,
    /// Ordered by container track index
    lanes: Vec<Lane>,
    released: bool,
}

impl InterleavingMuxer {
    /// Creates a muxer expecting exactly the given tracks.
    ///
    /// Container track indices follow the order of `tracks` after sorting,
    /// so video always lands before audio.
    pub fn new(sink: Box<dyn Muxer>, tracks: &[TrackKind]) -> Self {
        let mut kinds = tracks.to_vec();
        kinds.sort();
        kinds.dedup();
        Self {
            sink,
            state: MuxerState::Unstarted,
            lanes: kinds.into_iter().map(Lane::new).collect(),
            released: false,
        }
    }

    pub fn into_shared(self) -> SharedMuxer {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    /// Samples forwarded to the writer so far for `kind`.
    pub fn written_samples(&self, kind: TrackKind) -> u64 {
        self.lanes
            .iter()
            .find(|lane| lane.kind == kind)
            .map_or(0, |lane| lane.written)
    }

    /// Samples still waiting for the writer to start.
    pub fn buffered_samples(&self) -> usize {
        self.lanes.iter().map(|lane| lane.pending.len()).sum()
    }

    fn lane_index(&self, kind: TrackKind) -> Result<usize, MuxerError> {
        self.lanes
            .iter()
            .position(|lane| lane.kind == kind)
            .ok_or(MuxerError::UnknownTrack { kind })
    }

    /// Records the output format of `kind`. The registration that completes
    /// the set starts the writer and flushes everything buffered so far.
    ///
    /// # Errors
    ///
    /// - `MuxerError::AlreadyFinished` - Container already finalized
    /// - `MuxerError::UnknownTrack` - Track not expected by this muxer
    /// - `MuxerError::DuplicateFormat` - Format for this track already registered
    /// - `MuxerError::Sink` - Writer rejected a track, the start or a flushed sample
    pub fn register_track_format(
        &mut self,
        kind: TrackKind,
        format: TrackFormat,
    ) -> Result<(), MuxerError> {
        if self.state == MuxerState::Finished {
            return Err(MuxerError::AlreadyFinished);
        }
        let index = self.lane_index(kind)?;
        let lane = &mut self.lanes[index];
        if lane.format.is_some() {
            return Err(MuxerError::DuplicateFormat { kind });
        }
        tracing::debug!("Muxer registered {kind} format {format}");
        lane.format = Some(format);

        if self.lanes.iter().all(|lane| lane.format.is_some()) {
            self.start_writer()?;
        }
        Ok(())
    }

    fn start_writer(&mut self) -> Result<(), MuxerError> {
        for lane in &mut self.lanes {
            if let Some(format) = &lane.format {
                lane.container_track = self.sink.add_track(format)?;
            }
        }
        self.sink.start()?;
        self.state = MuxerState::Started;
        tracing::debug!(
            "Muxer started with {} tracks, flushing {} buffered samples",
            self.lanes.len(),
            self.buffered_samples()
        );
        self.flush_pending()
    }

    /// Drains buffered samples, lowest timestamp first; ties keep track order.
    fn flush_pending(&mut self) -> Result<(), MuxerError> {
        loop {
            let next = self
                .lanes
                .iter()
                .enumerate()
                .filter_map(|(i, lane)| lane.pending.front().map(|s| (s.pts_us, i)))
                .min();
            let Some((_, i)) = next else {
                return Ok(());
            };

            let lane = &mut self.lanes[i];
            if let Some(sample) = lane.pending.pop_front() {
                self.sink.write_sample(lane.container_track, &sample)?;
                lane.written += 1;
            }
        }
    }

    /// Accepts one output sample of `kind`.
    ///
    /// An end-of-stream sample closes the track and is not forwarded.
    ///
    /// # Errors
    ///
    /// - `MuxerError::AlreadyFinished` - Container already finalized
    /// - `MuxerError::UnknownTrack` - Track not expected by this muxer
    /// - `MuxerError::TrackEnded` - Track already delivered its end-of-stream
    /// - `MuxerError::TimestampRegression` - Timestamp lower than the previous one
    /// - `MuxerError::Sink` - Writer rejected the sample
    pub fn write_sample(&mut self, kind: TrackKind, sample: Sample) -> Result<(), MuxerError> {
        if self.state == MuxerState::Finished {
            return Err(MuxerError::AlreadyFinished);
        }
        let started = self.state == MuxerState::Started;
        let index = self.lane_index(kind)?;
        let lane = &mut self.lanes[index];
        if lane.ended {
            return Err(MuxerError::TrackEnded { kind });
        }
        if sample.is_end_of_stream() {
            tracing::debug!("Muxer saw end of {kind} stream after {} samples", lane.written);
            lane.ended = true;
            return Ok(());
        }
        if let Some(previous_us) = lane.last_pts_us
            && sample.pts_us < previous_us
        {
            return Err(MuxerError::TimestampRegression {
                kind,
                previous_us,
                pts_us: sample.pts_us,
            });
        }
        lane.last_pts_us = Some(sample.pts_us);

        if started {
            self.sink.write_sample(lane.container_track, &sample)?;
            lane.written += 1;
        } else {
            lane.pending.push_back(sample);
        }
        Ok(())
    }

    /// Finalizes the container once every track has ended.
    ///
    /// # Errors
    ///
    /// - `MuxerError::AlreadyFinished` - Called a second time
    /// - `MuxerError::NotStarted` - Some track never registered its format
    /// - `MuxerError::TrackNotEnded` - Some track has not delivered end-of-stream
    /// - `MuxerError::Sink` - Writer failed to finalize
    pub fn finish(&mut self) -> Result<(), MuxerError> {
        match self.state {
            MuxerState::Finished => return Err(MuxerError::AlreadyFinished),
            MuxerState::Unstarted => return Err(MuxerError::NotStarted),
            MuxerState::Started => {}
        }
        if let Some(lane) = self.lanes.iter().find(|lane| !lane.ended) {
            return Err(MuxerError::TrackNotEnded { kind: lane.kind });
        }

        self.flush_pending()?;
        self.sink.stop()?;
        self.state = MuxerState::Finished;
        tracing::debug!(
            "Muxer finalized ({})",
            self.lanes
                .iter()
                .map(|lane| format!("{}: {} samples", lane.kind, lane.written))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Releases the container writer. Safe to call more than once.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sink.release();
        }
    }
}

impl Drop for InterleavingMuxer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;
    use crate::media::SampleFlags;
    use crate::test_mocks::{MockMuxer, MuxerCall, MuxerLog, ResourceProbe, mock_format};

    fn sample(pts_us: i64) -> Sample {
        Sample::new(Bytes::from_static(b"data"), pts_us, SampleFlags::NONE)
    }

    fn muxer(log: &MuxerLog, probe: &ResourceProbe) -> InterleavingMuxer {
        let sink = MockMuxer::new(log.clone(), probe.clone());
        InterleavingMuxer::new(Box::new(sink), &[TrackKind::Audio, TrackKind::Video])
    }

    fn written(log: &MuxerLog) -> Vec<(usize, i64)> {
        log.lock()
            .iter()
            .filter_map(|call| match call {
                MuxerCall::Write { track, sample } => Some((*track, sample.pts_us)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_buffers_until_both_formats_known() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut muxer = muxer(&log, &probe);

        muxer
            .register_track_format(TrackKind::Audio, mock_format(TrackKind::Audio))
            .unwrap();
        muxer.write_sample(TrackKind::Audio, sample(0)).unwrap();
        muxer.write_sample(TrackKind::Audio, sample(20)).unwrap();
        assert!(log.lock().is_empty(), "writer touched before start");
        assert_eq!(muxer.state(), MuxerState::Unstarted);

        muxer
            .register_track_format(TrackKind::Video, mock_format(TrackKind::Video))
            .unwrap();
        assert_eq!(muxer.state(), MuxerState::Started);

        let calls = log.lock().clone();
        assert_eq!(calls[0], MuxerCall::AddTrack(mock_format(TrackKind::Video)));
        assert_eq!(calls[1], MuxerCall::AddTrack(mock_format(TrackKind::Audio)));
        assert_eq!(calls[2], MuxerCall::Start);
        assert_eq!(written(&log), vec![(1, 0), (1, 20)]);
    }

    #[test]
    fn test_flush_precedes_new_samples() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut muxer = muxer(&log, &probe);

        muxer.write_sample(TrackKind::Video, sample(0)).unwrap();
        muxer.write_sample(TrackKind::Audio, sample(10)).unwrap();
        muxer.write_sample(TrackKind::Video, sample(33)).unwrap();
        muxer
            .register_track_format(TrackKind::Video, mock_format(TrackKind::Video))
            .unwrap();
        assert_eq!(muxer.buffered_samples(), 3);
        assert_eq!(muxer.written_samples(TrackKind::Video), 0);

        muxer
            .register_track_format(TrackKind::Audio, mock_format(TrackKind::Audio))
            .unwrap();
        assert_eq!(muxer.written_samples(TrackKind::Video), 2);
        assert_eq!(muxer.written_samples(TrackKind::Audio), 1);

        muxer.write_sample(TrackKind::Audio, sample(20)).unwrap();
        assert_eq!(written(&log), vec![(0, 0), (1, 10), (0, 33), (1, 20)]);
        assert_eq!(muxer.buffered_samples(), 0);
        assert_eq!(muxer.written_samples(TrackKind::Audio), 2);
    }

    #[test]
    fn test_timestamp_regression_rejected() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut muxer = muxer(&log, &probe);

        muxer.write_sample(TrackKind::Video, sample(100)).unwrap();
        let error = muxer.write_sample(TrackKind::Video, sample(50)).unwrap_err();
        assert!(matches!(
            error,
            MuxerError::TimestampRegression {
                previous_us: 100,
                pts_us: 50,
                ..
            }
        ));
        // Equal timestamps are allowed
        muxer.write_sample(TrackKind::Video, sample(100)).unwrap();
    }

    #[test]
    fn test_duplicate_format_and_unknown_track() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let sink = MockMuxer::new(log.clone(), probe.clone());
        let mut muxer = InterleavingMuxer::new(Box::new(sink), &[TrackKind::Video]);

        assert!(matches!(
            muxer.write_sample(TrackKind::Audio, sample(0)),
            Err(MuxerError::UnknownTrack { .. })
        ));
        muxer
            .register_track_format(TrackKind::Video, mock_format(TrackKind::Video))
            .unwrap();
        assert!(matches!(
            muxer.register_track_format(TrackKind::Video, mock_format(TrackKind::Video)),
            Err(MuxerError::DuplicateFormat { .. })
        ));
    }

    #[test]
    fn test_finish_guards() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut muxer = muxer(&log, &probe);

        assert!(matches!(muxer.finish(), Err(MuxerError::NotStarted)));

        muxer
            .register_track_format(TrackKind::Video, mock_format(TrackKind::Video))
            .unwrap();
        muxer
            .register_track_format(TrackKind::Audio, mock_format(TrackKind::Audio))
            .unwrap();
        muxer.write_sample(TrackKind::Video, Sample::end_of_stream(0)).unwrap();
        assert!(matches!(
            muxer.finish(),
            Err(MuxerError::TrackNotEnded {
                kind: TrackKind::Audio
            })
        ));

        muxer.write_sample(TrackKind::Audio, Sample::end_of_stream(0)).unwrap();
        muxer.finish().unwrap();
        assert_eq!(muxer.state(), MuxerState::Finished);
        assert_eq!(log.lock().last(), Some(&MuxerCall::Stop));

        assert!(matches!(muxer.finish(), Err(MuxerError::AlreadyFinished)));
        assert!(matches!(
            muxer.write_sample(TrackKind::Audio, sample(5)),
            Err(MuxerError::AlreadyFinished)
        ));
    }

    #[test]
    fn test_samples_after_end_of_stream_rejected() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut muxer = muxer(&log, &probe);

        muxer.write_sample(TrackKind::Audio, Sample::end_of_stream(0)).unwrap();
        assert!(matches!(
            muxer.write_sample(TrackKind::Audio, sample(10)),
            Err(MuxerError::TrackEnded { .. })
        ));
    }

    #[test]
    fn test_release_once() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut muxer = muxer(&log, &probe);
        assert_eq!(probe.live(), 1);

        muxer.release();
        muxer.release();
        assert_eq!(probe.live(), 0);
        drop(muxer);
        assert_eq!(probe.live(), 0);
    }

    fn deltas() -> impl Strategy<Value = Vec<(bool, i64)>> {
        prop::collection::vec((any::<bool>(), 0i64..50), 0..60)
    }

    proptest! {
        #[test]
        fn per_track_order_survives_any_registration_point(
            writes in deltas(),
            video_at in 0usize..60,
            audio_at in 0usize..60,
        ) {
            let log = MuxerLog::default();
            let probe = ResourceProbe::default();
            let mut muxer = muxer(&log, &probe);
            let mut clocks = [0i64, 0i64];

            for (step, (is_video, delta)) in writes.iter().enumerate() {
                if step == video_at {
                    muxer.register_track_format(TrackKind::Video, mock_format(TrackKind::Video)).unwrap();
                }
                if step == audio_at {
                    muxer.register_track_format(TrackKind::Audio, mock_format(TrackKind::Audio)).unwrap();
                }
                let (kind, lane) = if *is_video { (TrackKind::Video, 0) } else { (TrackKind::Audio, 1) };
                clocks[lane] += delta;
                muxer.write_sample(kind, sample(clocks[lane])).unwrap();

                if muxer.state() == MuxerState::Unstarted {
                    prop_assert!(log.lock().is_empty());
                }
            }

            let mut last = [i64::MIN, i64::MIN];
            for (track, pts) in written(&log) {
                prop_assert!(pts >= last[track]);
                last[track] = pts;
            }
            if muxer.state() == MuxerState::Started {
                prop_assert_eq!(written(&log).len(), writes.len());
            }
        }
    }
}
