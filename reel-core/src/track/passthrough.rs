//! Copies coded samples of one track unchanged into the output.

use bytes::BytesMut;

use super::{TrackState, TrackTranscoder, TrackWiring, check_output_mime, not_set_up};
use crate::TranscodeError;
use crate::channel::{SampleSource, SourceState, TrackReader};
use crate::media::{Sample, TrackFormat, TrackKind};
use crate::muxer::SharedMuxer;

pub struct PassThroughTrack {
    kind: TrackKind,
    state: TrackState,
    reader: TrackReader,
    muxer: SharedMuxer,
    format: TrackFormat,
    buf: BytesMut,
    written_pts_us: i64,
    samples: u64,
}

impl PassThroughTrack {
    pub fn new(wiring: TrackWiring) -> Self {
        Self {
            kind: wiring.input.kind(),
            state: TrackState::Uninitialized,
            reader: wiring.reader,
            muxer: wiring.muxer,
            format: wiring.input,
            buf: BytesMut::new(),
            written_pts_us: 0,
            samples: 0,
        }
    }
}

impl TrackTranscoder for PassThroughTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn state(&self) -> TrackState {
        self.state
    }

    /// The output format is the input format, so it is registered right away.
    fn setup(&mut self) -> Result<(), TranscodeError> {
        if self.state != TrackState::Uninitialized {
            return Ok(());
        }
        check_output_mime(self.kind, &self.format)?;
        self.muxer
            .lock()
            .register_track_format(self.kind, self.format.clone())?;
        self.state.advance(self.kind, TrackState::Initialized);
        Ok(())
    }

    fn step_pipeline(&mut self) -> Result<bool, TranscodeError> {
        match self.state {
            TrackState::Finished => return Ok(false),
            TrackState::Uninitialized => return Err(not_set_up(self.kind)),
            TrackState::Initialized => self.state.advance(self.kind, TrackState::Running),
            TrackState::Running => {}
        }

        match self.reader.poll_next() {
            SourceState::Pending => Ok(false),
            SourceState::Ready => {
                let info = self.reader.fill(&mut self.buf)?;
                let sample = Sample::new(self.buf.split().freeze(), info.pts_us, info.flags);
                self.written_pts_us = self.written_pts_us.max(sample.pts_us);
                self.samples += 1;
                self.muxer.lock().write_sample(self.kind, sample)?;
                Ok(true)
            }
            SourceState::Exhausted => {
                self.muxer
                    .lock()
                    .write_sample(self.kind, Sample::end_of_stream(self.written_pts_us))?;
                tracing::debug!("{} track copied {} samples", self.kind, self.samples);
                self.state.advance(self.kind, TrackState::Finished);
                Ok(true)
            }
        }
    }

    fn written_pts_us(&self) -> i64 {
        self.written_pts_us
    }

    /// Owns no codecs; the shared demuxer is released by the engine.
    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::media::{MIME_AUDIO_RAW, SampleFlags};
    use crate::muxer::{InterleavingMuxer, MuxerState};
    use crate::service::{Demuxer, SharedDemuxer};
    use crate::test_mocks::{MockDemuxer, MockMuxer, MuxerCall, MuxerLog, ResourceProbe, mock_format};

    fn audio_samples() -> Vec<(usize, Sample)> {
        (0..5)
            .map(|i| {
                let data = Bytes::from(vec![i as u8; 16]);
                (0, Sample::new(data, i * 23_000, SampleFlags::KEY_FRAME))
            })
            .collect()
    }

    fn wiring(format: TrackFormat, log: &MuxerLog, probe: &ResourceProbe) -> TrackWiring {
        let mut demuxer = MockDemuxer::new(vec![format.clone()], audio_samples(), probe.clone());
        demuxer.select_track(0).unwrap();
        let demuxer: SharedDemuxer = Arc::new(Mutex::new(Box::new(demuxer)));
        let sink = MockMuxer::new(log.clone(), probe.clone());
        TrackWiring {
            reader: TrackReader::new(demuxer, 0),
            muxer: InterleavingMuxer::new(Box::new(sink), &[TrackKind::Audio]).into_shared(),
            input: format,
            dequeue_timeout: Duration::ZERO,
        }
    }

    #[test]
    fn test_copies_every_sample_byte_for_byte() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let wiring = wiring(mock_format(TrackKind::Audio), &log, &probe);
        let muxer = wiring.muxer.clone();
        let mut track = PassThroughTrack::new(wiring);

        track.setup().unwrap();
        assert_eq!(track.state(), TrackState::Initialized);
        assert_eq!(muxer.lock().state(), MuxerState::Started);

        while track.step_pipeline().unwrap() {}
        assert!(track.is_finished());
        assert!(!track.step_pipeline().unwrap());
        assert_eq!(track.written_pts_us(), 4 * 23_000);

        let written: Vec<Sample> = log
            .lock()
            .iter()
            .filter_map(|call| match call {
                MuxerCall::Write { sample, .. } => Some(sample.clone()),
                _ => None,
            })
            .collect();
        let expected: Vec<Sample> = audio_samples().into_iter().map(|(_, s)| s).collect();
        assert_eq!(written, expected);

        muxer.lock().finish().unwrap();
    }

    #[test]
    fn test_rejects_non_aac_audio() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut format = mock_format(TrackKind::Audio);
        format.mime = MIME_AUDIO_RAW.to_string();
        let mut track = PassThroughTrack::new(wiring(format, &log, &probe));

        assert!(matches!(
            track.setup(),
            Err(TranscodeError::InvalidOutputFormat { .. })
        ));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_step_before_setup_fails() {
        let log = MuxerLog::default();
        let probe = ResourceProbe::default();
        let mut track = PassThroughTrack::new(wiring(mock_format(TrackKind::Audio), &log, &probe));
        assert!(track.step_pipeline().is_err());
    }
}
