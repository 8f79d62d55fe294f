//! Non-blocking sample relay into and out of a codec.
//!
//! A [`SampleChannel`] hides the acquire / fill / submit / retrieve cycle of a
//! queue-based codec behind two polling operations. Neither operation blocks
//! beyond the codec's dequeue timeout; `Starved`, `Pending` and `NotReady`
//! only tell the caller to come back later.

use std::time::Duration;

use bytes::BytesMut;

use crate::media::{BufferInfo, Sample, TrackFormat};
use crate::service::{Codec, CodecError, OutputStatus, SharedDemuxer};

/// Outcome of moving one sample from a source into the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpIn {
    /// One sample was submitted
    Fed,
    /// The codec has no free input buffer right now
    Starved,
    /// The source has nothing for this channel right now
    Pending,
    /// The source is exhausted and end-of-stream was forwarded
    SourceEos,
}

/// Outcome of retrieving one processed sample from the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum PumpOut {
    Produced(Sample),
    /// The codec announced the format of everything it emits from now on
    FormatChanged(TrackFormat),
    NotReady,
    /// The codec emitted its end-of-stream marker
    SinkEos,
}

/// Readiness of a [`SampleSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Ready,
    Pending,
    Exhausted,
}

/// Upstream end of a channel.
pub trait SampleSource {
    fn poll_next(&mut self) -> SourceState;

    /// Appends the next sample's payload to `buf`. Only called after
    /// `poll_next` returned `Ready`.
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - No sample is ready
    fn fill(&mut self, buf: &mut BytesMut) -> Result<BufferInfo, CodecError>;
}

/// Reads one demuxer track out of the shared demuxer cursor.
pub struct TrackReader {
    demuxer: SharedDemuxer,
    track: usize,
}

impl TrackReader {
    pub fn new(demuxer: SharedDemuxer, track: usize) -> Self {
        Self { demuxer, track }
    }

    pub fn track(&self) -> usize {
        self.track
    }
}

impl SampleSource for TrackReader {
    fn poll_next(&mut self) -> SourceState {
        match self.demuxer.lock().peek_sample() {
            None => SourceState::Exhausted,
            Some(header) if header.track == self.track => SourceState::Ready,
            Some(_) => SourceState::Pending,
        }
    }

    fn fill(&mut self, buf: &mut BytesMut) -> Result<BufferInfo, CodecError> {
        let header = self.demuxer.lock().read_sample(buf)?;
        if header.track != self.track {
            return Err(CodecError::IllegalState {
                reason: format!(
                    "read sample of track {} while relaying track {}",
                    header.track, self.track
                ),
            });
        }
        Ok(header.info)
    }
}

/// Single-frame hand-off slot between a decoder and an encoder.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Option<Sample>,
    upstream_done: bool,
}

impl FrameSlot {
    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }

    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Slot still holds a frame
    pub fn put(&mut self, frame: Sample) -> Result<(), CodecError> {
        if self.frame.is_some() {
            return Err(CodecError::IllegalState {
                reason: "frame slot already occupied".to_string(),
            });
        }
        self.frame = Some(frame);
        Ok(())
    }

    /// Marks the upstream decoder as drained.
    pub fn close(&mut self) {
        self.upstream_done = true;
    }
}

impl SampleSource for FrameSlot {
    fn poll_next(&mut self) -> SourceState {
        match (&self.frame, self.upstream_done) {
            (Some(_), _) => SourceState::Ready,
            (None, true) => SourceState::Exhausted,
            (None, false) => SourceState::Pending,
        }
    }

    fn fill(&mut self, buf: &mut BytesMut) -> Result<BufferInfo, CodecError> {
        let frame = self.frame.take().ok_or_else(|| CodecError::IllegalState {
            reason: "frame slot is empty".to_string(),
        })?;
        buf.extend_from_slice(&frame.data);
        Ok(frame.info())
    }
}

/// Polling wrapper around one codec.
pub struct SampleChannel {
    codec: Box<dyn Codec>,
    timeout: Duration,
    input_done: bool,
    output_done: bool,
    last_input_pts: i64,
}

impl SampleChannel {
    pub fn new(codec: Box<dyn Codec>, timeout: Duration) -> Self {
        Self {
            codec,
            timeout,
            input_done: false,
            output_done: false,
            last_input_pts: 0,
        }
    }

    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Codec already started
    pub fn start(&mut self) -> Result<(), CodecError> {
        self.codec.start()
    }

    pub fn output_format(&self) -> Option<TrackFormat> {
        self.codec.output_format()
    }

    /// True once end-of-stream has been forwarded into the codec.
    pub fn is_input_done(&self) -> bool {
        self.input_done
    }

    /// True once the codec's end-of-stream output has been seen.
    pub fn is_output_done(&self) -> bool {
        self.output_done
    }

    /// Moves at most one sample from `source` into the codec.
    ///
    /// # Errors
    ///
    /// Propagates codec and source failures; they are never retried.
    pub fn pump_in(&mut self, source: &mut dyn SampleSource) -> Result<PumpIn, CodecError> {
        if self.input_done {
            return Ok(PumpIn::SourceEos);
        }

        let state = source.poll_next();
        if state == SourceState::Pending {
            return Ok(PumpIn::Pending);
        }

        let Some(index) = self.codec.dequeue_input_buffer(self.timeout)? else {
            return Ok(PumpIn::Starved);
        };
        let buf = self.codec.input_buffer(index)?;
        buf.clear();

        if state == SourceState::Exhausted {
            self.codec
                .queue_input_buffer(index, BufferInfo::end_of_stream(self.last_input_pts))?;
            self.input_done = true;
            return Ok(PumpIn::SourceEos);
        }

        let info = source.fill(buf)?;
        self.last_input_pts = self.last_input_pts.max(info.pts_us);
        self.codec.queue_input_buffer(index, info)?;
        Ok(PumpIn::Fed)
    }

    /// Retrieves at most one processed sample from the codec.
    ///
    /// Codec-config buffers are consumed here; their content reaches the
    /// muxer through the announced output format.
    ///
    /// # Errors
    ///
    /// Propagates codec failures; they are never retried.
    pub fn pump_out(&mut self) -> Result<PumpOut, CodecError> {
        if self.output_done {
            return Ok(PumpOut::SinkEos);
        }

        match self.codec.dequeue_output_buffer(self.timeout)? {
            OutputStatus::TryAgainLater => Ok(PumpOut::NotReady),
            OutputStatus::FormatChanged(format) => Ok(PumpOut::FormatChanged(format)),
            OutputStatus::Buffer { index, info } => {
                if info.flags.is_end_of_stream() {
                    self.codec.release_output_buffer(index)?;
                    self.output_done = true;
                    return Ok(PumpOut::SinkEos);
                }
                if info.flags.is_codec_config() {
                    self.codec.release_output_buffer(index)?;
                    return Ok(PumpOut::NotReady);
                }

                let data = self.codec.output_buffer(index)?;
                self.codec.release_output_buffer(index)?;
                let data = data.slice(..info.size.min(data.len()));
                Ok(PumpOut::Produced(Sample::new(data, info.pts_us, info.flags)))
            }
        }
    }

    /// Stops and releases the codec.
    pub fn release(&mut self) {
        self.codec.stop();
        self.codec.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::media::{SampleFlags, TrackKind};
    use crate::service::Demuxer;
    use crate::test_mocks::{MockCodec, MockDemuxer, ResourceProbe, mock_format};

    fn sample(pts_us: i64, byte: u8) -> Sample {
        Sample::new(Bytes::from(vec![byte; 8]), pts_us, SampleFlags::NONE)
    }

    fn started_channel(probe: &ResourceProbe, slots: usize) -> SampleChannel {
        let codec = MockCodec::new(mock_format(TrackKind::Video), slots, probe.clone());
        let mut channel = SampleChannel::new(Box::new(codec), Duration::ZERO);
        channel.start().unwrap();
        channel
    }

    #[test]
    fn test_pump_in_reports_starvation_when_buffers_busy() {
        let probe = ResourceProbe::default();
        let mut channel = started_channel(&probe, 1);
        let mut slot = FrameSlot::default();

        slot.put(sample(0, 1)).unwrap();
        assert_eq!(channel.pump_in(&mut slot).unwrap(), PumpIn::Fed);

        slot.put(sample(33_000, 2)).unwrap();
        assert_eq!(channel.pump_in(&mut slot).unwrap(), PumpIn::Starved);
        assert!(!slot.is_empty(), "starved pump must not consume the frame");
    }

    #[test]
    fn test_pending_source_does_not_take_buffer() {
        let probe = ResourceProbe::default();
        let mut channel = started_channel(&probe, 1);
        let mut slot = FrameSlot::default();

        assert_eq!(channel.pump_in(&mut slot).unwrap(), PumpIn::Pending);
        slot.put(sample(0, 1)).unwrap();
        assert_eq!(channel.pump_in(&mut slot).unwrap(), PumpIn::Fed);
    }

    #[test]
    fn test_round_trip_through_identity_codec() {
        let probe = ResourceProbe::default();
        let mut channel = started_channel(&probe, 2);
        let mut slot = FrameSlot::default();

        assert!(matches!(channel.pump_out().unwrap(), PumpOut::FormatChanged(_)));
        assert_eq!(channel.pump_out().unwrap(), PumpOut::NotReady);

        slot.put(sample(10, 7)).unwrap();
        channel.pump_in(&mut slot).unwrap();
        slot.close();
        assert_eq!(channel.pump_in(&mut slot).unwrap(), PumpIn::SourceEos);
        assert!(channel.is_input_done());

        assert_eq!(channel.pump_out().unwrap(), PumpOut::Produced(sample(10, 7)));
        assert_eq!(channel.pump_out().unwrap(), PumpOut::SinkEos);
        assert!(channel.is_output_done());
        assert_eq!(channel.pump_out().unwrap(), PumpOut::SinkEos);
    }

    #[test]
    fn test_track_reader_waits_for_own_samples() {
        let probe = ResourceProbe::default();
        let mut demuxer = MockDemuxer::new(
            vec![mock_format(TrackKind::Video), mock_format(TrackKind::Audio)],
            vec![(1, sample(0, 9)), (0, sample(0, 3))],
            probe.clone(),
        );
        demuxer.select_track(0).unwrap();
        demuxer.select_track(1).unwrap();
        let demuxer: SharedDemuxer = Arc::new(Mutex::new(Box::new(demuxer)));

        let mut video = TrackReader::new(demuxer.clone(), 0);
        let mut audio = TrackReader::new(demuxer, 1);

        assert_eq!(video.poll_next(), SourceState::Pending);
        assert_eq!(audio.poll_next(), SourceState::Ready);

        let mut buf = BytesMut::new();
        audio.fill(&mut buf).unwrap();
        assert_eq!(&buf[..], &[9u8; 8]);

        assert_eq!(video.poll_next(), SourceState::Ready);
        buf.clear();
        video.fill(&mut buf).unwrap();
        assert_eq!(video.poll_next(), SourceState::Exhausted);
        assert_eq!(audio.poll_next(), SourceState::Exhausted);
    }

    #[test]
    fn test_release_returns_codec_handle() {
        let probe = ResourceProbe::default();
        let mut channel = started_channel(&probe, 1);
        assert_eq!(probe.live(), 1);
        channel.release();
        assert_eq!(probe.live(), 0);
    }
}
