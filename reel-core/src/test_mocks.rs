//! Mock media services for testing the engine without a real backend.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::media::{
    AudioParams, BufferInfo, MIME_AUDIO_AAC, MIME_VIDEO_AVC, Sample, TrackFormat, TrackKind,
    VideoParams,
};
use crate::service::{
    BufferIndex, Codec, CodecError, Demuxer, MediaBackend, Muxer, OutputStatus, SampleHeader,
};

/// Counts live service handles; every handle must be released exactly once.
#[derive(Debug, Clone, Default)]
pub struct ResourceProbe(Arc<AtomicUsize>);

impl ResourceProbe {
    pub fn acquire(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// 1920x1080 AVC or 44.1 kHz stereo AAC.
pub fn mock_format(kind: TrackKind) -> TrackFormat {
    match kind {
        TrackKind::Video => TrackFormat::video(
            MIME_VIDEO_AVC,
            VideoParams {
                width: 1920,
                height: 1080,
                frame_rate: 30,
                bitrate: Some(10_000_000),
                key_frame_interval: Some(1),
                color_format: None,
            },
        ),
        TrackKind::Audio => TrackFormat::audio(
            MIME_AUDIO_AAC,
            AudioParams {
                sample_rate: 44_100,
                channel_count: 2,
                bitrate: Some(128_000),
                profile: None,
            },
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Acquired,
    Queued,
}

/// Identity codec: every queued input comes back out unchanged.
pub struct MockCodec {
    format: TrackFormat,
    slots: Vec<(SlotState, BytesMut)>,
    queued: VecDeque<(BufferIndex, Sample)>,
    retrieved: HashMap<BufferIndex, Sample>,
    next_output: BufferIndex,
    started: bool,
    announced: bool,
    released: bool,
    inputs_accepted: usize,
    fail_after_inputs: Option<usize>,
    output_delay: Duration,
    probe: ResourceProbe,
}

impl MockCodec {
    pub fn new(format: TrackFormat, slots: usize, probe: ResourceProbe) -> Self {
        probe.acquire();
        Self {
            format,
            slots: (0..slots.max(1))
                .map(|_| (SlotState::Free, BytesMut::new()))
                .collect(),
            queued: VecDeque::new(),
            retrieved: HashMap::new(),
            next_output: 0,
            started: false,
            announced: false,
            released: false,
            inputs_accepted: 0,
            fail_after_inputs: None,
            output_delay: Duration::ZERO,
            probe,
        }
    }

    /// Fails every input submitted after the first `inputs`.
    pub fn failing_after(mut self, inputs: usize) -> Self {
        self.fail_after_inputs = Some(inputs);
        self
    }

    /// Hands out buffers without first reporting the output format.
    pub fn without_format_announcement(mut self) -> Self {
        self.announced = true;
        self
    }

    /// Sleeps before handing out each output buffer, simulating slow hardware.
    pub fn with_output_delay(mut self, delay: Duration) -> Self {
        self.output_delay = delay;
        self
    }

    fn require_running(&self) -> Result<(), CodecError> {
        if self.started && !self.released {
            Ok(())
        } else {
            Err(CodecError::IllegalState {
                reason: "mock codec not running".to_string(),
            })
        }
    }
}

impl Codec for MockCodec {
    fn start(&mut self) -> Result<(), CodecError> {
        if self.started || self.released {
            return Err(CodecError::IllegalState {
                reason: "mock codec already started".to_string(),
            });
        }
        self.started = true;
        Ok(())
    }

    fn output_format(&self) -> Option<TrackFormat> {
        Some(self.format.clone())
    }

    fn dequeue_input_buffer(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<BufferIndex>, CodecError> {
        self.require_running()?;
        let free = self
            .slots
            .iter()
            .position(|(state, _)| *state == SlotState::Free);
        if let Some(index) = free {
            self.slots[index].0 = SlotState::Acquired;
        }
        Ok(free)
    }

    fn input_buffer(&mut self, index: BufferIndex) -> Result<&mut BytesMut, CodecError> {
        match self.slots.get_mut(index) {
            Some((SlotState::Acquired, buf)) => Ok(buf),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn queue_input_buffer(
        &mut self,
        index: BufferIndex,
        info: BufferInfo,
    ) -> Result<(), CodecError> {
        if let Some(limit) = self.fail_after_inputs
            && self.inputs_accepted >= limit
        {
            return Err(CodecError::Failed {
                reason: "mock codec failure".to_string(),
            });
        }
        let (state, buf) = match self.slots.get_mut(index) {
            Some(slot) if slot.0 == SlotState::Acquired => slot,
            _ => return Err(CodecError::InvalidBuffer { index }),
        };
        *state = SlotState::Queued;
        let data = buf.split().freeze();
        self.queued
            .push_back((index, Sample::new(data, info.pts_us, info.flags)));
        self.inputs_accepted += 1;
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus, CodecError> {
        self.require_running()?;
        if !self.announced {
            self.announced = true;
            return Ok(OutputStatus::FormatChanged(self.format.clone()));
        }
        let Some((input_index, sample)) = self.queued.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        self.slots[input_index].0 = SlotState::Free;
        if !self.output_delay.is_zero() {
            std::thread::sleep(self.output_delay);
        }

        let index = self.next_output;
        self.next_output += 1;
        let info = sample.info();
        self.retrieved.insert(index, sample);
        Ok(OutputStatus::Buffer { index, info })
    }

    fn output_buffer(&self, index: BufferIndex) -> Result<Bytes, CodecError> {
        self.retrieved
            .get(&index)
            .map(|sample| sample.data.clone())
            .ok_or(CodecError::InvalidBuffer { index })
    }

    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<(), CodecError> {
        self.retrieved
            .remove(&index)
            .map(|_| ())
            .ok_or(CodecError::InvalidBuffer { index })
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.probe.release();
        }
    }
}

/// Demuxer over an in-memory list of `(track, sample)` pairs.
#[derive(Clone)]
pub struct MockDemuxer {
    formats: Vec<TrackFormat>,
    samples: Vec<(usize, Sample)>,
    selected: Vec<bool>,
    cursor: usize,
    released: bool,
    probe: ResourceProbe,
}

impl MockDemuxer {
    pub fn new(
        formats: Vec<TrackFormat>,
        samples: Vec<(usize, Sample)>,
        probe: ResourceProbe,
    ) -> Self {
        probe.acquire();
        let selected = vec![false; formats.len()];
        Self {
            formats,
            samples,
            selected,
            cursor: 0,
            released: false,
            probe,
        }
    }

    fn next_selected(&self) -> Option<usize> {
        (self.cursor..self.samples.len()).find(|&i| {
            let track = self.samples[i].0;
            self.selected.get(track).copied().unwrap_or(false)
        })
    }
}

impl Demuxer for MockDemuxer {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, track: usize) -> Result<TrackFormat, CodecError> {
        self.formats
            .get(track)
            .cloned()
            .ok_or_else(|| CodecError::IllegalState {
                reason: format!("no track {track}"),
            })
    }

    fn duration_us(&self) -> Option<i64> {
        self.samples.iter().map(|(_, s)| s.pts_us).max()
    }

    fn select_track(&mut self, track: usize) -> Result<(), CodecError> {
        let slot = self
            .selected
            .get_mut(track)
            .ok_or_else(|| CodecError::IllegalState {
                reason: format!("no track {track}"),
            })?;
        *slot = true;
        Ok(())
    }

    fn peek_sample(&self) -> Option<SampleHeader> {
        self.next_selected().map(|i| {
            let (track, sample) = &self.samples[i];
            SampleHeader {
                track: *track,
                info: sample.info(),
            }
        })
    }

    fn read_sample(&mut self, buf: &mut BytesMut) -> Result<SampleHeader, CodecError> {
        let index = self.next_selected().ok_or_else(|| CodecError::IllegalState {
            reason: "no sample left".to_string(),
        })?;
        let (track, sample) = &self.samples[index];
        buf.extend_from_slice(&sample.data);
        let header = SampleHeader {
            track: *track,
            info: sample.info(),
        };
        self.cursor = index + 1;
        Ok(header)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.probe.release();
        }
    }
}

/// Calls observed by a [`MockMuxer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxerCall {
    AddTrack(TrackFormat),
    Start,
    Write { track: usize, sample: Sample },
    Stop,
}

pub type MuxerLog = Arc<Mutex<Vec<MuxerCall>>>;

/// Container writer that only records what it is asked to do.
pub struct MockMuxer {
    log: MuxerLog,
    tracks: usize,
    started: bool,
    released: bool,
    probe: ResourceProbe,
}

impl MockMuxer {
    pub fn new(log: MuxerLog, probe: ResourceProbe) -> Self {
        probe.acquire();
        Self {
            log,
            tracks: 0,
            started: false,
            released: false,
            probe,
        }
    }
}

impl Muxer for MockMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CodecError> {
        if self.started {
            return Err(CodecError::IllegalState {
                reason: "add_track after start".to_string(),
            });
        }
        self.log.lock().push(MuxerCall::AddTrack(format.clone()));
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if self.tracks == 0 || self.started {
            return Err(CodecError::IllegalState {
                reason: "start without tracks or twice".to_string(),
            });
        }
        self.started = true;
        self.log.lock().push(MuxerCall::Start);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), CodecError> {
        if !self.started {
            return Err(CodecError::IllegalState {
                reason: "write before start".to_string(),
            });
        }
        self.log.lock().push(MuxerCall::Write {
            track,
            sample: sample.clone(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        if !self.started {
            return Err(CodecError::IllegalState {
                reason: "stop before start".to_string(),
            });
        }
        self.log.lock().push(MuxerCall::Stop);
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.probe.release();
        }
    }
}

/// Backend serving one fixed in-memory input through mock services.
pub struct MockBackend {
    pub probe: ResourceProbe,
    pub muxer_log: MuxerLog,
    formats: Vec<TrackFormat>,
    samples: Vec<(usize, Sample)>,
    unavailable: Vec<String>,
    encoder_mime: Option<String>,
    fail_encoder_after: Option<usize>,
    silent_decoders: bool,
    codec_delay: Duration,
    codec_slots: usize,
}

impl MockBackend {
    pub fn new(formats: Vec<TrackFormat>, samples: Vec<(usize, Sample)>) -> Self {
        Self {
            probe: ResourceProbe::default(),
            muxer_log: MuxerLog::default(),
            formats,
            samples,
            unavailable: Vec::new(),
            encoder_mime: None,
            fail_encoder_after: None,
            silent_decoders: false,
            codec_delay: Duration::ZERO,
            codec_slots: 2,
        }
    }

    /// `duration` of video at `video_fps` and 23.2 ms audio frames, interleaved by timestamp.
    pub fn with_synthetic_tracks(duration: Duration, video_fps: u32) -> Self {
        let duration_us = duration.as_micros() as i64;
        let fps = i64::from(video_fps.max(1));
        let audio_frame_us = 23_220;

        let video = (0..duration_us * fps / 1_000_000).map(|i| {
            let pts = i * 1_000_000 / fps;
            let data = Bytes::from(format!("v{pts}").into_bytes());
            (0, Sample::new(data, pts, crate::SampleFlags::KEY_FRAME))
        });
        let audio = (0..duration_us / audio_frame_us).map(|i| {
            let pts = i * audio_frame_us;
            let data = Bytes::from(format!("a{pts}").into_bytes());
            (1, Sample::new(data, pts, crate::SampleFlags::NONE))
        });
        let mut samples: Vec<(usize, Sample)> = video.chain(audio).collect();
        samples.sort_by_key(|(track, sample)| (sample.pts_us, *track));

        Self::new(
            vec![
                mock_format(TrackKind::Video).with_duration(Some(duration_us)),
                mock_format(TrackKind::Audio).with_duration(Some(duration_us)),
            ],
            samples,
        )
    }

    pub fn with_unavailable_codec(mut self, mime: &str) -> Self {
        self.unavailable.push(mime.to_string());
        self
    }

    /// Encoders report `mime` as their output format.
    pub fn with_encoder_mime(mut self, mime: &str) -> Self {
        self.encoder_mime = Some(mime.to_string());
        self
    }

    pub fn with_failing_encoder(mut self, after_inputs: usize) -> Self {
        self.fail_encoder_after = Some(after_inputs);
        self
    }

    /// Decoders never report their output format.
    pub fn with_silent_decoders(mut self) -> Self {
        self.silent_decoders = true;
        self
    }

    /// Every codec sleeps `delay` per output buffer.
    pub fn with_codec_delay(mut self, delay: Duration) -> Self {
        self.codec_delay = delay;
        self
    }

    fn check_available(&self, format: &TrackFormat) -> Result<(), CodecError> {
        if self.unavailable.contains(&format.mime) {
            return Err(CodecError::Unavailable {
                mime: format.mime.clone(),
                reason: "disabled in mock backend".to_string(),
            });
        }
        Ok(())
    }
}

impl MediaBackend for MockBackend {
    fn open_demuxer(&self, _input: File) -> Result<Box<dyn Demuxer>, CodecError> {
        Ok(Box::new(MockDemuxer::new(
            self.formats.clone(),
            self.samples.clone(),
            self.probe.clone(),
        )))
    }

    fn create_decoder(&self, input: &TrackFormat) -> Result<Box<dyn Codec>, CodecError> {
        self.check_available(input)?;
        let codec = MockCodec::new(input.clone(), self.codec_slots, self.probe.clone())
            .with_output_delay(self.codec_delay);
        Ok(if self.silent_decoders {
            Box::new(codec.without_format_announcement())
        } else {
            Box::new(codec)
        })
    }

    fn create_encoder(&self, output: &TrackFormat) -> Result<Box<dyn Codec>, CodecError> {
        self.check_available(output)?;
        let mut format = output.clone();
        if let Some(mime) = &self.encoder_mime {
            format.mime = mime.clone();
        }
        let codec = MockCodec::new(format, self.codec_slots, self.probe.clone())
            .with_output_delay(self.codec_delay);
        Ok(match self.fail_encoder_after {
            Some(after) => Box::new(codec.failing_after(after)),
            None => Box::new(codec),
        })
    }

    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>, CodecError> {
        File::create(output)?;
        Ok(Box::new(MockMuxer::new(
            self.muxer_log.clone(),
            self.probe.clone(),
        )))
    }
}
