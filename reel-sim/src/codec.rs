//! Simulated decoders and encoders.
//!
//! A [`SimCodec`] owns a bounded pool of input buffers and holds submitted
//! frames in a pipeline of fixed depth before they surface as output, so the
//! engine sees the same backpressure and latency it would from hardware.
//! An input buffer stays busy until its frame leaves the pipeline.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reel_core::media::{BufferInfo, MediaParams, SampleFlags, TrackFormat};
use reel_core::service::{BufferIndex, Codec, CodecError, OutputStatus};

use crate::payload::{self, PayloadHeader, TAG_PCM, TAG_YUV};
use crate::probe::HandleGuard;

const DEFAULT_VIDEO_BITRATE: u32 = 1_000_000;
const DEFAULT_AUDIO_BITRATE: u32 = 128_000;
const AAC_FRAME_SAMPLES: u64 = 1024;
const MIN_CODED_BODY: usize = 16;

/// Buffer pool sizes and pipeline depth of simulated codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCodecConfig {
    pub input_slots: usize,
    pub output_slots: usize,
    /// Frames held back before the first output appears
    pub latency: usize,
}

impl Default for SimCodecConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 2,
            latency: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    Decoder,
    Encoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Configured,
    Running,
    Stopped,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Acquired,
    InPipeline,
}

struct PendingFrame {
    slot: BufferIndex,
    data: Bytes,
    pts_us: i64,
}

pub struct SimCodec {
    role: CodecRole,
    input_format: TrackFormat,
    output_format: TrackFormat,
    config: SimCodecConfig,
    slots: Vec<(SlotState, BytesMut)>,
    pipeline: VecDeque<PendingFrame>,
    retrieved: HashMap<BufferIndex, Bytes>,
    next_output: BufferIndex,
    frames_out: u64,
    lifecycle: Lifecycle,
    announced: bool,
    config_emitted: bool,
    eos_queued: bool,
    eos_emitted: bool,
    last_pts_us: i64,
    inputs_accepted: usize,
    fail_after_inputs: Option<usize>,
    guard: HandleGuard,
}

impl SimCodec {
    pub fn new(
        role: CodecRole,
        input_format: TrackFormat,
        output_format: TrackFormat,
        config: SimCodecConfig,
        guard: HandleGuard,
    ) -> Self {
        let input_slots = config.input_slots.max(1);
        let config = SimCodecConfig {
            input_slots,
            output_slots: config.output_slots.max(1),
            latency: config.latency.min(input_slots - 1),
        };
        Self {
            role,
            input_format,
            output_format,
            config,
            slots: (0..input_slots)
                .map(|_| (SlotState::Free, BytesMut::new()))
                .collect(),
            pipeline: VecDeque::new(),
            retrieved: HashMap::new(),
            next_output: 0,
            frames_out: 0,
            lifecycle: Lifecycle::Configured,
            announced: false,
            config_emitted: false,
            eos_queued: false,
            eos_emitted: false,
            last_pts_us: 0,
            inputs_accepted: 0,
            fail_after_inputs: None,
            guard,
        }
    }

    /// Fails every input submitted after the first `inputs`.
    pub fn failing_after(mut self, inputs: usize) -> Self {
        self.fail_after_inputs = Some(inputs);
        self
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    fn name(&self) -> String {
        let role = match self.role {
            CodecRole::Decoder => "decoder",
            CodecRole::Encoder => "encoder",
        };
        format!("{} {role}", self.input_format.mime)
    }

    fn require_running(&self) -> Result<(), CodecError> {
        if self.lifecycle == Lifecycle::Running {
            Ok(())
        } else {
            Err(CodecError::IllegalState {
                reason: format!("{} is {:?}", self.name(), self.lifecycle),
            })
        }
    }

    fn acquired_slot(&mut self, index: BufferIndex) -> Result<&mut BytesMut, CodecError> {
        match self.slots.get_mut(index) {
            Some((SlotState::Acquired, buf)) => Ok(buf),
            _ => Err(CodecError::InvalidBuffer { index }),
        }
    }

    fn emit(&mut self, data: Bytes, info: BufferInfo) -> OutputStatus {
        let index = self.next_output;
        self.next_output += 1;
        self.retrieved.insert(index, data);
        OutputStatus::Buffer { index, info }
    }

    fn transform(&mut self, frame: &PendingFrame) -> Result<(Bytes, SampleFlags), CodecError> {
        let header = PayloadHeader::parse(&frame.data);
        let expected = match self.role {
            CodecRole::Decoder => payload::tag_for_mime(&self.input_format.mime),
            CodecRole::Encoder => match self.output_format.params {
                MediaParams::Video(_) => TAG_YUV,
                MediaParams::Audio(_) => TAG_PCM,
            },
        };
        if header.map(|h| h.tag) != Some(expected) {
            return Err(CodecError::Failed {
                reason: format!("{} got a corrupt sample at {}us", self.name(), frame.pts_us),
            });
        }

        let out_header = PayloadHeader::for_format(&self.output_format);
        let produced = self.frames_out;
        self.frames_out += 1;

        let (body_len, flags) = match self.role {
            CodecRole::Decoder => (8, SampleFlags::NONE),
            CodecRole::Encoder => (
                coded_body_len(&self.output_format),
                encoder_flags(&self.output_format, produced),
            ),
        };
        let pts = frame.pts_us;
        let data = payload::build(out_header, body_len, |body| {
            let stamp = pts.to_be_bytes();
            for (i, byte) in body.iter_mut().enumerate() {
                *byte = stamp[i % stamp.len()];
            }
        });
        Ok((data.freeze(), flags))
    }
}

/// Payload bytes after the header, so whole frames match the format's bitrate.
fn coded_body_len(format: &TrackFormat) -> usize {
    let len = match &format.params {
        MediaParams::Video(video) => {
            let bitrate = u64::from(video.bitrate.unwrap_or(DEFAULT_VIDEO_BITRATE));
            bitrate / 8 / u64::from(video.frame_rate.max(1))
        }
        MediaParams::Audio(audio) => {
            let bitrate = u64::from(audio.bitrate.unwrap_or(DEFAULT_AUDIO_BITRATE));
            bitrate / 8 * AAC_FRAME_SAMPLES / u64::from(audio.sample_rate.max(1))
        }
    };
    (len as usize)
        .saturating_sub(payload::HEADER_LEN)
        .max(MIN_CODED_BODY)
}

fn encoder_flags(format: &TrackFormat, frame: u64) -> SampleFlags {
    match &format.params {
        MediaParams::Video(video) => {
            let interval =
                u64::from(video.key_frame_interval.unwrap_or(1)) * u64::from(video.frame_rate);
            if interval == 0 || frame % interval == 0 {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            }
        }
        MediaParams::Audio(_) => SampleFlags::KEY_FRAME,
    }
}

impl Codec for SimCodec {
    fn start(&mut self) -> Result<(), CodecError> {
        if self.lifecycle != Lifecycle::Configured {
            return Err(CodecError::IllegalState {
                reason: format!("{} cannot start from {:?}", self.name(), self.lifecycle),
            });
        }
        self.lifecycle = Lifecycle::Running;
        tracing::trace!("{} started", self.name());
        Ok(())
    }

    fn output_format(&self) -> Option<TrackFormat> {
        match self.role {
            CodecRole::Encoder => Some(self.output_format.clone()),
            CodecRole::Decoder => self.announced.then(|| self.output_format.clone()),
        }
    }

    fn dequeue_input_buffer(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<BufferIndex>, CodecError> {
        self.require_running()?;
        if self.eos_queued {
            return Ok(None);
        }
        let free = self
            .slots
            .iter()
            .position(|(state, _)| *state == SlotState::Free);
        if let Some(index) = free {
            let (state, buf) = &mut self.slots[index];
            *state = SlotState::Acquired;
            buf.clear();
        }
        Ok(free)
    }

    fn input_buffer(&mut self, index: BufferIndex) -> Result<&mut BytesMut, CodecError> {
        self.acquired_slot(index)
    }

    fn queue_input_buffer(
        &mut self,
        index: BufferIndex,
        info: BufferInfo,
    ) -> Result<(), CodecError> {
        self.require_running()?;
        self.acquired_slot(index)?;

        if info.flags.is_end_of_stream() {
            self.slots[index] = (SlotState::Free, BytesMut::new());
            self.eos_queued = true;
            tracing::trace!("{} received end of stream", self.name());
            return Ok(());
        }

        if let Some(limit) = self.fail_after_inputs
            && self.inputs_accepted >= limit
        {
            return Err(CodecError::Failed {
                reason: format!("{} failed after {limit} inputs", self.name()),
            });
        }

        let buf = self.acquired_slot(index)?;
        let len = info.size.min(buf.len());
        let data = buf.split_to(len).freeze();
        buf.clear();
        self.slots[index].0 = SlotState::InPipeline;
        self.pipeline.push_back(PendingFrame {
            slot: index,
            data,
            pts_us: info.pts_us,
        });
        self.last_pts_us = self.last_pts_us.max(info.pts_us);
        self.inputs_accepted += 1;
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputStatus, CodecError> {
        self.require_running()?;
        if self.retrieved.len() >= self.config.output_slots {
            return Ok(OutputStatus::TryAgainLater);
        }

        if !self.announced && (!self.pipeline.is_empty() || self.eos_queued) {
            self.announced = true;
            return Ok(OutputStatus::FormatChanged(self.output_format.clone()));
        }

        if self.role == CodecRole::Encoder && self.announced && !self.config_emitted {
            self.config_emitted = true;
            let config = payload::build(PayloadHeader::for_format(&self.output_format), 0, |_| {});
            let info = BufferInfo {
                size: config.len(),
                pts_us: 0,
                flags: SampleFlags::CODEC_CONFIG,
            };
            return Ok(self.emit(config.freeze(), info));
        }

        let ready = self.pipeline.len() > self.config.latency
            || (self.eos_queued && !self.pipeline.is_empty());
        if ready && let Some(frame) = self.pipeline.pop_front() {
            self.slots[frame.slot].0 = SlotState::Free;
            let (data, flags) = self.transform(&frame)?;
            let info = BufferInfo {
                size: data.len(),
                pts_us: frame.pts_us,
                flags,
            };
            return Ok(self.emit(data, info));
        }

        if self.eos_queued && self.pipeline.is_empty() && !self.eos_emitted {
            self.eos_emitted = true;
            tracing::trace!("{} drained", self.name());
            return Ok(self.emit(Bytes::new(), BufferInfo::end_of_stream(self.last_pts_us)));
        }

        Ok(OutputStatus::TryAgainLater)
    }

    fn output_buffer(&self, index: BufferIndex) -> Result<Bytes, CodecError> {
        self.retrieved
            .get(&index)
            .cloned()
            .ok_or(CodecError::InvalidBuffer { index })
    }

    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<(), CodecError> {
        self.retrieved
            .remove(&index)
            .map(|_| ())
            .ok_or(CodecError::InvalidBuffer { index })
    }

    fn stop(&mut self) {
        if self.lifecycle == Lifecycle::Running {
            self.lifecycle = Lifecycle::Stopped;
        }
    }

    fn release(&mut self) {
        if self.guard.release() {
            self.lifecycle = Lifecycle::Released;
            self.pipeline.clear();
            self.retrieved.clear();
            tracing::trace!("{} released", self.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use reel_core::media::{MIME_VIDEO_AVC, MIME_VIDEO_RAW, VideoParams};

    use super::*;
    use crate::probe::{HandleKind, HandleProbe};

    fn video(mime: &str, width: u32, height: u32) -> TrackFormat {
        TrackFormat::video(
            mime,
            VideoParams {
                width,
                height,
                frame_rate: 30,
                bitrate: Some(2_400_000),
                key_frame_interval: Some(1),
                color_format: None,
            },
        )
    }

    fn decoder(probe: &HandleProbe) -> SimCodec {
        SimCodec::new(
            CodecRole::Decoder,
            video(MIME_VIDEO_AVC, 1920, 1080),
            video(MIME_VIDEO_RAW, 1920, 1080),
            SimCodecConfig::default(),
            probe.open(HandleKind::Codec),
        )
    }

    fn coded_frame() -> BytesMut {
        let format = video(MIME_VIDEO_AVC, 1920, 1080);
        payload::build(PayloadHeader::for_format(&format), 32, |body| body.fill(1))
    }

    fn submit(codec: &mut SimCodec, data: &[u8], pts_us: i64) -> bool {
        let Some(index) = codec.dequeue_input_buffer(Duration::ZERO).unwrap() else {
            return false;
        };
        codec.input_buffer(index).unwrap().extend_from_slice(data);
        let info = BufferInfo {
            size: data.len(),
            pts_us,
            flags: SampleFlags::KEY_FRAME,
        };
        codec.queue_input_buffer(index, info).unwrap();
        true
    }

    fn take(codec: &mut SimCodec) -> OutputStatus {
        let status = codec.dequeue_output_buffer(Duration::ZERO).unwrap();
        if let OutputStatus::Buffer { index, .. } = status {
            codec.release_output_buffer(index).unwrap();
        }
        status
    }

    #[test]
    fn test_pipeline_holds_frames_until_latency_exceeded() {
        let probe = HandleProbe::new();
        let mut codec = decoder(&probe);
        codec.start().unwrap();
        let frame = coded_frame();

        assert!(submit(&mut codec, &frame, 0));
        assert!(matches!(take(&mut codec), OutputStatus::FormatChanged(_)));
        assert!(codec.output_format().is_some());
        assert!(submit(&mut codec, &frame, 1));
        assert_eq!(take(&mut codec), OutputStatus::TryAgainLater);

        assert!(submit(&mut codec, &frame, 2));
        let OutputStatus::Buffer { info, .. } = take(&mut codec) else {
            panic!("expected a decoded frame");
        };
        assert_eq!(info.pts_us, 0);
    }

    #[test]
    fn test_input_pool_is_bounded() {
        let probe = HandleProbe::new();
        let mut codec = decoder(&probe);
        codec.start().unwrap();
        let frame = coded_frame();

        for pts in 0..4 {
            assert!(submit(&mut codec, &frame, pts));
        }
        assert!(!submit(&mut codec, &frame, 4));
    }

    #[test]
    fn test_end_of_stream_flushes_pipeline() {
        let probe = HandleProbe::new();
        let mut codec = decoder(&probe);
        codec.start().unwrap();
        submit(&mut codec, &coded_frame(), 40);

        let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        codec
            .queue_input_buffer(index, BufferInfo::end_of_stream(40))
            .unwrap();

        assert!(matches!(take(&mut codec), OutputStatus::FormatChanged(_)));
        let OutputStatus::Buffer { info, .. } = take(&mut codec) else {
            panic!("expected flushed frame");
        };
        assert_eq!(info.pts_us, 40);
        let OutputStatus::Buffer { info, .. } = take(&mut codec) else {
            panic!("expected end of stream");
        };
        assert!(info.flags.is_end_of_stream());
        assert_eq!(take(&mut codec), OutputStatus::TryAgainLater);
        assert_eq!(codec.dequeue_input_buffer(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_encoder_emits_codec_config_and_target_dimensions() {
        let probe = HandleProbe::new();
        let mut encoder = SimCodec::new(
            CodecRole::Encoder,
            video(MIME_VIDEO_RAW, 1920, 1080),
            video(MIME_VIDEO_AVC, 1280, 720),
            SimCodecConfig {
                latency: 0,
                ..SimCodecConfig::default()
            },
            probe.open(HandleKind::Codec),
        );
        encoder.start().unwrap();
        let raw = payload::build(
            PayloadHeader::for_format(&video(MIME_VIDEO_RAW, 1920, 1080)),
            8,
            |_| {},
        );
        submit(&mut encoder, &raw, 0);

        assert!(matches!(take(&mut encoder), OutputStatus::FormatChanged(_)));
        let OutputStatus::Buffer { info, .. } = take(&mut encoder) else {
            panic!("expected codec config");
        };
        assert!(info.flags.is_codec_config());

        let OutputStatus::Buffer { index, info } =
            encoder.dequeue_output_buffer(Duration::ZERO).unwrap()
        else {
            panic!("expected encoded frame");
        };
        assert!(info.flags.is_key_frame());
        let data = encoder.output_buffer(index).unwrap();
        assert_eq!(data.len(), 10_000);
        assert_eq!(PayloadHeader::parse(&data).unwrap().dims, (1280, 720));
    }

    #[test]
    fn test_wrong_payload_fails() {
        let probe = HandleProbe::new();
        let mut codec = decoder(&probe);
        codec.start().unwrap();
        for pts in 0..3 {
            submit(&mut codec, b"garbage-not-a-frame", pts);
        }
        assert!(matches!(take(&mut codec), OutputStatus::FormatChanged(_)));
        assert!(matches!(
            codec.dequeue_output_buffer(Duration::ZERO),
            Err(CodecError::Failed { .. })
        ));
    }

    #[test]
    fn test_failing_after_inputs() {
        let probe = HandleProbe::new();
        let mut codec = decoder(&probe).failing_after(1);
        codec.start().unwrap();
        let frame = coded_frame();
        assert!(submit(&mut codec, &frame, 0));

        let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        codec.input_buffer(index).unwrap().extend_from_slice(&frame);
        let info = BufferInfo {
            size: frame.len(),
            pts_us: 1,
            flags: SampleFlags::NONE,
        };
        assert!(matches!(
            codec.queue_input_buffer(index, info),
            Err(CodecError::Failed { .. })
        ));
    }

    #[test]
    fn test_lifecycle_and_release() {
        let probe = HandleProbe::new();
        let mut codec = decoder(&probe);
        assert!(codec.dequeue_input_buffer(Duration::ZERO).is_err());
        codec.start().unwrap();
        assert!(codec.start().is_err());

        codec.stop();
        codec.release();
        codec.release();
        assert_eq!(probe.live(), 0);
        assert!(codec.dequeue_output_buffer(Duration::ZERO).is_err());
    }
}
