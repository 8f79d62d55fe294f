//! Synthetic input generation.
//!
//! Produces finalized reel containers with an AVC video track and an AAC
//! audio track whose payloads are seeded noise sized to the requested
//! bitrates. Same spec and seed, same bytes.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use reel_core::media::{
    AacProfile, AudioParams, MIME_AUDIO_AAC, MIME_VIDEO_AVC, Sample, SampleFlags, TrackFormat,
    VideoParams,
};

use crate::container::{ContainerError, ContainerWriter};
use crate::payload::{self, PayloadHeader};
use crate::rng::DeterministicRng;

const AAC_FRAME_SAMPLES: i64 = 1024;
const KEY_FRAME_SCALE: usize = 3;
const SIZE_SPREAD: f64 = 0.2;

/// What to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthSpec {
    pub duration: Duration,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
    pub seed: u64,
}

impl SynthSpec {
    /// 1920x1080 30 fps AVC at 2 Mbps plus 44.1 kHz stereo AAC.
    pub fn hd1080(duration: Duration) -> Self {
        Self {
            duration,
            video: Some(VideoParams {
                width: 1920,
                height: 1080,
                frame_rate: 30,
                bitrate: Some(2_000_000),
                key_frame_interval: Some(1),
                color_format: None,
            }),
            audio: Some(AudioParams {
                sample_rate: 44_100,
                channel_count: 2,
                bitrate: Some(128_000),
                profile: Some(AacProfile::Lc),
            }),
            seed: 0x5EED,
        }
    }

    /// Replaces the video frame size, keeping rate and bitrate.
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        if let Some(video) = &mut self.video {
            video.width = width;
            video.height = height;
        }
        self
    }

    pub fn with_video(mut self, video: Option<VideoParams>) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: Option<AudioParams>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn duration_us(&self) -> i64 {
        i64::try_from(self.duration.as_micros()).unwrap_or(i64::MAX)
    }

    /// Track formats in container order: video first, then audio.
    pub fn track_formats(&self) -> Vec<TrackFormat> {
        let video = self.video.clone().map(|video| {
            let last = video_pts((self.video_frames(&video) - 1).max(0), &video);
            TrackFormat::video(MIME_VIDEO_AVC, video).with_duration(Some(last))
        });
        let audio = self.audio.clone().map(|audio| {
            let last = audio_pts((self.audio_frames(&audio) - 1).max(0), &audio);
            TrackFormat::audio(MIME_AUDIO_AAC, audio).with_duration(Some(last))
        });
        video.into_iter().chain(audio).collect()
    }

    fn video_frames(&self, video: &VideoParams) -> i64 {
        self.duration_us() * i64::from(video.frame_rate) / 1_000_000
    }

    fn audio_frames(&self, audio: &AudioParams) -> i64 {
        self.duration_us() * i64::from(audio.sample_rate) / (AAC_FRAME_SAMPLES * 1_000_000)
    }
}

fn video_pts(frame: i64, video: &VideoParams) -> i64 {
    frame * 1_000_000 / i64::from(video.frame_rate.max(1))
}

fn audio_pts(frame: i64, audio: &AudioParams) -> i64 {
    frame * AAC_FRAME_SAMPLES * 1_000_000 / i64::from(audio.sample_rate.max(1))
}

/// Counts of what [`write_synthetic`] produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthSummary {
    pub video_samples: usize,
    pub audio_samples: usize,
    pub duration_us: i64,
}

/// Generates every sample of `spec` as `(track, sample)`, interleaved by
/// timestamp with video first on ties.
pub fn synthesize(spec: &SynthSpec) -> Vec<(usize, Sample)> {
    let mut rng = DeterministicRng::from_seed(spec.seed);
    let mut samples = Vec::new();
    let mut track = 0;

    if let Some(video) = &spec.video {
        let format = TrackFormat::video(MIME_VIDEO_AVC, video.clone());
        let header = PayloadHeader::for_format(&format);
        let base = (video.bitrate.unwrap_or(1_000_000) / 8 / video.frame_rate.max(1)) as usize;
        let gop = i64::from(video.key_frame_interval.unwrap_or(1).max(1))
            * i64::from(video.frame_rate.max(1));

        for frame in 0..spec.video_frames(video) {
            let key = frame % gop == 0;
            let size = rng.jitter(if key { base * KEY_FRAME_SCALE } else { base }, SIZE_SPREAD);
            let data = payload::build(header, size, |body| rng.fill_bytes(body));
            let flags = if key {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            };
            samples.push((track, Sample::new(data.freeze(), video_pts(frame, video), flags)));
        }
        track += 1;
    }

    if let Some(audio) = &spec.audio {
        let format = TrackFormat::audio(MIME_AUDIO_AAC, audio.clone());
        let header = PayloadHeader::for_format(&format);
        let base = (i64::from(audio.bitrate.unwrap_or(128_000)) / 8 * AAC_FRAME_SAMPLES
            / i64::from(audio.sample_rate.max(1))) as usize;

        for frame in 0..spec.audio_frames(audio) {
            let size = rng.jitter(base, SIZE_SPREAD / 2.0);
            let data = payload::build(header, size, |body| rng.fill_bytes(body));
            samples.push((
                track,
                Sample::new(data.freeze(), audio_pts(frame, audio), SampleFlags::KEY_FRAME),
            ));
        }
    }

    samples.sort_by_key(|(track, sample)| (sample.pts_us, *track));
    samples
}

/// Writes a finalized synthetic container to `path`.
///
/// # Errors
///
/// - `ContainerError::Io` - Output could not be written
/// - `ContainerError::Json` - Track formats could not be serialized
pub fn write_synthetic(path: &Path, spec: &SynthSpec) -> Result<SynthSummary, ContainerError> {
    let formats = spec.track_formats();
    let out = BufWriter::new(File::create(path)?);
    let mut writer = ContainerWriter::new(out, &formats)?;

    let mut summary = SynthSummary::default();
    let has_video = spec.video.is_some();
    for (track, sample) in synthesize(spec) {
        writer.write_sample(track, &sample)?;
        if has_video && track == 0 {
            summary.video_samples += 1;
        } else {
            summary.audio_samples += 1;
        }
    }
    let (_, trailer) = writer.finish()?;
    summary.duration_us = trailer.duration_us;

    tracing::debug!(
        "Synthesized {} ({} video, {} audio samples)",
        path.display(),
        summary.video_samples,
        summary.audio_samples
    );
    Ok(summary)
}

/// Raw bytes of a synthetic container, for tests that never touch disk.
///
/// # Errors
///
/// - `ContainerError::Json` - Track formats could not be serialized
pub fn synthetic_bytes(spec: &SynthSpec) -> Result<Bytes, ContainerError> {
    let mut writer = ContainerWriter::new(Vec::new(), &spec.track_formats())?;
    for (track, sample) in synthesize(spec) {
        writer.write_sample(track, &sample)?;
    }
    let (bytes, _) = writer.finish()?;
    Ok(Bytes::from(bytes))
}
