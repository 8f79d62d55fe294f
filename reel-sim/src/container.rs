//! Reel container: a minimal streaming file format for simulated media.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! "REEL" version:u8
//! ('H' len:u32 json:TrackFormat)*          one per track, before any sample
//! ('S' track:u8 pts:i64 flags:u32 len:u32 payload)*
//! 'X' len:u32 json:Trailer                 written on finalize, nothing after it
//! ```
//!
//! Files without a trailer were closed without being finalized and are
//! rejected by the demuxer.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use reel_core::media::{Sample, SampleFlags, TrackFormat};
use reel_core::service::CodecError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"REEL";
pub const VERSION: u8 = 1;

const RECORD_TRACK: u8 = b'H';
const RECORD_SAMPLE: u8 = b'S';
const RECORD_TRAILER: u8 = b'X';

/// Fixed part of a sample record after its tag.
const SAMPLE_HEADER_LEN: usize = 1 + 8 + 4 + 4;

/// Errors raised while reading or writing reel containers.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("not a reel container")]
    BadMagic,

    #[error("unsupported container version {version}")]
    UnsupportedVersion { version: u8 },

    #[error("container truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("unknown record tag {tag:#04x} at byte {offset}")]
    UnknownRecord { tag: u8, offset: usize },

    #[error("record {tag:#04x} out of order at byte {offset}")]
    OutOfOrderRecord { tag: u8, offset: usize },

    #[error("sample for unknown track {track} at byte {offset}")]
    UnknownTrack { track: usize, offset: usize },

    #[error("data after trailer at byte {offset}")]
    TrailingData { offset: usize },

    #[error("too many tracks: {count}")]
    TooManyTracks { count: usize },

    #[error("record of {len} bytes exceeds the 32-bit length field")]
    RecordTooLarge { len: usize },

    #[error("invalid metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ContainerError> for CodecError {
    fn from(error: ContainerError) -> Self {
        match error {
            ContainerError::Io(e) => CodecError::Io(e),
            other => CodecError::Malformed {
                reason: other.to_string(),
            },
        }
    }
}

/// Per-track statistics recorded in the trailer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub duration_us: i64,
    pub samples: u64,
}

/// Finalization record closing a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trailer {
    pub duration_us: i64,
    pub tracks: Vec<TrackSummary>,
}

/// One sample record as stored in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSample {
    pub track: usize,
    pub pts_us: i64,
    pub flags: SampleFlags,
    pub data: Bytes,
}

impl ContainerSample {
    pub fn to_sample(&self) -> Sample {
        Sample::new(self.data.clone(), self.pts_us, self.flags)
    }
}

/// Fully parsed container.
#[derive(Debug, Clone, Default)]
pub struct Container {
    pub tracks: Vec<TrackFormat>,
    pub samples: Vec<ContainerSample>,
    pub trailer: Option<Trailer>,
}

impl Container {
    /// Reads and parses a whole container file.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Io` - File could not be read
    /// - Any parse error of [`Container::parse`]
    pub fn read(path: &Path) -> Result<Self, ContainerError> {
        Self::from_reader(File::open(path)?)
    }

    /// # Errors
    ///
    /// - `ContainerError::Io` - Reader failed
    /// - Any parse error of [`Container::parse`]
    pub fn from_reader(mut reader: impl Read) -> Result<Self, ContainerError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::parse(Bytes::from(data))
    }

    /// Parses container bytes. Sample payloads share `data`'s allocation.
    ///
    /// # Errors
    ///
    /// - `ContainerError::BadMagic` - Missing "REEL" signature
    /// - `ContainerError::UnsupportedVersion` - Unknown format version
    /// - `ContainerError::Truncated` - A record runs past the end of input
    /// - `ContainerError::UnknownRecord` / `OutOfOrderRecord` - Corrupt record stream
    /// - `ContainerError::UnknownTrack` - Sample references a missing track
    /// - `ContainerError::TrailingData` - Bytes after the trailer
    /// - `ContainerError::Json` - Track or trailer metadata is not valid
    pub fn parse(mut data: Bytes) -> Result<Self, ContainerError> {
        let total = data.len();
        if data.len() < MAGIC.len() + 1 || &data[..MAGIC.len()] != MAGIC {
            return Err(ContainerError::BadMagic);
        }
        data.advance(MAGIC.len());
        let version = data.get_u8();
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion { version });
        }

        let mut container = Container::default();
        while data.has_remaining() {
            let offset = total - data.remaining();
            if container.trailer.is_some() {
                return Err(ContainerError::TrailingData { offset });
            }

            let tag = data.get_u8();
            match tag {
                RECORD_TRACK => {
                    if !container.samples.is_empty() {
                        return Err(ContainerError::OutOfOrderRecord { tag, offset });
                    }
                    let json = take_block(&mut data, offset)?;
                    container.tracks.push(serde_json::from_slice(&json)?);
                }
                RECORD_SAMPLE => {
                    ensure(&data, SAMPLE_HEADER_LEN, offset)?;
                    let track = usize::from(data.get_u8());
                    let pts_us = data.get_i64();
                    let flags = SampleFlags::from_bits(data.get_u32());
                    let len = data.get_u32() as usize;
                    ensure(&data, len, offset)?;
                    if track >= container.tracks.len() {
                        return Err(ContainerError::UnknownTrack { track, offset });
                    }
                    container.samples.push(ContainerSample {
                        track,
                        pts_us,
                        flags,
                        data: data.split_to(len),
                    });
                }
                RECORD_TRAILER => {
                    let json = take_block(&mut data, offset)?;
                    container.trailer = Some(serde_json::from_slice(&json)?);
                }
                tag => return Err(ContainerError::UnknownRecord { tag, offset }),
            }
        }

        Ok(container)
    }

    pub fn is_finalized(&self) -> bool {
        self.trailer.is_some()
    }

    /// Samples of one track in file order.
    pub fn track_samples(&self, track: usize) -> impl Iterator<Item = &ContainerSample> + '_ {
        self.samples.iter().filter(move |sample| sample.track == track)
    }

    /// Track formats with the trailer's durations filled in.
    pub fn track_formats(&self) -> Vec<TrackFormat> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(index, format)| {
                let duration = self
                    .trailer
                    .as_ref()
                    .and_then(|trailer| trailer.tracks.get(index))
                    .map(|summary| summary.duration_us)
                    .or(format.duration_us);
                format.clone().with_duration(duration)
            })
            .collect()
    }
}

fn ensure(data: &Bytes, len: usize, offset: usize) -> Result<(), ContainerError> {
    if data.remaining() < len {
        return Err(ContainerError::Truncated { offset });
    }
    Ok(())
}

fn take_block(data: &mut Bytes, offset: usize) -> Result<Bytes, ContainerError> {
    ensure(data, 4, offset)?;
    let len = data.get_u32() as usize;
    ensure(data, len, offset)?;
    Ok(data.split_to(len))
}

/// Streaming container writer.
///
/// Track records are written up front; the trailer is only written by
/// [`ContainerWriter::finish`], so an abandoned writer leaves an
/// unfinalized file behind.
pub struct ContainerWriter<W: Write> {
    out: W,
    summaries: Vec<TrackSummary>,
    scratch: BytesMut,
}

impl<W: Write> ContainerWriter<W> {
    /// Writes the signature and one track record per format.
    ///
    /// # Errors
    ///
    /// - `ContainerError::TooManyTracks` - More tracks than a sample record can address
    /// - `ContainerError::Json` - Format could not be serialized
    /// - `ContainerError::Io` - Output failed
    pub fn new(mut out: W, tracks: &[TrackFormat]) -> Result<Self, ContainerError> {
        if tracks.len() > usize::from(u8::MAX) + 1 {
            return Err(ContainerError::TooManyTracks {
                count: tracks.len(),
            });
        }

        let mut scratch = BytesMut::with_capacity(256);
        scratch.put_slice(MAGIC);
        scratch.put_u8(VERSION);
        for format in tracks {
            put_block(&mut scratch, RECORD_TRACK, &serde_json::to_vec(format)?)?;
        }
        out.write_all(&scratch)?;
        scratch.clear();

        Ok(Self {
            out,
            summaries: vec![TrackSummary::default(); tracks.len()],
            scratch,
        })
    }

    /// # Errors
    ///
    /// - `ContainerError::UnknownTrack` - Track was not declared
    /// - `ContainerError::RecordTooLarge` - Payload does not fit a sample record
    /// - `ContainerError::Io` - Output failed
    pub fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), ContainerError> {
        let len = record_len(sample.data.len())?;
        let (Ok(track_id), Some(summary)) = (u8::try_from(track), self.summaries.get_mut(track))
        else {
            return Err(ContainerError::UnknownTrack { track, offset: 0 });
        };
        summary.duration_us = summary.duration_us.max(sample.pts_us);
        summary.samples += 1;

        self.scratch.clear();
        self.scratch.put_u8(RECORD_SAMPLE);
        self.scratch.put_u8(track_id);
        self.scratch.put_i64(sample.pts_us);
        self.scratch.put_u32(sample.flags.bits());
        self.scratch.put_u32(len);
        self.out.write_all(&self.scratch)?;
        self.out.write_all(&sample.data)?;
        Ok(())
    }

    /// Flushes buffered output without finalizing.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Io` - Output failed
    pub fn flush(&mut self) -> Result<(), ContainerError> {
        self.out.flush()?;
        Ok(())
    }

    /// Writes the trailer and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Json` - Trailer could not be serialized
    /// - `ContainerError::Io` - Output failed
    pub fn finish(mut self) -> Result<(W, Trailer), ContainerError> {
        let trailer = Trailer {
            duration_us: self
                .summaries
                .iter()
                .map(|summary| summary.duration_us)
                .max()
                .unwrap_or(0),
            tracks: self.summaries,
        };
        self.scratch.clear();
        put_block(&mut self.scratch, RECORD_TRAILER, &serde_json::to_vec(&trailer)?)?;
        self.out.write_all(&self.scratch)?;
        self.out.flush()?;
        Ok((self.out, trailer))
    }
}

fn record_len(len: usize) -> Result<u32, ContainerError> {
    u32::try_from(len).map_err(|_| ContainerError::RecordTooLarge { len })
}

fn put_block(buf: &mut BytesMut, tag: u8, block: &[u8]) -> Result<(), ContainerError> {
    let len = record_len(block.len())?;
    buf.put_u8(tag);
    buf.put_u32(len);
    buf.put_slice(block);
    Ok(())
}

#[cfg(test)]
mod tests {
    use reel_core::media::{AudioParams, MIME_AUDIO_AAC, MIME_VIDEO_AVC, VideoParams};

    use super::*;

    fn formats() -> Vec<TrackFormat> {
        vec![
            TrackFormat::video(
                MIME_VIDEO_AVC,
                VideoParams {
                    width: 640,
                    height: 360,
                    frame_rate: 30,
                    bitrate: Some(1_000_000),
                    key_frame_interval: Some(1),
                    color_format: None,
                },
            ),
            TrackFormat::audio(
                MIME_AUDIO_AAC,
                AudioParams {
                    sample_rate: 48_000,
                    channel_count: 2,
                    bitrate: Some(128_000),
                    profile: None,
                },
            ),
        ]
    }

    fn sample(pts_us: i64, payload: &'static [u8]) -> Sample {
        Sample::new(Bytes::from_static(payload), pts_us, SampleFlags::KEY_FRAME)
    }

    fn finalized_bytes() -> Vec<u8> {
        let mut writer = ContainerWriter::new(Vec::new(), &formats()).unwrap();
        writer.write_sample(0, &sample(0, b"frame0")).unwrap();
        writer.write_sample(1, &sample(0, b"pcm0")).unwrap();
        writer.write_sample(0, &sample(33_333, b"frame1")).unwrap();
        writer.finish().unwrap().0
    }

    #[test]
    fn test_written_container_parses_back() {
        let container = Container::parse(Bytes::from(finalized_bytes())).unwrap();

        assert!(container.is_finalized());
        assert_eq!(container.tracks, formats());
        assert_eq!(container.samples.len(), 3);
        assert_eq!(container.track_samples(0).count(), 2);
        assert_eq!(&container.samples[2].data[..], b"frame1");
        assert!(container.samples[2].flags.is_key_frame());

        let trailer = container.trailer.as_ref().unwrap();
        assert_eq!(trailer.duration_us, 33_333);
        assert_eq!(trailer.tracks[0].samples, 2);
        assert_eq!(container.track_formats()[0].duration_us, Some(33_333));
        assert_eq!(container.track_formats()[1].duration_us, Some(0));
    }

    #[test]
    fn test_unfinalized_container_has_no_trailer() {
        let mut writer = ContainerWriter::new(Vec::new(), &formats()).unwrap();
        writer.write_sample(0, &sample(0, b"frame0")).unwrap();
        let bytes = writer.out.clone();

        let container = Container::parse(Bytes::from(bytes)).unwrap();
        assert!(!container.is_finalized());
        assert_eq!(container.samples.len(), 1);
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        assert!(matches!(
            Container::parse(Bytes::from_static(b"RIFF\x01")),
            Err(ContainerError::BadMagic)
        ));
        assert!(matches!(
            Container::parse(Bytes::from_static(b"REEL\x07")),
            Err(ContainerError::UnsupportedVersion { version: 7 })
        ));
    }

    #[test]
    fn test_rejects_truncated_sample() {
        let mut writer = ContainerWriter::new(Vec::new(), &formats()).unwrap();
        writer.write_sample(0, &sample(0, b"frame0")).unwrap();
        let mut bytes = writer.out.clone();
        bytes.truncate(bytes.len() - 2);

        assert!(matches!(
            Container::parse(Bytes::from(bytes)),
            Err(ContainerError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_data_after_trailer() {
        let mut bytes = finalized_bytes();
        bytes.push(RECORD_SAMPLE);
        assert!(matches!(
            Container::parse(Bytes::from(bytes)),
            Err(ContainerError::TrailingData { .. })
        ));
    }

    #[test]
    fn test_rejects_sample_for_unknown_track() {
        let mut writer = ContainerWriter::new(Vec::new(), &formats()[..1]).unwrap();
        assert!(matches!(
            writer.write_sample(1, &sample(0, b"x")),
            Err(ContainerError::UnknownTrack { track: 1, .. })
        ));
    }

    #[test]
    fn test_record_length_must_fit_u32() {
        assert_eq!(record_len(0).unwrap(), 0);
        assert_eq!(record_len(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            record_len(u32::MAX as usize + 1),
            Err(ContainerError::RecordTooLarge { len }) if len == 1 << 32
        ));
    }

    #[test]
    fn test_container_error_maps_to_codec_error() {
        let error: CodecError = ContainerError::BadMagic.into();
        assert!(matches!(error, CodecError::Malformed { .. }));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: CodecError = ContainerError::Io(io).into();
        assert!(matches!(error, CodecError::Io(_)));
    }
}
