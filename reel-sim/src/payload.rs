//! Self-describing sample payloads.
//!
//! Every simulated sample starts with a 12-byte header: a 4-byte stream tag
//! followed by two big-endian `u32` dimensions (width/height for video,
//! sample rate/channel count for audio). Codecs check the tag of every input
//! so a sample routed to the wrong codec fails loudly.

use bytes::{Buf, BufMut, BytesMut};
use reel_core::media::{
    MIME_AUDIO_AAC, MIME_AUDIO_RAW, MIME_VIDEO_AVC, MIME_VIDEO_RAW, MediaParams, TrackFormat,
};

pub const HEADER_LEN: usize = 12;

pub const TAG_AVC: [u8; 4] = *b"AVC1";
pub const TAG_AAC: [u8; 4] = *b"AAC0";
pub const TAG_YUV: [u8; 4] = *b"YUV0";
pub const TAG_PCM: [u8; 4] = *b"PCM0";
pub const TAG_UNKNOWN: [u8; 4] = *b"UNKN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub tag: [u8; 4],
    pub dims: (u32, u32),
}

impl PayloadHeader {
    /// Header describing samples of `format`.
    pub fn for_format(format: &TrackFormat) -> Self {
        Self {
            tag: tag_for_mime(&format.mime),
            dims: dims_of(format),
        }
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let mut header = &data[..HEADER_LEN];
        let mut tag = [0u8; 4];
        header.copy_to_slice(&mut tag);
        let first = header.get_u32();
        let second = header.get_u32();
        Some(Self {
            tag,
            dims: (first, second),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.tag);
        buf.put_u32(self.dims.0);
        buf.put_u32(self.dims.1);
    }
}

pub fn tag_for_mime(mime: &str) -> [u8; 4] {
    match mime {
        MIME_VIDEO_AVC => TAG_AVC,
        MIME_AUDIO_AAC => TAG_AAC,
        MIME_VIDEO_RAW => TAG_YUV,
        MIME_AUDIO_RAW => TAG_PCM,
        _ => TAG_UNKNOWN,
    }
}

fn dims_of(format: &TrackFormat) -> (u32, u32) {
    match &format.params {
        MediaParams::Video(video) => (video.width, video.height),
        MediaParams::Audio(audio) => (audio.sample_rate, audio.channel_count),
    }
}

/// Builds a payload: header plus `body_len` bytes produced by `fill`.
pub fn build(header: PayloadHeader, body_len: usize, fill: impl FnOnce(&mut [u8])) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    header.write(&mut buf);
    let start = buf.len();
    buf.resize(start + body_len, 0);
    fill(&mut buf[start..]);
    buf
}
