//! Timestamped media samples and their flags.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Bit set describing a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    /// Codec-specific data (e.g. SPS/PPS) rather than media payload
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(1 << 1);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 2);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

/// Metadata of a buffer handed to or received from a codec service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    pub flags: SampleFlags,
}

impl BufferInfo {
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self {
            size: 0,
            pts_us,
            flags: SampleFlags::END_OF_STREAM,
        }
    }
}

/// Coded or raw media data tagged with a presentation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Bytes,
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    pub flags: SampleFlags,
}

impl Sample {
    pub fn new(data: Bytes, pts_us: i64, flags: SampleFlags) -> Self {
        Self {
            data,
            pts_us,
            flags,
        }
    }

    /// Empty marker closing a track.
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self::new(Bytes::new(), pts_us, SampleFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            size: self.data.len(),
            pts_us: self.pts_us,
            flags: self.flags,
        }
    }
}
