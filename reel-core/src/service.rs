//! Contracts of the platform media services the engine drives.
//!
//! Demuxers, codecs and container writers are opaque, queue-based services
//! supplied by a [`MediaBackend`]. The engine only ever talks to them through
//! these traits, so a hardware codec API, a software library or the
//! deterministic simulator in `reel-sim` can sit behind the same pump loop.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;

use crate::media::{BufferInfo, Sample, TrackFormat};

/// Index of a buffer owned by a codec's input or output pool.
pub type BufferIndex = usize;

/// Errors reported by media services.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no codec available for {mime}: {reason}")]
    Unavailable { mime: String, reason: String },

    #[error("codec rejected configuration: {reason}")]
    Configure { reason: String },

    #[error("invalid buffer index {index}")]
    InvalidBuffer { index: BufferIndex },

    #[error("illegal service state: {reason}")]
    IllegalState { reason: String },

    #[error("codec failure: {reason}")]
    Failed { reason: String },

    #[error("malformed container: {reason}")]
    Malformed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Position of the next sample a demuxer will hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleHeader {
    /// Demuxer track index the sample belongs to
    pub track: usize,
    pub info: BufferInfo,
}

/// Result of polling a codec's output queue.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus {
    /// Nothing available within the timeout
    TryAgainLater,
    /// The codec settled (or changed) its output format
    FormatChanged(TrackFormat),
    /// A processed buffer is ready; it must be released after reading
    Buffer { index: BufferIndex, info: BufferInfo },
}

/// Splits a container into per-track coded samples.
///
/// Samples of all selected tracks come out of a single cursor in file order;
/// callers peek at the next header and only read it when it belongs to them.
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    /// Format of the track at `track`, including its duration when known.
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Track index out of range
    fn track_format(&self, track: usize) -> Result<TrackFormat, CodecError>;

    /// Container-level duration in microseconds.
    fn duration_us(&self) -> Option<i64>;

    /// Makes samples of `track` visible through the cursor.
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Track index out of range
    fn select_track(&mut self, track: usize) -> Result<(), CodecError>;

    /// Header of the next sample among selected tracks, `None` once exhausted.
    fn peek_sample(&self) -> Option<SampleHeader>;

    /// Appends the next sample's payload to `buf` and advances the cursor.
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - No sample left
    /// - `CodecError::Io` - Underlying read failed
    fn read_sample(&mut self, buf: &mut BytesMut) -> Result<SampleHeader, CodecError>;

    fn release(&mut self);
}

/// Queue-based decoder or encoder.
///
/// A codec is returned configured but not started. Input follows an
/// acquire / fill / submit cycle; output follows retrieve / read / release.
/// End-of-stream output buffers carry no payload.
pub trait Codec: Send {
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Codec already started or released
    fn start(&mut self) -> Result<(), CodecError>;

    /// Format the codec will emit, once it is known.
    fn output_format(&self) -> Option<TrackFormat>;

    /// Acquires a free input buffer, `None` if all are busy.
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Codec not running
    fn dequeue_input_buffer(&mut self, timeout: Duration)
    -> Result<Option<BufferIndex>, CodecError>;

    /// Writable storage of an acquired input buffer.
    ///
    /// # Errors
    ///
    /// - `CodecError::InvalidBuffer` - Index not currently acquired
    fn input_buffer(&mut self, index: BufferIndex) -> Result<&mut BytesMut, CodecError>;

    /// Submits a filled input buffer for processing.
    ///
    /// # Errors
    ///
    /// - `CodecError::InvalidBuffer` - Index not currently acquired
    /// - `CodecError::Failed` - Codec could not process the data
    fn queue_input_buffer(&mut self, index: BufferIndex, info: BufferInfo)
    -> Result<(), CodecError>;

    /// Polls for processed output.
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Codec not running
    /// - `CodecError::Failed` - Codec hit an unrecoverable error
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputStatus, CodecError>;

    /// Payload of a retrieved output buffer.
    ///
    /// # Errors
    ///
    /// - `CodecError::InvalidBuffer` - Index not currently retrieved
    fn output_buffer(&self, index: BufferIndex) -> Result<Bytes, CodecError>;

    /// Returns a retrieved output buffer to the codec.
    ///
    /// # Errors
    ///
    /// - `CodecError::InvalidBuffer` - Index not currently retrieved
    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<(), CodecError>;

    fn stop(&mut self);

    fn release(&mut self);
}

/// Container writer. Tracks are added before `start`, samples after it.
pub trait Muxer: Send {
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Muxer already started
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CodecError>;

    /// # Errors
    ///
    /// - `CodecError::IllegalState` - No tracks added or already started
    /// - `CodecError::Io` - Output could not be written
    fn start(&mut self) -> Result<(), CodecError>;

    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Muxer not started
    /// - `CodecError::Io` - Output could not be written
    fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), CodecError>;

    /// Finalizes the container (index and duration metadata).
    ///
    /// # Errors
    ///
    /// - `CodecError::IllegalState` - Muxer not started
    /// - `CodecError::Io` - Output could not be written
    fn stop(&mut self) -> Result<(), CodecError>;

    /// Closes the output without finalizing it.
    fn release(&mut self);
}

/// Factory for the media services of one platform.
pub trait MediaBackend: Send + Sync {
    /// # Errors
    ///
    /// - `CodecError::Io` - Input could not be read
    /// - `CodecError::Malformed` - Input is not a recognized container
    fn open_demuxer(&self, input: File) -> Result<Box<dyn Demuxer>, CodecError>;

    /// Creates a decoder configured for `input`.
    ///
    /// # Errors
    ///
    /// - `CodecError::Unavailable` - No decoder for the format
    fn create_decoder(&self, input: &TrackFormat) -> Result<Box<dyn Codec>, CodecError>;

    /// Creates an encoder configured to produce `output`.
    ///
    /// # Errors
    ///
    /// - `CodecError::Unavailable` - No encoder for the format
    fn create_encoder(&self, output: &TrackFormat) -> Result<Box<dyn Codec>, CodecError>;

    /// Creates the output file and a writer for it.
    ///
    /// # Errors
    ///
    /// - `CodecError::Io` - Output file could not be created
    fn create_muxer(&self, output: &Path) -> Result<Box<dyn Muxer>, CodecError>;
}

/// Demuxer shared by every track transcoder of one job.
pub type SharedDemuxer = Arc<Mutex<Box<dyn Demuxer>>>;
