//! Transcode engine
//!
//! [`TranscoderEngine`] runs one job to completion on the calling thread:
//! it opens the input, negotiates each track, wires the track pipelines to a
//! shared [`InterleavingMuxer`](crate::muxer::InterleavingMuxer) and pumps
//! them round-robin until every track has delivered end-of-stream.

mod driver;
mod progress;

pub use driver::{TranscodeOutcome, TranscoderEngine};
pub use progress::{CancellationFlag, Progress, ProgressSink};
