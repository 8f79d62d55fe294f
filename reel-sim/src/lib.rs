//! Reel Simulation - deterministic media services for testing the engine.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! Implements the demuxer, codec and muxer contracts of `reel_core::service`
//! entirely in process, over a small container format of its own. Nothing
//! depends on wall-clock time or platform codecs, so the same input always
//! transcodes to the same bytes.
//!
//! # Features
//!
//! - **Reel container**: seekless record stream, finalized by a trailer
//! - **Simulated codecs**: bounded buffer pools, pipeline latency, codec-config output
//! - **Handle probe**: counts unreleased services to catch resource leaks
//! - **Fault injection**: missing codecs, wrong encoder output, mid-stream failures
//! - **Synthetic inputs**: seeded AVC/AAC content of any length and frame size
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use reel_sim::{SimBackend, SynthSpec, write_synthetic};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = SynthSpec::hd1080(Duration::from_secs(5));
//! write_synthetic(std::path::Path::new("input.reel"), &spec)?;
//!
//! let backend = Arc::new(SimBackend::new());
//! // Hand `backend` to a TranscoderEngine or TranscodeQueue.
//! assert_eq!(backend.probe().live(), 0);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod container;
pub mod demuxer;
pub mod muxer;
pub mod payload;
pub mod probe;
pub mod rng;
pub mod synth;

pub use backend::{FaultPlan, SimBackend};
pub use codec::{CodecRole, SimCodec, SimCodecConfig};
pub use container::{Container, ContainerError, ContainerSample, ContainerWriter, Trailer};
pub use demuxer::SimDemuxer;
pub use muxer::SimMuxer;
pub use probe::{HandleGuard, HandleKind, HandleProbe};
pub use rng::DeterministicRng;
pub use synth::{SynthSpec, SynthSummary, synthesize, synthetic_bytes, write_synthetic};
