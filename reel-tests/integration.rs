//! Integration tests for Reel
//!
//! These tests drive the transcoding engine and the job queue against the
//! simulated media backend, checking the produced containers byte by byte
//! and verifying that every platform handle is released.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/engine_pipeline.rs"]
mod engine_pipeline;
#[path = "integration/failure_paths.rs"]
mod failure_paths;
#[path = "integration/queue_jobs.rs"]
mod queue_jobs;
