//! End-to-end tests for Reel
//!
//! These tests follow complete user workflows from start to finish:
//! synthesizing an input, queueing transcodes and probing what came out.

mod transcode_workflow;
