//! Shared helpers for integration tests

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reel_core::config::ReelConfig;
use reel_core::{FormatStrategy, Progress, TrackKind, TranscodeError, TranscoderEngine};
use reel_sim::{Container, ContainerSample, SimBackend, SynthSpec, write_synthetic};

/// Writes a synthetic input named `name` into `dir`.
pub fn synth_input(dir: &Path, name: &str, spec: &SynthSpec) -> PathBuf {
    let path = dir.join(name);
    write_synthetic(&path, spec).unwrap();
    path
}

/// Opens and runs one engine to completion, collecting every progress update.
pub fn transcode(
    backend: &SimBackend,
    input: &Path,
    output: &Path,
    strategy: &dyn FormatStrategy,
) -> Result<Vec<Progress>, TranscodeError> {
    let engine = TranscoderEngine::open(
        Arc::new(backend.clone()),
        File::open(input)?,
        output,
        strategy,
        ReelConfig::for_testing().engine,
    )?;
    let mut progress = Vec::new();
    engine.run(&mut |update: Progress| progress.push(update))?;
    Ok(progress)
}

/// Index of the first track of `kind`.
pub fn track_of(container: &Container, kind: TrackKind) -> Option<usize> {
    container.tracks.iter().position(|format| format.kind() == kind)
}

/// Samples of the first track of `kind`, empty if there is none.
pub fn samples_of(container: &Container, kind: TrackKind) -> Vec<&ContainerSample> {
    match track_of(container, kind) {
        Some(track) => container.track_samples(track).collect(),
        None => Vec::new(),
    }
}

/// Asserts the file at `path` is not a finalized container.
///
/// A writer that never started leaves an empty file, which does not parse.
pub fn assert_unfinalized(path: &Path) {
    if let Ok(container) = Container::read(path) {
        assert!(!container.is_finalized(), "{} was finalized", path.display());
    }
}
