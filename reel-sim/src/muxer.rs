//! Container writer behind the `Muxer` service contract.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use reel_core::media::{Sample, TrackFormat};
use reel_core::service::{CodecError, Muxer};

use crate::container::ContainerWriter;
use crate::probe::HandleGuard;

enum WriterState {
    Configuring(BufWriter<File>),
    Writing(ContainerWriter<BufWriter<File>>),
    Closed,
}

/// Writes a reel container. Only [`Muxer::stop`] finalizes the file.
pub struct SimMuxer {
    path: PathBuf,
    formats: Vec<TrackFormat>,
    last_pts_us: Vec<Option<i64>>,
    state: WriterState,
    stopped: bool,
    guard: HandleGuard,
}

impl SimMuxer {
    /// Creates (truncating) the output file.
    ///
    /// # Errors
    ///
    /// - `CodecError::Io` - File could not be created
    pub fn create(path: &Path, mut guard: HandleGuard) -> Result<Self, CodecError> {
        let file = match File::create(path) {
            Ok(file) => file,
            Err(e) => {
                guard.release();
                return Err(e.into());
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            formats: Vec::new(),
            last_pts_us: Vec::new(),
            state: WriterState::Configuring(BufWriter::new(file)),
            stopped: false,
            guard,
        })
    }

    fn illegal(&self, reason: &str) -> CodecError {
        CodecError::IllegalState {
            reason: format!("muxer for {}: {reason}", self.path.display()),
        }
    }
}

impl Muxer for SimMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, CodecError> {
        if !matches!(self.state, WriterState::Configuring(_)) {
            return Err(self.illegal("tracks must be added before start"));
        }
        self.formats.push(format.clone());
        self.last_pts_us.push(None);
        Ok(self.formats.len() - 1)
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if !matches!(self.state, WriterState::Configuring(_)) {
            return Err(self.illegal("already started"));
        }
        if self.formats.is_empty() {
            return Err(self.illegal("no tracks added"));
        }
        let WriterState::Configuring(out) = std::mem::replace(&mut self.state, WriterState::Closed)
        else {
            return Err(self.illegal("already started"));
        };
        self.state = WriterState::Writing(ContainerWriter::new(out, &self.formats)?);
        tracing::debug!(
            "Muxer started for {} with {} tracks",
            self.path.display(),
            self.formats.len()
        );
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &Sample) -> Result<(), CodecError> {
        if !matches!(self.state, WriterState::Writing(_)) {
            return Err(self.illegal("not started"));
        }
        let Some(last) = self.last_pts_us.get_mut(track) else {
            return Err(self.illegal(&format!("unknown track {track}")));
        };
        if let Some(previous) = *last
            && sample.pts_us < previous
        {
            let reason = format!("track {track} went back from {previous}us to {}us", sample.pts_us);
            return Err(self.illegal(&reason));
        }
        *last = Some(sample.pts_us);

        if let WriterState::Writing(writer) = &mut self.state {
            writer.write_sample(track, sample)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        if !matches!(self.state, WriterState::Writing(_)) {
            return Err(self.illegal("not started"));
        }
        let WriterState::Writing(writer) = std::mem::replace(&mut self.state, WriterState::Closed)
        else {
            return Err(self.illegal("not started"));
        };
        let (_, trailer) = writer.finish()?;
        self.stopped = true;
        tracing::debug!(
            "Finalized {} ({}us)",
            self.path.display(),
            trailer.duration_us
        );
        Ok(())
    }

    fn release(&mut self) {
        if !self.guard.release() {
            return;
        }
        if let WriterState::Writing(writer) = &mut self.state
            && let Err(e) = writer.flush()
        {
            tracing::warn!("Failed to flush {}: {e}", self.path.display());
        }
        self.state = WriterState::Closed;
        if !self.stopped {
            tracing::debug!("Closed {} without finalizing", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use reel_core::media::{AudioParams, MIME_AUDIO_AAC, SampleFlags};

    use super::*;
    use crate::container::Container;
    use crate::probe::{HandleKind, HandleProbe};

    fn audio() -> TrackFormat {
        TrackFormat::audio(
            MIME_AUDIO_AAC,
            AudioParams {
                sample_rate: 44_100,
                channel_count: 2,
                bitrate: Some(128_000),
                profile: None,
            },
        )
    }

    fn sample(pts_us: i64) -> Sample {
        Sample::new(Bytes::from_static(b"aac"), pts_us, SampleFlags::KEY_FRAME)
    }

    #[test]
    fn test_stop_finalizes_container() {
        let probe = HandleProbe::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.reel");

        let mut muxer = SimMuxer::create(&path, probe.open(HandleKind::Muxer)).unwrap();
        assert!(muxer.start().is_err());
        assert_eq!(muxer.add_track(&audio()).unwrap(), 0);
        muxer.start().unwrap();
        assert!(muxer.add_track(&audio()).is_err());
        muxer.write_sample(0, &sample(0)).unwrap();
        muxer.write_sample(0, &sample(23_219)).unwrap();
        muxer.stop().unwrap();
        muxer.release();
        assert_eq!(probe.live(), 0);

        let container = Container::read(&path).unwrap();
        assert!(container.is_finalized());
        assert_eq!(container.samples.len(), 2);
        assert_eq!(container.trailer.unwrap().duration_us, 23_219);
    }

    #[test]
    fn test_release_without_stop_leaves_unfinalized_file() {
        let probe = HandleProbe::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.reel");

        let mut muxer = SimMuxer::create(&path, probe.open(HandleKind::Muxer)).unwrap();
        muxer.add_track(&audio()).unwrap();
        muxer.start().unwrap();
        muxer.write_sample(0, &sample(0)).unwrap();
        muxer.release();

        let container = Container::read(&path).unwrap();
        assert!(!container.is_finalized());
        assert_eq!(container.samples.len(), 1);
        assert!(muxer.stop().is_err());
    }

    #[test]
    fn test_rejects_regression_and_unknown_track() {
        let probe = HandleProbe::new();
        let dir = tempfile::tempdir().unwrap();
        let mut muxer =
            SimMuxer::create(&dir.path().join("out.reel"), probe.open(HandleKind::Muxer)).unwrap();
        muxer.add_track(&audio()).unwrap();
        muxer.start().unwrap();

        muxer.write_sample(0, &sample(100)).unwrap();
        muxer.write_sample(0, &sample(100)).unwrap();
        assert!(muxer.write_sample(0, &sample(99)).is_err());
        assert!(muxer.write_sample(3, &sample(200)).is_err());
        muxer.release();
    }
}
