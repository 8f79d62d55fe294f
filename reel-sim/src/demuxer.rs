//! Demuxer over finalized reel containers.

use std::fs::File;

use bytes::BytesMut;
use reel_core::media::TrackFormat;
use reel_core::service::{CodecError, Demuxer, SampleHeader};

use crate::container::{Container, ContainerSample};
use crate::probe::HandleGuard;

pub struct SimDemuxer {
    formats: Vec<TrackFormat>,
    samples: Vec<ContainerSample>,
    selected: Vec<bool>,
    cursor: usize,
    duration_us: Option<i64>,
    guard: HandleGuard,
}

impl SimDemuxer {
    /// Loads the whole container into memory.
    ///
    /// # Errors
    ///
    /// - `CodecError::Io` - File could not be read
    /// - `CodecError::Malformed` - Not a reel container, or never finalized
    pub fn open(input: File, mut guard: HandleGuard) -> Result<Self, CodecError> {
        let container = match Container::from_reader(input) {
            Ok(container) => container,
            Err(e) => {
                guard.release();
                return Err(e.into());
            }
        };
        Self::from_container(container, guard)
    }

    /// # Errors
    ///
    /// - `CodecError::Malformed` - Container was never finalized
    pub fn from_container(container: Container, mut guard: HandleGuard) -> Result<Self, CodecError> {
        let Some(trailer) = &container.trailer else {
            guard.release();
            return Err(CodecError::Malformed {
                reason: "container was not finalized".to_string(),
            });
        };
        let duration_us = Some(trailer.duration_us);
        let formats = container.track_formats();
        tracing::debug!(
            "Opened container with {} tracks, {} samples",
            formats.len(),
            container.samples.len()
        );

        Ok(Self {
            selected: vec![false; formats.len()],
            formats,
            samples: container.samples,
            cursor: 0,
            duration_us,
            guard,
        })
    }

    fn check_track(&self, track: usize) -> Result<(), CodecError> {
        if track < self.formats.len() {
            Ok(())
        } else {
            Err(CodecError::IllegalState {
                reason: format!(
                    "track {track} out of range ({} tracks)",
                    self.formats.len()
                ),
            })
        }
    }

    /// Index of the next sample of a selected track at or after the cursor.
    fn next_selected(&self) -> Option<usize> {
        if self.guard.is_released() {
            return None;
        }
        self.samples[self.cursor..]
            .iter()
            .position(|sample| self.selected[sample.track])
            .map(|offset| self.cursor + offset)
    }
}

fn header_of(sample: &ContainerSample) -> SampleHeader {
    let info = sample.to_sample().info();
    SampleHeader {
        track: sample.track,
        info,
    }
}

impl Demuxer for SimDemuxer {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, track: usize) -> Result<TrackFormat, CodecError> {
        self.check_track(track)?;
        Ok(self.formats[track].clone())
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    fn select_track(&mut self, track: usize) -> Result<(), CodecError> {
        self.check_track(track)?;
        self.selected[track] = true;
        Ok(())
    }

    fn peek_sample(&self) -> Option<SampleHeader> {
        self.next_selected()
            .map(|index| header_of(&self.samples[index]))
    }

    fn read_sample(&mut self, buf: &mut BytesMut) -> Result<SampleHeader, CodecError> {
        let Some(index) = self.next_selected() else {
            return Err(CodecError::IllegalState {
                reason: "no sample left to read".to_string(),
            });
        };
        let sample = &self.samples[index];
        buf.extend_from_slice(&sample.data);
        let header = header_of(sample);
        self.cursor = index + 1;
        Ok(header)
    }

    fn release(&mut self) {
        if self.guard.release() {
            self.samples.clear();
            self.cursor = 0;
        }
    }
}
