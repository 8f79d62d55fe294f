//! Progress values, sinks and throttled reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Completion estimate of a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Some track has no known duration
    Indeterminate,
    /// Fraction in `[0.0, 1.0]`
    Fraction(f64),
}

impl Progress {
    /// Value reported for [`Progress::Indeterminate`] by [`Progress::as_f64`].
    pub const INDETERMINATE: f64 = -1.0;

    /// Flattens to a single number, negative meaning indeterminate.
    pub fn as_f64(self) -> f64 {
        match self {
            Progress::Indeterminate => Self::INDETERMINATE,
            Progress::Fraction(value) => value,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, Progress::Fraction(value) if value >= 1.0)
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Progress::Indeterminate => f.write_str("--%"),
            Progress::Fraction(value) => write!(f, "{:.1}%", value * 100.0),
        }
    }
}

/// Receiver of progress updates.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
    fn on_progress(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Cooperative cancellation flag shared between a job and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Emits progress every `interval` ticks, skipping values equal to the last one sent.
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    interval: u32,
    ticks: u32,
    last: Option<Progress>,
}

impl ProgressReporter {
    pub(crate) fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            ticks: 0,
            last: None,
        }
    }

    pub(crate) fn tick(&mut self, progress: Progress, sink: &mut dyn ProgressSink) {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.interval != 0 {
            return;
        }
        self.emit(progress, sink);
    }

    /// Reports completion unless it was already reported.
    pub(crate) fn finish(&mut self, sink: &mut dyn ProgressSink) {
        self.emit(Progress::Fraction(1.0), sink);
    }

    fn emit(&mut self, progress: Progress, sink: &mut dyn ProgressSink) {
        if self.last == Some(progress) {
            return;
        }
        self.last = Some(progress);
        sink.on_progress(progress);
    }
}
