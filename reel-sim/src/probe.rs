//! Live-handle accounting for simulated services.
//!
//! Each demuxer, codec and muxer takes a [`HandleGuard`] when it is created
//! and gives it back in its `release()`. Dropping a service without
//! releasing it leaves the count raised, which is how tests catch leaks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Demuxer,
    Codec,
    Muxer,
}

#[derive(Debug, Default)]
struct Counters {
    demuxers: AtomicUsize,
    codecs: AtomicUsize,
    muxers: AtomicUsize,
    opened: AtomicUsize,
}

impl Counters {
    fn counter(&self, kind: HandleKind) -> &AtomicUsize {
        match kind {
            HandleKind::Demuxer => &self.demuxers,
            HandleKind::Codec => &self.codecs,
            HandleKind::Muxer => &self.muxers,
        }
    }
}

/// Shared counter of unreleased service handles.
#[derive(Debug, Clone, Default)]
pub struct HandleProbe {
    counters: Arc<Counters>,
}

impl HandleProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, kind: HandleKind) -> HandleGuard {
        self.counters.counter(kind).fetch_add(1, Ordering::SeqCst);
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        HandleGuard {
            probe: self.clone(),
            kind,
            released: false,
        }
    }

    /// Handles currently open, across all kinds.
    pub fn live(&self) -> usize {
        self.live_of(HandleKind::Demuxer)
            + self.live_of(HandleKind::Codec)
            + self.live_of(HandleKind::Muxer)
    }

    pub fn live_of(&self, kind: HandleKind) -> usize {
        self.counters.counter(kind).load(Ordering::SeqCst)
    }

    /// Handles ever opened.
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }
}

/// One open handle. Only an explicit [`HandleGuard::release`] closes it.
#[derive(Debug)]
pub struct HandleGuard {
    probe: HandleProbe,
    kind: HandleKind,
    released: bool,
}

impl HandleGuard {
    /// Closes the handle. Returns false if it was already closed.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.probe
            .counters
            .counter(self.kind)
            .fetch_sub(1, Ordering::SeqCst);
        true
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
