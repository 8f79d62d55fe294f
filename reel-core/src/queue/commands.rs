//! Command definitions for the transcode queue actor.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::TranscodeError;
use crate::engine::{CancellationFlag, Progress, TranscodeOutcome};
use crate::negotiate::FormatStrategy;

/// Unique identifier for transcode jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file to transcode.
#[derive(Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub strategy: Arc<dyn FormatStrategy>,
}

impl TranscodeRequest {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        strategy: Arc<dyn FormatStrategy>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            strategy,
        }
    }
}

impl std::fmt::Debug for TranscodeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeRequest")
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Notification delivered to the submitter of a job.
#[derive(Debug)]
pub enum TranscodeEvent {
    Progress(Progress),
    /// Always the last event of a job
    Finished(TranscodeOutcome),
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// A submitted job waiting for or occupying the worker.
pub(super) struct QueuedJob {
    pub id: JobId,
    pub request: TranscodeRequest,
    pub cancel: CancellationFlag,
    pub events: mpsc::UnboundedSender<TranscodeEvent>,
}

/// Commands that can be sent to the queue actor.
pub(super) enum QueueCommand {
    /// Enqueue a job; answered once it has a place in the queue.
    Submit {
        job: QueuedJob,
        responder: oneshot::Sender<Result<(), TranscodeError>>,
    },
    /// Drop a pending job or stop the running one.
    Cancel { job_id: JobId },
    GetStats {
        responder: oneshot::Sender<QueueStats>,
    },
    /// Cancel everything and stop once the running job has reported.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Internal notification that a worker finished its job.
pub(super) struct JobFinished {
    pub job_id: JobId,
    pub outcome: TranscodeOutcome,
}
