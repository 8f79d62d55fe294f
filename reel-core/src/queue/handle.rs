//! Handles for talking to the queue actor and to individual jobs.

use tokio::sync::{mpsc, oneshot};

use super::commands::{JobId, QueueCommand, QueueStats, QueuedJob, TranscodeEvent, TranscodeRequest};
use crate::TranscodeError;
use crate::engine::{CancellationFlag, Progress, TranscodeOutcome};

/// Receiver of a job's notifications, driven by [`JobHandle::wait`].
pub trait TranscodeListener {
    fn on_progress(&mut self, _progress: Progress) {}

    fn on_completed(&mut self) {}

    fn on_cancelled(&mut self) {}

    fn on_failed(&mut self, _error: &TranscodeError) {}
}

/// Single-slot transcode queue.
///
/// Jobs run one at a time on a blocking worker thread, in submission order.
/// The handle can be cloned and shared across tasks.
#[derive(Clone)]
pub struct TranscodeQueue {
    sender: mpsc::Sender<QueueCommand>,
}

impl TranscodeQueue {
    pub(super) fn from_sender(sender: mpsc::Sender<QueueCommand>) -> Self {
        Self { sender }
    }

    /// Enqueues a job.
    ///
    /// Waits while the queue already holds `queue_capacity` pending jobs.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::QueueShutdown` - Queue is shutting down
    pub async fn submit(&self, request: TranscodeRequest) -> Result<JobHandle, TranscodeError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let job = QueuedJob {
            id: JobId::new(),
            request,
            cancel: CancellationFlag::new(),
            events: events_tx,
        };
        let handle = JobHandle {
            id: job.id,
            cancel: job.cancel.clone(),
            events: events_rx,
            commands: self.sender.clone(),
        };

        let (responder, rx) = oneshot::channel();
        self.sender
            .send(QueueCommand::Submit { job, responder })
            .await
            .map_err(|_| TranscodeError::QueueShutdown)?;
        rx.await.map_err(|_| TranscodeError::QueueShutdown)??;

        Ok(handle)
    }

    /// # Errors
    ///
    /// - `TranscodeError::QueueShutdown` - Queue actor has stopped
    pub async fn statistics(&self) -> Result<QueueStats, TranscodeError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(QueueCommand::GetStats { responder })
            .await
            .map_err(|_| TranscodeError::QueueShutdown)?;
        rx.await.map_err(|_| TranscodeError::QueueShutdown)
    }

    /// Cancels every pending and running job. Each still receives its
    /// terminal event.
    pub async fn shutdown(&self) {
        let (responder, rx) = oneshot::channel();
        if self
            .sender
            .send(QueueCommand::Shutdown { responder })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Submitter's view of one job.
///
/// Events are delivered on whatever task polls this handle.
pub struct JobHandle {
    id: JobId,
    cancel: CancellationFlag,
    events: mpsc::UnboundedReceiver<TranscodeEvent>,
    commands: mpsc::Sender<QueueCommand>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Requests cancellation. A pending job is dropped from the queue, a
    /// running one stops at its next pump iteration. Either way the job
    /// finishes with exactly one `Cancelled` outcome, unless it already
    /// finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
        // The raised flag alone is enough if the actor is busy or gone
        let _ = self.commands.try_send(QueueCommand::Cancel { job_id: self.id });
    }

    /// Next event, `None` once the job has finished and all events were read.
    pub async fn next_event(&mut self) -> Option<TranscodeEvent> {
        self.events.recv().await
    }

    /// Feeds every event to `listener` until the job finishes.
    pub async fn wait(mut self, listener: &mut dyn TranscodeListener) -> TranscodeOutcome {
        let outcome = loop {
            match self.next_event().await {
                Some(TranscodeEvent::Progress(progress)) => listener.on_progress(progress),
                Some(TranscodeEvent::Finished(outcome)) => break outcome,
                None => break TranscodeOutcome::Failed(TranscodeError::QueueShutdown),
            }
        };

        match &outcome {
            TranscodeOutcome::Completed => listener.on_completed(),
            TranscodeOutcome::Cancelled => listener.on_cancelled(),
            TranscodeOutcome::Failed(error) => listener.on_failed(error),
        }
        outcome
    }

    /// Waits for the outcome, discarding progress.
    pub async fn outcome(self) -> TranscodeOutcome {
        struct Ignore;
        impl TranscodeListener for Ignore {}
        self.wait(&mut Ignore).await
    }
}
