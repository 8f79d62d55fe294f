//! Actor implementation for the transcode queue.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::commands::{
    JobFinished, JobId, QueueCommand, QueueStats, QueuedJob, TranscodeEvent, TranscodeRequest,
};
use super::handle::TranscodeQueue;
use crate::TranscodeError;
use crate::config::{EngineConfig, ReelConfig};
use crate::engine::{CancellationFlag, Progress, TranscodeOutcome, TranscoderEngine};
use crate::service::{CodecError, MediaBackend};

const COMMAND_CHANNEL_CAPACITY: usize = 100;

/// Spawns the queue actor and returns its handle.
///
/// Must be called from within a tokio runtime.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
/// use reel_core::config::ReelConfig;
/// use reel_core::queue::spawn_transcode_queue;
/// # fn backend() -> Arc<dyn reel_core::MediaBackend> { unimplemented!() }
///
/// let queue = spawn_transcode_queue(ReelConfig::default(), backend());
/// # }
/// ```
pub fn spawn_transcode_queue(
    config: ReelConfig,
    backend: Arc<dyn MediaBackend>,
) -> TranscodeQueue {
    let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (finished_tx, finished_rx) = mpsc::unbounded_channel();
    let actor = QueueActor::new(config, backend, finished_tx);

    tokio::spawn(async move {
        run_actor_loop(actor, receiver, finished_rx).await;
    });

    TranscodeQueue::from_sender(sender)
}

/// Submission parked until the pending queue has room.
struct WaitingSubmit {
    job: QueuedJob,
    responder: oneshot::Sender<Result<(), TranscodeError>>,
}

struct RunningJob {
    cancel: CancellationFlag,
    events: mpsc::UnboundedSender<TranscodeEvent>,
}

struct QueueActor {
    config: ReelConfig,
    backend: Arc<dyn MediaBackend>,
    finished_tx: mpsc::UnboundedSender<JobFinished>,
    pending: VecDeque<QueuedJob>,
    waiting: VecDeque<WaitingSubmit>,
    running: HashMap<JobId, RunningJob>,
    stats: QueueStats,
    shutting_down: bool,
}

async fn run_actor_loop(
    mut actor: QueueActor,
    mut receiver: mpsc::Receiver<QueueCommand>,
    mut finished_rx: mpsc::UnboundedReceiver<JobFinished>,
) {
    tracing::debug!("Transcode queue actor started");
    let mut commands_open = true;

    loop {
        tokio::select! {
            command = receiver.recv(), if commands_open => match command {
                Some(command) => actor.handle_command(command),
                None => {
                    commands_open = false;
                    actor.begin_shutdown();
                }
            },
            Some(finished) = finished_rx.recv() => actor.job_finished(finished),
        }

        if actor.shutting_down && actor.running.is_empty() {
            break;
        }
    }

    tracing::debug!("Transcode queue actor stopped");
}

impl QueueActor {
    fn new(
        config: ReelConfig,
        backend: Arc<dyn MediaBackend>,
        finished_tx: mpsc::UnboundedSender<JobFinished>,
    ) -> Self {
        Self {
            config,
            backend,
            finished_tx,
            pending: VecDeque::new(),
            waiting: VecDeque::new(),
            running: HashMap::new(),
            stats: QueueStats::default(),
            shutting_down: false,
        }
    }

    fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Submit { job, responder } => {
                self.submit(job, responder);
                self.start_next_job();
            }
            QueueCommand::Cancel { job_id } => self.cancel(job_id),
            QueueCommand::GetStats { responder } => {
                let _ = responder.send(self.statistics());
            }
            QueueCommand::Shutdown { responder } => {
                self.begin_shutdown();
                let _ = responder.send(());
            }
        }
    }

    fn has_room(&self) -> bool {
        self.pending.len() < self.config.queue.queue_capacity.max(1)
    }

    fn submit(
        &mut self,
        job: QueuedJob,
        responder: oneshot::Sender<Result<(), TranscodeError>>,
    ) {
        if self.shutting_down {
            let _ = responder.send(Err(TranscodeError::QueueShutdown));
            return;
        }
        if !self.waiting.is_empty() || !self.has_room() {
            tracing::debug!("Queue full, job {} waits for room", job.id);
            self.waiting.push_back(WaitingSubmit { job, responder });
            return;
        }
        self.enqueue(job);
        let _ = responder.send(Ok(()));
    }

    /// Moves parked submissions into the queue while it has room.
    fn admit_waiting(&mut self) {
        while self.has_room() {
            let Some(WaitingSubmit { job, responder }) = self.waiting.pop_front() else {
                break;
            };
            // Submitter gave up waiting; the job was never acknowledged
            if responder.is_closed() {
                continue;
            }
            self.enqueue(job);
            let _ = responder.send(Ok(()));
        }
    }

    fn enqueue(&mut self, job: QueuedJob) {
        tracing::debug!(
            "Queued job {} ({} -> {})",
            job.id,
            job.request.input.display(),
            job.request.output.display()
        );
        self.pending.push_back(job);
    }

    fn cancel(&mut self, job_id: JobId) {
        if let Some(position) = self.pending.iter().position(|job| job.id == job_id) {
            if let Some(job) = self.pending.remove(position) {
                tracing::debug!("Cancelled pending job {job_id}");
                self.stats.cancelled += 1;
                let _ = job
                    .events
                    .send(TranscodeEvent::Finished(TranscodeOutcome::Cancelled));
            }
            self.admit_waiting();
        } else if let Some(running) = self.running.get(&job_id) {
            tracing::debug!("Cancelling running job {job_id}");
            running.cancel.cancel();
        }
    }

    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        tracing::info!(
            "Transcode queue shutting down ({} pending, {} running)",
            self.pending.len(),
            self.running.len()
        );
        for waiting in self.waiting.drain(..) {
            let _ = waiting.responder.send(Err(TranscodeError::QueueShutdown));
        }
        for job in self.pending.drain(..) {
            self.stats.cancelled += 1;
            let _ = job
                .events
                .send(TranscodeEvent::Finished(TranscodeOutcome::Cancelled));
        }
        for running in self.running.values() {
            running.cancel.cancel();
        }
    }

    /// Starts the oldest pending job unless one is already running.
    fn start_next_job(&mut self) {
        if !self.running.is_empty() {
            return;
        }
        while !self.shutting_down {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            if job.cancel.is_cancelled() {
                self.stats.cancelled += 1;
                let _ = job
                    .events
                    .send(TranscodeEvent::Finished(TranscodeOutcome::Cancelled));
                continue;
            }
            self.start(job);
            break;
        }
        self.admit_waiting();
    }

    fn start(&mut self, job: QueuedJob) {
        let QueuedJob {
            id,
            request,
            cancel,
            events,
        } = job;
        tracing::info!("Starting job {id}");

        self.running.insert(
            id,
            RunningJob {
                cancel: cancel.clone(),
                events: events.clone(),
            },
        );

        let backend = self.backend.clone();
        let config = self.config.engine.clone();
        let worker = tokio::task::spawn_blocking(move || {
            run_job(backend, &request, config, cancel, &events)
        });

        let finished_tx = self.finished_tx.clone();
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => TranscodeOutcome::Failed(TranscodeError::Codec(CodecError::Failed {
                    reason: format!("transcode worker died: {e}"),
                })),
            };
            let _ = finished_tx.send(JobFinished {
                job_id: id,
                outcome,
            });
        });
    }

    fn job_finished(&mut self, finished: JobFinished) {
        let JobFinished { job_id, outcome } = finished;
        match &outcome {
            TranscodeOutcome::Completed => self.stats.completed += 1,
            TranscodeOutcome::Cancelled => self.stats.cancelled += 1,
            TranscodeOutcome::Failed(_) => self.stats.failed += 1,
        }
        tracing::info!("Job {job_id} {outcome}");

        // Stats are settled before the submitter can observe the outcome
        if let Some(running) = self.running.remove(&job_id) {
            let _ = running.events.send(TranscodeEvent::Finished(outcome));
        }
        self.start_next_job();
    }

    fn statistics(&self) -> QueueStats {
        QueueStats {
            queued: self.pending.len() + self.waiting.len(),
            running: self.running.len(),
            ..self.stats.clone()
        }
    }
}

/// Runs one job on the current (blocking) thread.
fn run_job(
    backend: Arc<dyn MediaBackend>,
    request: &TranscodeRequest,
    config: EngineConfig,
    cancel: CancellationFlag,
    events: &mpsc::UnboundedSender<TranscodeEvent>,
) -> TranscodeOutcome {
    if cancel.is_cancelled() {
        return TranscodeOutcome::Cancelled;
    }
    let input = match File::open(&request.input) {
        Ok(input) => input,
        Err(e) => return TranscodeOutcome::Failed(e.into()),
    };
    let engine = match TranscoderEngine::open(
        backend,
        input,
        &request.output,
        request.strategy.as_ref(),
        config,
    ) {
        Ok(engine) => engine.with_cancellation(cancel),
        Err(e) => return TranscodeOutcome::Failed(e),
    };

    let mut sink = |progress: Progress| {
        let _ = events.send(TranscodeEvent::Progress(progress));
    };
    TranscodeOutcome::from_result(engine.run(&mut sink))
}
