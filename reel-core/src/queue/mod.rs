//! Single-slot transcode job queue
//!
//! Submissions are accepted from any task; jobs run strictly one after the
//! other on a blocking worker thread so the pump loop never stalls the async
//! runtime. Progress and the terminal outcome flow back through a per-job
//! channel that the submitter drains on its own task.

mod actor;
mod commands;
mod handle;

use std::sync::Arc;

pub use actor::spawn_transcode_queue;
pub use commands::{JobId, QueueStats, TranscodeEvent, TranscodeRequest};
pub use handle::{JobHandle, TranscodeListener, TranscodeQueue};

use crate::config::ReelConfig;
use crate::service::MediaBackend;

impl TranscodeQueue {
    /// Spawns the queue actor. Must be called from within a tokio runtime.
    pub fn new(config: ReelConfig, backend: Arc<dyn MediaBackend>) -> Self {
        spawn_transcode_queue(config, backend)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::*;
    use crate::TranscodeError;
    use crate::engine::{Progress, TranscodeOutcome};
    use crate::negotiate::presets;
    use crate::test_mocks::MockBackend;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<Progress>,
        completed: u32,
        cancelled: u32,
        failed: u32,
    }

    impl TranscodeListener for Recorder {
        fn on_progress(&mut self, progress: Progress) {
            self.progress.push(progress);
        }

        fn on_completed(&mut self) {
            self.completed += 1;
        }

        fn on_cancelled(&mut self) {
            self.cancelled += 1;
        }

        fn on_failed(&mut self, _error: &TranscodeError) {
            self.failed += 1;
        }
    }

    fn input_file(dir: &Path) -> PathBuf {
        let path = dir.join("input.reel");
        std::fs::write(&path, b"mock input").unwrap();
        path
    }

    fn request(dir: &Path, name: &str) -> TranscodeRequest {
        TranscodeRequest::new(
            input_file(dir),
            dir.join(name),
            Arc::new(presets::hd720()),
        )
    }

    fn slow_backend() -> MockBackend {
        MockBackend::with_synthetic_tracks(Duration::from_secs(60), 30)
            .with_codec_delay(Duration::from_millis(2))
    }

    fn queue_with(backend: &Arc<MockBackend>, config: ReelConfig) -> TranscodeQueue {
        TranscodeQueue::new(config, backend.clone())
    }

    #[tokio::test]
    async fn test_job_completes_with_progress() {
        let backend = Arc::new(MockBackend::with_synthetic_tracks(Duration::from_secs(1), 30));
        let queue = queue_with(&backend, ReelConfig::for_testing());
        let dir = tempfile::tempdir().unwrap();

        let job = queue.submit(request(dir.path(), "out.reel")).await.unwrap();
        let mut recorder = Recorder::default();
        let outcome = job.wait(&mut recorder).await;

        assert!(outcome.is_completed());
        assert_eq!(recorder.completed, 1);
        assert_eq!(recorder.cancelled + recorder.failed, 0);
        assert_eq!(recorder.progress.last(), Some(&Progress::Fraction(1.0)));

        let stats = queue.statistics().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
        assert_eq!(backend.probe.live(), 0);
    }

    #[tokio::test]
    async fn test_cancel_yields_single_cancelled_outcome() {
        let backend = Arc::new(slow_backend());
        let queue = queue_with(&backend, ReelConfig::for_testing());
        let dir = tempfile::tempdir().unwrap();

        let first = queue.submit(request(dir.path(), "first.reel")).await.unwrap();
        let mut second = queue.submit(request(dir.path(), "second.reel")).await.unwrap();
        second.cancel();
        first.cancel();

        let mut finished = 0;
        while let Some(event) = second.next_event().await {
            if let TranscodeEvent::Finished(outcome) = event {
                assert!(outcome.is_cancelled());
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
        assert!(first.outcome().await.is_cancelled());

        let stats = queue.statistics().await.unwrap();
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.completed, 0);
        assert_eq!(backend.probe.live(), 0);
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let backend = Arc::new(MockBackend::with_synthetic_tracks(Duration::from_secs(1), 30));
        let queue = queue_with(&backend, ReelConfig::for_testing());
        let dir = tempfile::tempdir().unwrap();

        let request = TranscodeRequest::new(
            dir.path().join("missing.reel"),
            dir.path().join("out.reel"),
            Arc::new(presets::hd720()),
        );
        let outcome = queue.submit(request).await.unwrap().outcome().await;
        assert!(matches!(
            outcome,
            TranscodeOutcome::Failed(TranscodeError::Io(_))
        ));
        assert_eq!(queue.statistics().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_only_one_job_runs_at_a_time() {
        let backend = Arc::new(slow_backend());
        let queue = queue_with(&backend, ReelConfig::for_testing());
        let dir = tempfile::tempdir().unwrap();

        let first = queue.submit(request(dir.path(), "first.reel")).await.unwrap();
        let second = queue.submit(request(dir.path(), "second.reel")).await.unwrap();

        for _ in 0..10 {
            let stats = queue.statistics().await.unwrap();
            assert_eq!(stats.running, 1);
            assert_eq!(stats.queued, 1);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        queue.shutdown().await;
        assert!(first.outcome().await.is_cancelled());
        assert!(second.outcome().await.is_cancelled());
        assert_eq!(backend.probe.live(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_submission_waits_for_room() {
        let backend = Arc::new(slow_backend());
        let mut config = ReelConfig::for_testing();
        config.queue.queue_capacity = 1;
        let queue = queue_with(&backend, config);
        let dir = tempfile::tempdir().unwrap();

        let running = queue.submit(request(dir.path(), "a.reel")).await.unwrap();
        let pending = queue.submit(request(dir.path(), "b.reel")).await.unwrap();
        let waiting = tokio::spawn({
            let queue = queue.clone();
            let request = request(dir.path(), "c.reel");
            async move { queue.submit(request).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        let stats = queue.statistics().await.unwrap();
        assert_eq!((stats.running, stats.queued), (1, 2));

        // Cancelling the pending job makes room for the parked submission
        pending.cancel();
        let mut third = waiting.await.unwrap().unwrap();
        assert!(pending.outcome().await.is_cancelled());

        running.cancel();
        assert!(running.outcome().await.is_cancelled());
        match third.next_event().await {
            Some(TranscodeEvent::Progress(_)) => {}
            other => panic!("expected the parked job to run, got {other:?}"),
        }
        third.cancel();
        assert!(third.outcome().await.is_cancelled());

        let stats = queue.statistics().await.unwrap();
        assert_eq!(stats.cancelled, 3);
        assert_eq!((stats.running, stats.queued), (0, 0));
        assert_eq!(backend.probe.live(), 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_submission() {
        let backend = Arc::new(slow_backend());
        let mut config = ReelConfig::for_testing();
        config.queue.queue_capacity = 1;
        let queue = queue_with(&backend, config);
        let dir = tempfile::tempdir().unwrap();

        let running = queue.submit(request(dir.path(), "a.reel")).await.unwrap();
        let pending = queue.submit(request(dir.path(), "b.reel")).await.unwrap();
        let waiting = tokio::spawn({
            let queue = queue.clone();
            let request = request(dir.path(), "c.reel");
            async move { queue.submit(request).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.shutdown().await;
        assert!(matches!(
            waiting.await.unwrap(),
            Err(TranscodeError::QueueShutdown)
        ));
        assert!(running.outcome().await.is_cancelled());
        assert!(pending.outcome().await.is_cancelled());
        assert!(matches!(
            queue.submit(request(dir.path(), "d.reel")).await,
            Err(TranscodeError::QueueShutdown)
        ));
        assert_eq!(backend.probe.live(), 0);
    }
}
