//! Job queue over real engine runs

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reel_core::config::ReelConfig;
use reel_core::negotiate::presets;
use reel_core::{
    TranscodeError, TranscodeEvent, TranscodeOutcome, TranscodeQueue, TranscodeRequest,
};
use reel_sim::{Container, SimBackend, SynthSpec};

use crate::support::{assert_unfinalized, synth_input};

fn queue(backend: &SimBackend) -> TranscodeQueue {
    TranscodeQueue::new(ReelConfig::for_testing(), Arc::new(backend.clone()))
}

fn hd720_request(input: &Path, output: &Path) -> TranscodeRequest {
    TranscodeRequest::new(input, output, Arc::new(presets::hd720()))
}

#[tokio::test]
async fn test_jobs_complete_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)),
    );
    let backend = SimBackend::new();
    let queue = queue(&backend);

    let first = queue
        .submit(hd720_request(&input, &dir.path().join("first.reel")))
        .await
        .unwrap();
    let second = queue
        .submit(TranscodeRequest::new(
            &input,
            dir.path().join("second.reel"),
            Arc::new(presets::remux()),
        ))
        .await
        .unwrap();
    assert_ne!(first.id(), second.id());

    assert!(first.outcome().await.is_completed());
    assert!(second.outcome().await.is_completed());

    let stats = queue.statistics().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!((stats.queued, stats.running), (0, 0));
    assert_eq!(backend.probe().live(), 0);

    for name in ["first.reel", "second.reel"] {
        assert!(Container::read(&dir.path().join(name)).unwrap().is_finalized());
    }
    queue.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_job_reports_once() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "long.reel",
        &SynthSpec::hd1080(Duration::from_secs(60)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();
    let queue = queue(&backend);

    let mut job = queue.submit(hd720_request(&input, &output)).await.unwrap();
    let mut finished = Vec::new();
    let mut cancel_sent = false;
    while let Some(event) = job.next_event().await {
        match event {
            TranscodeEvent::Progress(_) => {
                if !cancel_sent {
                    job.cancel();
                    cancel_sent = true;
                }
            }
            TranscodeEvent::Finished(outcome) => {
                finished.push(outcome);
                break;
            }
        }
    }

    assert_eq!(finished.len(), 1);
    assert!(finished[0].is_cancelled());
    assert_eq!(backend.probe().live(), 0);
    assert_unfinalized(&output);

    let stats = queue.statistics().await.unwrap();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.completed, 0);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_pending_job_cancelled_before_it_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(3)),
    );
    let backend = SimBackend::new();
    let queue = queue(&backend);

    let running = queue
        .submit(hd720_request(&input, &dir.path().join("running.reel")))
        .await
        .unwrap();
    let pending = queue
        .submit(hd720_request(&input, &dir.path().join("pending.reel")))
        .await
        .unwrap();
    pending.cancel();

    assert!(pending.outcome().await.is_cancelled());
    assert!(running.outcome().await.is_completed());
    assert_eq!(backend.probe().live(), 0);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_rejected_input_fails_job_and_queue_continues() {
    let dir = tempfile::tempdir().unwrap();
    let vga = synth_input(
        dir.path(),
        "vga.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)).with_frame_size(640, 480),
    );
    let hd = synth_input(
        dir.path(),
        "hd.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)),
    );
    let backend = SimBackend::new();
    let queue = queue(&backend);

    let rejected = queue
        .submit(hd720_request(&vga, &dir.path().join("vga-out.reel")))
        .await
        .unwrap();
    let accepted = queue
        .submit(hd720_request(&hd, &dir.path().join("hd-out.reel")))
        .await
        .unwrap();

    match rejected.outcome().await {
        TranscodeOutcome::Failed(error) => assert!(matches!(
            error,
            TranscodeError::UnsupportedAspectRatio { .. }
        )),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(accepted.outcome().await.is_completed());

    let stats = queue.statistics().await.unwrap();
    assert_eq!((stats.completed, stats.failed), (1, 1));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_submit_after_shutdown_rejected() {
    let backend = SimBackend::new();
    let queue = queue(&backend);
    queue.shutdown().await;

    let dir = tempfile::tempdir().unwrap();
    let result = queue
        .submit(hd720_request(
            &dir.path().join("in.reel"),
            &dir.path().join("out.reel"),
        ))
        .await;
    assert!(matches!(result, Err(TranscodeError::QueueShutdown)));
}
