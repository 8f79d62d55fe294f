//! Synthesize, transcode, then remux the result again

use std::sync::Arc;
use std::time::Duration;

use reel_core::config::ReelConfig;
use reel_core::media::MIME_VIDEO_AVC;
use reel_core::negotiate::presets;
use reel_core::{
    Progress, TrackKind, TranscodeEvent, TranscodeOutcome, TranscodeQueue, TranscodeRequest,
};
use reel_sim::{Container, SimBackend, SynthSpec, write_synthetic};

#[tokio::test]
async fn test_transcode_then_remux_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("camera.reel");
    let summary = write_synthetic(&source, &SynthSpec::hd1080(Duration::from_secs(5))).unwrap();
    assert_eq!(summary.video_samples, 150);

    let backend = SimBackend::new();
    let queue = TranscodeQueue::new(ReelConfig::for_testing(), Arc::new(backend.clone()));

    let transcoded = dir.path().join("camera-720p.reel");
    let mut job = queue
        .submit(TranscodeRequest::new(
            &source,
            &transcoded,
            Arc::new(presets::hd720_with_bitrate(4_000_000)),
        ))
        .await
        .unwrap();

    let mut last_progress = None;
    let outcome = loop {
        match job.next_event().await {
            Some(TranscodeEvent::Progress(progress)) => last_progress = Some(progress),
            Some(TranscodeEvent::Finished(outcome)) => break outcome,
            None => panic!("job ended without an outcome"),
        }
    };
    assert!(matches!(outcome, TranscodeOutcome::Completed));
    assert_eq!(last_progress, Some(Progress::Fraction(1.0)));

    let first_pass = Container::read(&transcoded).unwrap();
    assert!(first_pass.is_finalized());
    let video_track = first_pass
        .tracks
        .iter()
        .position(|format| format.kind() == TrackKind::Video)
        .unwrap();
    let video = first_pass.tracks[video_track].video_params().unwrap();
    assert_eq!(first_pass.tracks[video_track].mime, MIME_VIDEO_AVC);
    assert_eq!((video.width, video.height), (1280, 720));
    assert_eq!(video.bitrate, Some(4_000_000));

    // The 720p output is itself a valid input
    let copied = dir.path().join("camera-copy.reel");
    let job = queue
        .submit(TranscodeRequest::new(
            &transcoded,
            &copied,
            Arc::new(presets::remux()),
        ))
        .await
        .unwrap();
    assert!(job.outcome().await.is_completed());

    let second_pass = Container::read(&copied).unwrap();
    assert_eq!(second_pass.samples.len(), first_pass.samples.len());
    assert_eq!(second_pass.track_formats().len(), 2);

    queue.shutdown().await;
    assert_eq!(backend.probe().live(), 0);
}
