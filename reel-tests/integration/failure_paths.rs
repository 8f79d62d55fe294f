//! Rejections, codec failures and cancellation
//!
//! Whatever ends a job early, every demuxer, codec and muxer handle must be
//! released exactly once and the output must not look finalized.

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use reel_core::config::ReelConfig;
use reel_core::media::{MIME_VIDEO_AVC, MIME_VIDEO_RAW};
use reel_core::negotiate::{AudioSetting, presets};
use reel_core::{Progress, TrackKind, TranscodeError, TranscoderEngine};
use reel_sim::{ContainerWriter, HandleKind, SimBackend, SynthSpec};

use crate::support::{assert_unfinalized, synth_input, transcode};

#[test]
fn test_four_by_three_input_rejected_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let spec = SynthSpec::hd1080(Duration::from_secs(1)).with_frame_size(640, 480);
    let input = synth_input(dir.path(), "vga.reel", &spec);
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();

    let error = transcode(&backend, &input, &output, &presets::hd720()).unwrap_err();
    assert!(matches!(
        error,
        TranscodeError::UnsupportedAspectRatio {
            width: 640,
            height: 480,
            ..
        }
    ));
    assert!(error.is_input_rejection());
    assert!(!output.exists());
    assert_eq!(backend.probe().live(), 0);
    assert_eq!(backend.probe().opened(), 1);
}

#[test]
fn test_channel_change_rejected_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();
    let strategy = presets::hd720_with_audio(
        presets::DEFAULT_VIDEO_BITRATE,
        AudioSetting::Value(64_000),
        AudioSetting::Value(1),
    );

    let error = transcode(&backend, &input, &output, &strategy).unwrap_err();
    assert!(matches!(
        error,
        TranscodeError::UnsupportedAudioConversion { .. }
    ));
    assert!(!output.exists());
    assert_eq!(backend.probe().live(), 0);
}

#[test]
fn test_input_without_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.reel");
    ContainerWriter::new(File::create(&input).unwrap(), &[])
        .unwrap()
        .finish()
        .unwrap();
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();

    let error = transcode(&backend, &input, &output, &presets::hd720()).unwrap_err();
    assert!(matches!(error, TranscodeError::NoTracksFound));
    assert!(!output.exists());
    assert_eq!(backend.probe().live(), 0);
}

#[test]
fn test_foreign_input_is_a_codec_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.txt");
    std::fs::write(&input, "not a media file").unwrap();
    let backend = SimBackend::new();

    let error = transcode(&backend, &input, &dir.path().join("out.reel"), &presets::hd720())
        .unwrap_err();
    assert!(matches!(error, TranscodeError::Codec(_)));
    assert_eq!(backend.probe().live(), 0);
}

#[test]
fn test_missing_codec_reported_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)),
    );
    let backend = SimBackend::new().with_unavailable_codec(MIME_VIDEO_AVC);

    let error = transcode(&backend, &input, &dir.path().join("out.reel"), &presets::hd720())
        .unwrap_err();
    assert!(matches!(
        error,
        TranscodeError::CodecUnavailable { ref mime, .. } if mime == MIME_VIDEO_AVC
    ));
    assert_eq!(backend.probe().live(), 0);
}

#[test]
fn test_encoder_announcing_wrong_format_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)),
    );
    let backend = SimBackend::new().with_encoder_mime(MIME_VIDEO_RAW);

    let error = transcode(&backend, &input, &dir.path().join("out.reel"), &presets::hd720())
        .unwrap_err();
    assert!(matches!(
        error,
        TranscodeError::InvalidOutputFormat {
            kind: TrackKind::Video,
            ..
        }
    ));
    assert_eq!(backend.probe().live(), 0);
}

#[test]
fn test_encoder_failure_mid_stream_aborts_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(2)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new().with_failing_encoder(10);

    let error = transcode(&backend, &input, &output, &presets::hd720()).unwrap_err();
    assert!(matches!(error, TranscodeError::Codec(_)));
    assert!(!error.is_input_rejection());
    assert_eq!(backend.probe().live(), 0);
    assert_eq!(backend.probe().live_of(HandleKind::Codec), 0);
    assert_unfinalized(&output);
}

#[test]
fn test_decoder_failure_mid_stream_aborts_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(2)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new().with_failing_decoder(5);

    let error = transcode(&backend, &input, &output, &presets::hd720()).unwrap_err();
    assert!(matches!(error, TranscodeError::Codec(_)));
    assert_eq!(backend.probe().live(), 0);
    assert_unfinalized(&output);
}

#[test]
fn test_cancel_after_first_progress() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "long.reel",
        &SynthSpec::hd1080(Duration::from_secs(20)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();

    let engine = TranscoderEngine::open(
        Arc::new(backend.clone()),
        File::open(&input).unwrap(),
        &output,
        &presets::hd720(),
        ReelConfig::for_testing().engine,
    )
    .unwrap();
    let flag = engine.cancellation_flag();
    let mut updates = Vec::new();
    let result = engine.run(&mut |progress: Progress| {
        updates.push(progress);
        flag.cancel();
    });

    assert!(matches!(result, Err(TranscodeError::Cancelled)));
    assert_eq!(updates.len(), 1);
    assert_ne!(updates[0], Progress::Fraction(1.0));
    assert_eq!(backend.probe().live(), 0);
    assert_unfinalized(&output);
}

#[test]
fn test_dropping_unrun_engine_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)),
    );
    let backend = SimBackend::new();

    let engine = TranscoderEngine::open(
        Arc::new(backend.clone()),
        File::open(&input).unwrap(),
        &dir.path().join("out.reel"),
        &presets::hd720(),
        ReelConfig::for_testing().engine,
    )
    .unwrap();
    assert_eq!(engine.track_kinds(), vec![TrackKind::Video, TrackKind::Audio]);
    assert!(backend.probe().live() > 0);

    drop(engine);
    assert_eq!(backend.probe().live(), 0);
}
