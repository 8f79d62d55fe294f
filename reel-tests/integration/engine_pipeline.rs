//! End-to-end pump behavior of the transcoder engine
//!
//! Runs full jobs over synthetic inputs and inspects the output container:
//! scaled and re-encoded video, copied or re-encoded audio, timestamp order
//! and progress reporting.

use std::time::Duration;

use proptest::prelude::*;
use reel_core::media::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use reel_core::negotiate::{AudioSetting, presets};
use reel_core::{Progress, TrackKind};
use reel_sim::{Container, SimBackend, SynthSpec};

use crate::support::{samples_of, synth_input, track_of, transcode};

#[test]
fn test_hd720_preset_scales_and_reencodes_video() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(10)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();
    let strategy = presets::hd720_with_audio(
        8_000_000,
        AudioSetting::from_raw(-1),
        AudioSetting::from_raw(-1),
    );

    transcode(&backend, &input, &output, &strategy).unwrap();
    assert_eq!(backend.probe().live(), 0);

    let container = Container::read(&output).unwrap();
    assert!(container.is_finalized());
    assert_eq!(container.tracks.len(), 2);

    let video_track = track_of(&container, TrackKind::Video).unwrap();
    let video = container.tracks[video_track].video_params().unwrap();
    assert_eq!(container.tracks[video_track].mime, MIME_VIDEO_AVC);
    assert_eq!((video.width, video.height), (1280, 720));
    assert_eq!(video.bitrate, Some(presets::DEFAULT_VIDEO_BITRATE));

    let frames = samples_of(&container, TrackKind::Video);
    assert_eq!(frames.len(), 300);
    let bytes: usize = frames.iter().map(|sample| sample.data.len()).sum();
    let seconds = frames.len() as f64 / f64::from(video.frame_rate);
    let bits_per_second = bytes as f64 * 8.0 / seconds;
    assert!(bits_per_second <= f64::from(presets::DEFAULT_VIDEO_BITRATE));
    assert!(bits_per_second > 7_000_000.0);
    assert!(frames[0].flags.is_key_frame());
}

#[test]
fn test_audio_passes_through_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(3)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();

    transcode(&backend, &input, &output, &presets::hd720()).unwrap();

    let source = Container::read(&input).unwrap();
    let result = Container::read(&output).unwrap();
    let expected = samples_of(&source, TrackKind::Audio);
    let actual = samples_of(&result, TrackKind::Audio);
    assert_eq!(expected.len(), actual.len());
    for (expected, actual) in expected.iter().zip(&actual) {
        assert_eq!(expected.pts_us, actual.pts_us);
        assert_eq!(expected.data, actual.data);
    }

    let audio_track = track_of(&result, TrackKind::Audio).unwrap();
    let audio = result.tracks[audio_track].audio_params().unwrap();
    assert_eq!(result.tracks[audio_track].mime, MIME_AUDIO_AAC);
    assert_eq!((audio.sample_rate, audio.channel_count), (44_100, 2));
}

#[test]
fn test_portrait_input_keeps_orientation() {
    let dir = tempfile::tempdir().unwrap();
    let spec = SynthSpec::hd1080(Duration::from_secs(2)).with_frame_size(1080, 1920);
    let input = synth_input(dir.path(), "portrait.reel", &spec);
    let output = dir.path().join("out.reel");

    transcode(&SimBackend::new(), &input, &output, &presets::hd720()).unwrap();

    let container = Container::read(&output).unwrap();
    let track = track_of(&container, TrackKind::Video).unwrap();
    let video = container.tracks[track].video_params().unwrap();
    assert_eq!((video.width, video.height), (720, 1280));
}

#[test]
fn test_per_track_timestamps_never_go_back() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(4)).with_seed(42),
    );
    let output = dir.path().join("out.reel");

    transcode(&SimBackend::new(), &input, &output, &presets::hd720()).unwrap();

    let container = Container::read(&output).unwrap();
    for kind in [TrackKind::Video, TrackKind::Audio] {
        let samples = samples_of(&container, kind);
        assert!(!samples.is_empty());
        for pair in samples.windows(2) {
            assert!(
                pair[0].pts_us <= pair[1].pts_us,
                "{kind} went back from {} to {}",
                pair[0].pts_us,
                pair[1].pts_us
            );
        }
    }
}

#[test]
fn test_remux_copies_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(2)),
    );
    let output = dir.path().join("copy.reel");
    let backend = SimBackend::new();

    transcode(&backend, &input, &output, &presets::remux()).unwrap();
    assert_eq!(backend.probe().live(), 0);

    let source = Container::read(&input).unwrap();
    let copy = Container::read(&output).unwrap();
    assert!(copy.is_finalized());
    for kind in [TrackKind::Video, TrackKind::Audio] {
        let expected: Vec<_> = samples_of(&source, kind)
            .iter()
            .map(|sample| (sample.pts_us, sample.data.clone()))
            .collect();
        let actual: Vec<_> = samples_of(&copy, kind)
            .iter()
            .map(|sample| (sample.pts_us, sample.data.clone()))
            .collect();
        assert_eq!(expected, actual);
    }

    let track = track_of(&copy, TrackKind::Video).unwrap();
    assert_eq!(copy.tracks[track].video_params().unwrap().width, 1920);
}

#[test]
fn test_audio_reencode_when_both_settings_given() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(2)),
    );
    let output = dir.path().join("out.reel");
    let backend = SimBackend::new();
    let strategy = presets::hd720_with_audio(
        presets::DEFAULT_VIDEO_BITRATE,
        AudioSetting::Value(96_000),
        AudioSetting::Value(2),
    );

    transcode(&backend, &input, &output, &strategy).unwrap();
    assert_eq!(backend.probe().live(), 0);

    let source = Container::read(&input).unwrap();
    let result = Container::read(&output).unwrap();
    let track = track_of(&result, TrackKind::Audio).unwrap();
    let audio = result.tracks[track].audio_params().unwrap();
    assert_eq!(result.tracks[track].mime, MIME_AUDIO_AAC);
    assert_eq!(audio.bitrate, Some(96_000));
    assert_eq!(audio.channel_count, 2);

    let before = samples_of(&source, TrackKind::Audio);
    let after = samples_of(&result, TrackKind::Audio);
    assert_eq!(before.len(), after.len());
    assert_ne!(before[0].data, after[0].data);
}

#[test]
fn test_single_track_inputs() {
    let dir = tempfile::tempdir().unwrap();

    let video_only = synth_input(
        dir.path(),
        "video.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)).with_audio(None),
    );
    let output = dir.path().join("video-out.reel");
    transcode(&SimBackend::new(), &video_only, &output, &presets::hd720()).unwrap();
    let container = Container::read(&output).unwrap();
    assert_eq!(container.tracks.len(), 1);
    assert_eq!(container.tracks[0].kind(), TrackKind::Video);
    assert_eq!(container.samples.len(), 30);

    let audio_only = synth_input(
        dir.path(),
        "audio.reel",
        &SynthSpec::hd1080(Duration::from_secs(1)).with_video(None),
    );
    let output = dir.path().join("audio-out.reel");
    transcode(&SimBackend::new(), &audio_only, &output, &presets::hd720()).unwrap();
    let container = Container::read(&output).unwrap();
    assert_eq!(container.tracks.len(), 1);
    assert_eq!(container.tracks[0].kind(), TrackKind::Audio);
    assert!(container.is_finalized());
}

#[test]
fn test_progress_is_monotonic_and_ends_complete() {
    let dir = tempfile::tempdir().unwrap();
    let input = synth_input(
        dir.path(),
        "in.reel",
        &SynthSpec::hd1080(Duration::from_secs(3)),
    );
    let output = dir.path().join("out.reel");

    let progress = transcode(&SimBackend::new(), &input, &output, &presets::hd720()).unwrap();

    assert!(progress.len() > 1);
    assert_eq!(progress.last(), Some(&Progress::Fraction(1.0)));
    let fractions: Vec<f64> = progress
        .iter()
        .map(|update| match update {
            Progress::Fraction(value) => *value,
            Progress::Indeterminate => panic!("durations are known"),
        })
        .collect();
    for pair in fractions.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
    assert!(fractions.iter().all(|value| (0.0..=1.0).contains(value)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn reencoded_output_keeps_every_frame(millis in 100u64..1_500, seed in any::<u64>()) {
        let dir = tempfile::tempdir().unwrap();
        let spec = SynthSpec::hd1080(Duration::from_millis(millis)).with_seed(seed);
        let input = synth_input(dir.path(), "in.reel", &spec);
        let output = dir.path().join("out.reel");
        let backend = SimBackend::new();

        transcode(&backend, &input, &output, &presets::hd720()).unwrap();

        let source = Container::read(&input).unwrap();
        let result = Container::read(&output).unwrap();
        prop_assert!(result.is_finalized());
        for kind in [TrackKind::Video, TrackKind::Audio] {
            prop_assert_eq!(
                samples_of(&source, kind).len(),
                samples_of(&result, kind).len()
            );
        }
        prop_assert_eq!(backend.probe().live(), 0);
    }
}
