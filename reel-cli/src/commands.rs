//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Subcommand, ValueEnum};
use reel_core::config::ReelConfig;
use reel_core::negotiate::presets;
use reel_core::negotiate::{AudioSetting, FormatStrategy};
use reel_core::queue::{JobHandle, TranscodeEvent, TranscodeQueue, TranscodeRequest};
use reel_core::{Progress, TranscodeOutcome};
use reel_sim::{Container, SimBackend, SynthSpec, write_synthetic};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Write a synthetic input file
    Synth {
        /// Output path
        output: PathBuf,
        /// Length in seconds
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
        /// Video frame size as WIDTHxHEIGHT
        #[arg(long, default_value = "1920x1080", value_parser = parse_frame_size)]
        size: (u32, u32),
        /// Leave out the video track
        #[arg(long)]
        no_video: bool,
        /// Leave out the audio track
        #[arg(long)]
        no_audio: bool,
        /// Seed for payload content
        #[arg(long, default_value_t = 0x5EED)]
        seed: u64,
    },
    /// Print the tracks of a reel container
    Probe {
        input: PathBuf,
        /// Print track formats as JSON
        #[arg(long)]
        json: bool,
    },
    /// Transcode one file
    Transcode {
        input: PathBuf,
        output: PathBuf,
        /// Output profile
        #[arg(short, long, value_enum, default_value_t = Preset::Hd720)]
        preset: Preset,
        /// Video bitrate in bits per second (hd720 only)
        #[arg(long)]
        video_bitrate: Option<u32>,
        /// Re-encode audio at this bitrate (needs --audio-channels)
        #[arg(long)]
        audio_bitrate: Option<u32>,
        /// Re-encode audio with this many channels (needs --audio-bitrate)
        #[arg(long)]
        audio_channels: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// 16:9 1280x720 AVC
    Hd720,
    /// Copy every track unchanged
    Remux,
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Synth {
            output,
            seconds,
            size,
            no_video,
            no_audio,
            seed,
        } => {
            let mut spec = SynthSpec::hd1080(Duration::from_secs(seconds))
                .with_frame_size(size.0, size.1)
                .with_seed(seed);
            if no_video {
                spec = spec.with_video(None);
            }
            if no_audio {
                spec = spec.with_audio(None);
            }
            synth(&output, &spec)
        }
        Commands::Probe { input, json } => probe(&input, json),
        Commands::Transcode {
            input,
            output,
            preset,
            video_bitrate,
            audio_bitrate,
            audio_channels,
        } => {
            let strategy = build_strategy(preset, video_bitrate, audio_bitrate, audio_channels)?;
            transcode(input, output, strategy).await
        }
    }
}

fn parse_frame_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = width.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height: u32 = height.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if width == 0 || height == 0 {
        return Err("frame size must be non-zero".to_string());
    }
    Ok((width, height))
}

fn build_strategy(
    preset: Preset,
    video_bitrate: Option<u32>,
    audio_bitrate: Option<u32>,
    audio_channels: Option<u32>,
) -> anyhow::Result<Arc<dyn FormatStrategy>> {
    match preset {
        Preset::Remux => {
            if video_bitrate.is_some() || audio_bitrate.is_some() || audio_channels.is_some() {
                bail!("--preset remux copies tracks and takes no encoder settings");
            }
            Ok(Arc::new(presets::remux()))
        }
        Preset::Hd720 => {
            let bitrate = video_bitrate.unwrap_or(presets::DEFAULT_VIDEO_BITRATE);
            let setting = |value: Option<u32>| value.map_or(AudioSetting::AsIs, AudioSetting::Value);
            Ok(Arc::new(presets::hd720_with_audio(
                bitrate,
                setting(audio_bitrate),
                setting(audio_channels),
            )))
        }
    }
}

/// Writes a synthetic input.
///
/// # Errors
/// - Output could not be written
pub fn synth(output: &Path, spec: &SynthSpec) -> anyhow::Result<()> {
    let summary = write_synthetic(output, spec)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Wrote {}: {} video, {} audio samples, {:.2}s",
        output.display(),
        summary.video_samples,
        summary.audio_samples,
        summary.duration_us as f64 / 1_000_000.0
    );
    Ok(())
}

/// Prints track formats and sample counts of a container.
///
/// # Errors
/// - Input is missing or not a reel container
pub fn probe(input: &Path, json: bool) -> anyhow::Result<()> {
    let container =
        Container::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let formats = container.track_formats();

    if json {
        println!("{}", serde_json::to_string_pretty(&formats)?);
        return Ok(());
    }

    println!("{}", input.display());
    println!("{:-<60}", "");
    for (index, format) in formats.iter().enumerate() {
        println!(
            "  #{index} {:<6} {format} ({} samples)",
            format.kind(),
            container.track_samples(index).count()
        );
    }
    match &container.trailer {
        Some(trailer) => println!(
            "  duration {:.2}s, finalized",
            trailer.duration_us as f64 / 1_000_000.0
        ),
        None => println!("  not finalized (writer was interrupted)"),
    }
    Ok(())
}

/// Runs one transcode through the job queue, printing progress.
///
/// Ctrl-C cancels the job; the partial output is left unfinalized.
///
/// # Errors
/// - Job failed or was cancelled
pub async fn transcode(
    input: PathBuf,
    output: PathBuf,
    strategy: Arc<dyn FormatStrategy>,
) -> anyhow::Result<()> {
    let backend = Arc::new(SimBackend::new());
    let queue = TranscodeQueue::new(ReelConfig::from_env(), backend.clone());

    println!("Transcoding {} -> {}", input.display(), output.display());
    let job = queue
        .submit(TranscodeRequest::new(input, output, strategy))
        .await?;
    let outcome = follow_job(job).await;
    queue.shutdown().await;

    let leaked = backend.probe().live();
    if leaked > 0 {
        tracing::warn!("{leaked} media handles were not released");
    }

    match outcome {
        TranscodeOutcome::Completed => {
            println!("Done");
            Ok(())
        }
        TranscodeOutcome::Cancelled => bail!("transcode cancelled"),
        TranscodeOutcome::Failed(e) => bail!("{}", e.user_message()),
    }
}

async fn follow_job(mut job: JobHandle) -> TranscodeOutcome {
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            event = job.next_event() => match event {
                Some(TranscodeEvent::Progress(progress)) => print_progress(progress),
                Some(TranscodeEvent::Finished(outcome)) => return outcome,
                None => return TranscodeOutcome::Failed(reel_core::TranscodeError::QueueShutdown),
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                println!("\nCancelling...");
                cancel_requested = true;
                job.cancel();
            }
        }
    }
}

fn print_progress(progress: Progress) {
    match progress {
        Progress::Indeterminate => println!("  progress: unknown"),
        Progress::Fraction(fraction) => println!("  progress: {:5.1}%", fraction * 100.0),
    }
}
