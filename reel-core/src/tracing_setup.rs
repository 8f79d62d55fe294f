//! Logging for the reel binary
//!
//! The console shows what the user asked to see. Every run also leaves a
//! trace-level log behind, so a transcode that failed deep inside a codec
//! can be inspected without rerunning it.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run trace log inside the logs directory.
pub const LOG_FILE_NAME: &str = "reel-last-run.log";

const DEFAULT_LOGS_DIR: &str = "logs";

/// Installs the global subscriber and returns the path of the run log.
///
/// `RUST_LOG`, when set, replaces `verbosity` for the console. The run log
/// always records everything and is truncated at the start of each run.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - Log file could not be created or a
///   subscriber is already installed
pub fn init_tracing(
    verbosity: Verbosity,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let logs_dir = logs_dir.unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR));
    create_dir_all(logs_dir)?;
    let run_log = logs_dir.join(LOG_FILE_NAME);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::from(verbosity).to_string()));
    let console = fmt::layer().with_target(false).with_filter(console_filter);

    // Pump loops run on blocking worker threads; thread names tell jobs apart
    let run_log_file = File::create(&run_log)?;
    let run_log_layer = fmt::layer()
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(run_log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console)
        .with(run_log_layer)
        .try_init()?;

    tracing::info!("Logging at {verbosity:?}, run log at {}", run_log.display());
    Ok(run_log)
}

/// How much of a transcode the console reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Verbosity {
    /// Failed jobs
    Error,
    /// Also rejected inputs and cancellations
    Warn,
    /// Also job start, completion and negotiated formats
    Info,
    /// Also track state changes and muxer start
    Debug,
    /// Every buffer moved through the pipeline
    Trace,
}

impl From<Verbosity> for Level {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Error => Level::ERROR,
            Verbosity::Warn => Level::WARN,
            Verbosity::Info => Level::INFO,
            Verbosity::Debug => Level::DEBUG,
            Verbosity::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_verbosity_names_match_levels() {
        for verbosity in Verbosity::value_variants() {
            let name = verbosity.to_possible_value().unwrap();
            let level = Level::from(*verbosity);
            assert!(name.get_name().eq_ignore_ascii_case(level.as_str()));
        }
        assert_eq!(
            Verbosity::from_str("DEBUG", true),
            Ok(Verbosity::Debug)
        );
        assert!(Verbosity::from_str("verbose", true).is_err());
    }

    #[test]
    fn test_init_creates_run_log() {
        let dir = tempfile::tempdir().unwrap();
        // Another test may already own the global subscriber
        let _ = init_tracing(Verbosity::Warn, Some(dir.path()));
        assert!(dir.path().join(LOG_FILE_NAME).exists());
    }
}
