//! Centralized configuration for Reel.
//!
//! Pump-loop pacing and job queue limits live here rather than as constants
//! scattered through the engine.

use std::time::Duration;

/// Central configuration for all Reel components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ReelConfig {
    pub engine: EngineConfig,
    pub queue: QueueConfig,
}

/// Pump loop pacing.
///
/// Controls how long codec polls may block, how long the loop yields when
/// no track made progress, and how often progress is reported.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout handed to codec dequeue calls
    pub dequeue_timeout: Duration,
    /// Sleep after an iteration in which no track moved
    pub idle_sleep: Duration,
    /// Report progress every N loop iterations
    pub progress_interval_steps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::ZERO,
            idle_sleep: Duration::from_millis(10),
            progress_interval_steps: 10,
        }
    }
}

/// Job queue limits.
///
/// Only one job ever runs at a time; this bounds how many may wait behind it.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pending jobs held before further submissions wait for room
    pub queue_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

impl ReelConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("REEL_IDLE_SLEEP_MS")
            && let Ok(millis) = value.parse::<u64>()
        {
            config.engine.idle_sleep = Duration::from_millis(millis);
        }

        if let Ok(value) = std::env::var("REEL_DEQUEUE_TIMEOUT_MS")
            && let Ok(millis) = value.parse::<u64>()
        {
            config.engine.dequeue_timeout = Duration::from_millis(millis);
        }

        if let Ok(value) = std::env::var("REEL_PROGRESS_INTERVAL")
            && let Ok(steps) = value.parse::<u32>()
        {
            config.engine.progress_interval_steps = steps.max(1);
        }

        if let Ok(value) = std::env::var("REEL_QUEUE_CAPACITY")
            && let Ok(capacity) = value.parse::<usize>()
        {
            config.queue.queue_capacity = capacity.max(1);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            engine: EngineConfig {
                dequeue_timeout: Duration::ZERO,
                idle_sleep: Duration::from_millis(1),
                progress_interval_steps: 1,
            },
            queue: QueueConfig::default(),
        }
    }
}
