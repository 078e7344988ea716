//! Engine configuration parameters
//!
//! All tunable parameters for the scheduler and the three engines.
//! Every struct deserialises with `#[serde(default)]`, so a JSON document
//! only needs to name the fields it overrides.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::animation::easing::Easing;
use crate::error::ConfigError;

/// Capacity of the smoothing timestamp window.
pub const SMOOTHING_QUEUE_CAP: usize = 64;

/// Upper bound on the frames one animation instance may bake to
/// (about 4.8 h at 60 fps).
pub const MAX_BAKED_FRAMES: u64 = 1 << 20;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Whether the pool's threads should keep the process alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PoolKind {
    /// Threads are detached when the last scheduler handle goes away.
    #[default]
    Daemon,
    /// Dropping the last handle drains the queue and joins every thread.
    NonDaemon,
}

impl PoolKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Daemon => "daemon",
            Self::NonDaemon => "non-daemon",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Thread name prefix.
    pub name: String,
    /// Number of worker threads executing task bodies.
    pub worker_threads: usize,
    pub pool: PoolKind,
    /// How long `shutdown()` waits for in-flight work to drain.
    pub shutdown_grace_ms: u64,
    /// Stack size for worker and timer threads.
    pub thread_stack_kb: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "diozero".into(),
            worker_threads: 4,
            pool: PoolKind::Daemon,
            shutdown_grace_ms: 1000,
            thread_stack_kb: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.thread_stack_kb == 0 {
            return Err(ConfigError::ZeroInterval("thread_stack_kb"));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Digital input
// ---------------------------------------------------------------------------

/// Pull resistor configuration of the input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

/// Count-over-time smoothing of "active" events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Active events needed inside the window to report "activated".
    pub threshold: usize,
    /// Events older than this are purged.
    pub event_age_ms: u64,
    /// How often the window is purged and re-evaluated.
    pub poll_period_ms: u64,
}

impl SmoothingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 || self.threshold > SMOOTHING_QUEUE_CAP {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.threshold,
                capacity: SMOOTHING_QUEUE_CAP,
            });
        }
        if self.event_age_ms == 0 {
            return Err(ConfigError::ZeroInterval("event_age_ms"));
        }
        if self.poll_period_ms == 0 {
            return Err(ConfigError::ZeroInterval("poll_period_ms"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitalInputConfig {
    pub pull: Pull,
    /// Explicit polarity.  `None` derives it from `pull`.
    pub active_high: Option<bool>,
    /// Debounce window; `None` disables debouncing.
    pub debounce_ms: Option<u64>,
    pub smoothing: Option<SmoothingConfig>,
    /// Poll period used when the raw pin cannot push edges.
    pub poll_interval_ms: u64,
}

impl Default for DigitalInputConfig {
    fn default() -> Self {
        Self {
            pull: Pull::None,
            active_high: None,
            debounce_ms: None,
            smoothing: None,
            poll_interval_ms: 10,
        }
    }
}

impl DigitalInputConfig {
    /// A pulled-up input idles high, so it is active when low.
    pub fn active_high(&self) -> bool {
        self.active_high.unwrap_or(self.pull != Pull::Up)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == Some(0) {
            return Err(ConfigError::ZeroInterval("debounce_ms"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("poll_interval_ms"));
        }
        if let Some(smoothing) = &self.smoothing {
            smoothing.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Analog input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogInputConfig {
    /// Scale factor applied to unscaled readings; fixed after construction.
    pub range: f32,
    /// Fractional change that counts as a new value (0 = any change).
    pub percent_change: f32,
    pub poll_interval_ms: u64,
}

impl Default for AnalogInputConfig {
    fn default() -> Self {
        Self {
            range: 1.0,
            percent_change: 0.0,
            poll_interval_ms: 50,
        }
    }
}

impl AnalogInputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.range.is_finite() {
            return Err(ConfigError::InvalidRange);
        }
        if !self.percent_change.is_finite() || self.percent_change < 0.0 {
            return Err(ConfigError::InvalidPercentChange);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("poll_interval_ms"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub fps: u32,
    /// Playback speed multiplier; scales the tick period only.
    pub speed: f32,
    pub looping: bool,
    /// Default easing for key frames without their own.
    pub easing: Easing,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            speed: 1.0,
            looping: false,
            easing: Easing::Linear,
        }
    }
}

impl AnimationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::InvalidFps);
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ConfigError::InvalidSpeed);
        }
        Ok(())
    }

    /// Nominal frame period in whole milliseconds, used to bake frames.
    pub fn frame_period_ms(&self) -> u32 {
        (1000 / self.fps.max(1)).max(1)
    }

    /// Wall-clock tick period after applying `speed`.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.frame_period_ms()) / 1000.0 / f64::from(self.speed))
    }
}
