//! Unified error types for the device core.
//!
//! A single `Error` enum that every engine converts into, so callers get one
//! error surface no matter which engine they talk to.  The sub-enums are
//! `Copy` and carry only plain data, which keeps them cheap to hand across
//! scheduler threads and to log from inside scheduled tasks.
//!
//! There is no timeout variant: a timed-out wait is reported as `Ok(false)`
//! by the waiting operation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible public operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// Construction or configuration parameters are invalid.
    Config(ConfigError),
    /// The raw collaborator device failed.
    Device(DeviceError),
    /// The engine has already been closed.
    AlreadyClosed,
    /// The scheduler refused the task.
    Scheduler(SchedulerError),
    /// `play()` was called with nothing queued.
    NothingToPlay,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Device(e) => write!(f, "device: {e}"),
            Self::AlreadyClosed => write!(f, "device already closed"),
            Self::Scheduler(e) => write!(f, "scheduler: {e}"),
            Self::NothingToPlay => write!(f, "animation queue is empty"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// A segment needs at least a start and an end cue point.
    TooFewCuePoints { count: usize },
    /// Cue points must be strictly increasing.
    CuePointsNotIncreasing { index: usize },
    /// Cue points live in `0.0..=1.0`.
    CuePointOutOfRange { index: usize, value: f32 },
    /// One key-frame row is required per cue point.
    KeyFrameCountMismatch { cue_points: usize, key_frames: usize },
    /// Each key-frame row needs one entry per animation target.
    TargetCountMismatch { expected: usize, actual: usize },
    /// Segment duration must be non-zero.
    ZeroDuration,
    /// An animation instance needs at least one segment.
    NoSegments,
    /// An animation needs at least one output target.
    NoTargets,
    /// Frames per second must be positive.
    InvalidFps,
    /// Playback speed must be positive and finite.
    InvalidSpeed,
    /// Smoothing threshold outside `1..=capacity`.
    InvalidThreshold { threshold: usize, capacity: usize },
    /// A percentage threshold must be finite and non-negative.
    InvalidPercentChange,
    /// An analog range must be finite.
    InvalidRange,
    /// Baking would produce more frames than the player accepts.
    TooManyFrames { frames: u64, max: u64 },
    /// A period or interval that must be non-zero was zero.
    ZeroInterval(&'static str),
    /// The scheduler needs at least one worker thread.
    NoWorkers,
    /// A value written to an output was outside the device's range.
    ValueOutOfRange { value: f32, min: f32, max: f32 },
    /// Unknown easing function name.
    UnknownEasing,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewCuePoints { count } => {
                write!(f, "segment needs at least 2 cue points, got {count}")
            }
            Self::CuePointsNotIncreasing { index } => {
                write!(f, "cue point {index} does not increase")
            }
            Self::CuePointOutOfRange { index, value } => {
                write!(f, "cue point {index} ({value}) outside 0..=1")
            }
            Self::KeyFrameCountMismatch {
                cue_points,
                key_frames,
            } => write!(
                f,
                "cue points length ({cue_points}) must equal key frames length ({key_frames})"
            ),
            Self::TargetCountMismatch { expected, actual } => write!(
                f,
                "key frame row has {actual} entries, animation has {expected} targets"
            ),
            Self::ZeroDuration => write!(f, "segment duration is zero"),
            Self::NoSegments => write!(f, "animation instance has no segments"),
            Self::NoTargets => write!(f, "animation has no output targets"),
            Self::InvalidFps => write!(f, "fps must be positive"),
            Self::InvalidSpeed => write!(f, "speed must be positive and finite"),
            Self::InvalidThreshold {
                threshold,
                capacity,
            } => write!(f, "threshold {threshold} outside 1..={capacity}"),
            Self::InvalidPercentChange => write!(f, "percent change must be >= 0"),
            Self::InvalidRange => write!(f, "range must be finite"),
            Self::TooManyFrames { frames, max } => {
                write!(f, "animation needs {frames} frames, limit is {max}")
            }
            Self::ZeroInterval(what) => write!(f, "{what} must be non-zero"),
            Self::NoWorkers => write!(f, "scheduler needs at least one worker thread"),
            Self::ValueOutOfRange { value, min, max } => {
                write!(f, "value {value} outside {min}..={max}")
            }
            Self::UnknownEasing => write!(f, "unknown easing function"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Device errors
// ---------------------------------------------------------------------------

/// Failures reported by the raw collaborator devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// Reading the pin or channel failed.
    ReadFailed,
    /// Writing the output failed.
    WriteFailed,
    /// The raw device cannot attach a listener.
    ListenerUnsupported,
    /// The raw device has been closed underneath the engine.
    Closed,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed => write!(f, "read failed"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::ListenerUnsupported => write!(f, "listener not supported"),
            Self::Closed => write!(f, "raw device closed"),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// The pool has been shut down and no longer accepts tasks.
    ShutDown,
    /// A worker thread could not be spawned.
    SpawnFailed,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "scheduler shut down"),
            Self::SpawnFailed => write!(f, "worker thread spawn failed"),
        }
    }
}

impl From<SchedulerError> for Error {
    fn from(e: SchedulerError) -> Self {
        Self::Scheduler(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
