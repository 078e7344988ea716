//! Port traits: the boundary between the engines and raw hardware.
//!
//! ```text
//!   Raw device ──▶ Port trait ──▶ Engine ──▶ application listeners
//!   Engine     ──▶ OutputTarget ──▶ PWM / servo / LED
//! ```
//!
//! Provider crates implement these traits for a concrete platform; the
//! engines consume them as trait objects, so the core never touches
//! registers or bus framing directly.

use crate::error::{DeviceError, Error};
use crate::events::RawEdge;

/// Callback installed on a raw digital pin.
pub type RawEdgeListener = Box<dyn Fn(RawEdge) + Send + Sync>;

/// Callback installed on a raw analog channel that pushes samples.
pub type RawSampleListener = Box<dyn Fn(f32) + Send + Sync>;

// ───────────────────────────────────────────────────────────────
// Digital input (driven adapter: hardware → engine)
// ───────────────────────────────────────────────────────────────

/// A raw, polarity-agnostic digital input pin.
pub trait RawDigitalInput: Send + Sync {
    fn gpio(&self) -> u32;

    /// Current electrical level.
    fn value(&self) -> Result<bool, DeviceError>;

    /// `false` if the platform cannot deliver edge notifications; the
    /// engine then polls [`value`](Self::value) instead.
    fn generates_events(&self) -> bool {
        true
    }

    /// Install the edge callback, replacing any previous one.
    fn set_listener(&self, listener: RawEdgeListener) -> Result<(), DeviceError>;

    fn remove_listener(&self);

    fn close(&self);
}

// ───────────────────────────────────────────────────────────────
// Analog input (driven adapter: hardware → engine)
// ───────────────────────────────────────────────────────────────

/// A raw analog channel returning normalised readings.
pub trait RawAnalogInput: Send + Sync {
    fn gpio(&self) -> u32;

    /// Unscaled reading, nominally -1..1.
    fn value(&self) -> Result<f32, DeviceError>;

    /// `true` if the channel can push samples through
    /// [`set_listener`](Self::set_listener).
    fn generates_events(&self) -> bool {
        false
    }

    fn set_listener(&self, _listener: RawSampleListener) -> Result<(), DeviceError> {
        Err(DeviceError::ListenerUnsupported)
    }

    fn remove_listener(&self) {}

    fn close(&self);
}

// ───────────────────────────────────────────────────────────────
// Output target (driven adapter: engine → hardware)
// ───────────────────────────────────────────────────────────────

/// Anything the animation engine can drive with a scalar per frame.
pub trait OutputTarget: Send {
    fn set_value(&mut self, value: f32) -> Result<(), Error>;
}

impl<F> OutputTarget for F
where
    F: FnMut(f32) + Send,
{
    fn set_value(&mut self, value: f32) -> Result<(), Error> {
        self(value);
        Ok(())
    }
}
