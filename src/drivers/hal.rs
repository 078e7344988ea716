//! `embedded-hal` 1.0 adapters.
//!
//! | Adapter             | Wraps                 | Implements          |
//! |---------------------|-----------------------|---------------------|
//! | `PolledInputPin`    | `digital::InputPin`   | `RawDigitalInput`   |
//! | `DutyCycleTarget`   | `pwm::SetDutyCycle`   | `OutputTarget`      |
//!
//! `embedded-hal` has no edge-notification trait, so a wrapped input pin
//! reports that it cannot generate events and the digital input engine
//! polls it.

use std::sync::Mutex;

use embedded_hal::digital::InputPin;
use embedded_hal::pwm::SetDutyCycle;
use log::debug;

use crate::error::{ConfigError, DeviceError, Error};
use crate::ports::{OutputTarget, RawDigitalInput, RawEdgeListener};
use crate::scheduler::lock;

// ── Input ─────────────────────────────────────────────────────

pub struct PolledInputPin<P> {
    gpio: u32,
    pin: Mutex<P>,
}

impl<P: InputPin> PolledInputPin<P> {
    pub fn new(gpio: u32, pin: P) -> Self {
        Self {
            gpio,
            pin: Mutex::new(pin),
        }
    }

    pub fn into_inner(self) -> P {
        self.pin
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<P: InputPin + Send> RawDigitalInput for PolledInputPin<P> {
    fn gpio(&self) -> u32 {
        self.gpio
    }

    fn value(&self) -> Result<bool, DeviceError> {
        lock(&self.pin)
            .is_high()
            .map_err(|_| DeviceError::ReadFailed)
    }

    fn generates_events(&self) -> bool {
        false
    }

    fn set_listener(&self, _listener: RawEdgeListener) -> Result<(), DeviceError> {
        Err(DeviceError::ListenerUnsupported)
    }

    fn remove_listener(&self) {}

    fn close(&self) {
        debug!("PolledInputPin({}): closed", self.gpio);
    }
}

// ── Output ────────────────────────────────────────────────────

/// Drives a PWM channel from `0.0..=1.0`.
pub struct DutyCycleTarget<P> {
    pwm: P,
}

impl<P: SetDutyCycle> DutyCycleTarget<P> {
    pub fn new(pwm: P) -> Self {
        Self { pwm }
    }

    pub fn into_inner(self) -> P {
        self.pwm
    }
}

impl<P: SetDutyCycle + Send> OutputTarget for DutyCycleTarget<P> {
    fn set_value(&mut self, value: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::ValueOutOfRange {
                value,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        let max = self.pwm.max_duty_cycle();
        let duty = (value * f32::from(max)).round() as u16;
        self.pwm
            .set_duty_cycle(duty.min(max))
            .map_err(|_| DeviceError::WriteFailed.into())
    }
}
