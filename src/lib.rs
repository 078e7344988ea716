//! diozero device core.
//!
//! The shared engines every input and output device is built on:
//!
//! - [`scheduler`]: worker pool and timer thread running all engine ticks
//! - [`drivers::digital_input`]: debounced / smoothed digital input events
//! - [`sensors::analog_input`]: polled analog input with change detection
//! - [`animation`]: key-frame animation of one or more output targets
//!
//! Hardware is reached only through the traits in [`ports`]; the
//! [`drivers::hal`] module adapts `embedded-hal` pins to them.

#![deny(unused_must_use)]

pub mod animation;
pub mod config;
pub mod drivers;
pub mod events;
pub mod ports;
pub mod scheduler;
pub mod sensors;

mod error;

pub use error::{ConfigError, DeviceError, Error, Result, SchedulerError};
