//! Sensor engines.

pub mod analog_input;
