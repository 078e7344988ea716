//! Digital input engine, its filter stages, and `embedded-hal` adapters.

pub mod digital_input;
pub mod filter;
pub mod hal;
