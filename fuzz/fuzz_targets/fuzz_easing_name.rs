//! Fuzz target: `Easing::from_str`
//!
//! Any name that parses must print back to a name that parses to the same
//! curve.
//!
//! cargo fuzz run fuzz_easing_name

#![no_main]

use diozero_core::animation::easing::Easing;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(easing) = text.parse::<Easing>() {
        let printed = easing.to_string();
        assert_eq!(printed.parse::<Easing>(), Ok(easing));
    }
});
