//! Fuzz target: `AnimationInstance::from_json` + `bake`
//!
//! Arbitrary text is parsed as an animation instance; whatever parses is
//! validated and baked for one and two targets.  Neither step may panic
//! or allocate past the frame limit, and a successful bake holds both
//! endpoints of every segment.
//!
//! cargo fuzz run fuzz_animation_json

#![no_main]

use diozero_core::animation::easing::Easing;
use diozero_core::animation::instance::AnimationInstance;
use diozero_core::config::MAX_BAKED_FRAMES;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(instance) = AnimationInstance::from_json(text) else {
        return;
    };
    for targets in 1..=2 {
        if let Ok(baked) = instance.bake(targets, 16, Easing::Linear) {
            assert!(baked.frame_count() as u64 <= MAX_BAKED_FRAMES);
            for seg in 0..baked.segment_count() {
                let frames = baked.frames(seg);
                assert!(frames.len() >= 2, "a baked segment holds both endpoints");
                assert!(frames.iter().all(|f| f.len() == targets));
            }
        }
    }
});
