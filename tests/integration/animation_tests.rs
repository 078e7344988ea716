//! Animation player driving recording targets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use diozero_core::animation::Animation;
use diozero_core::animation::easing::{Easing, EasingType};
use diozero_core::animation::instance::{AnimationInstance, Segment};
use diozero_core::config::AnimationConfig;
use diozero_core::ports::OutputTarget;

use crate::mock_hw::{FailingTarget, RecordingTarget, scheduler};

fn triangle() -> AnimationInstance {
    AnimationInstance::single(Segment::from_values(
        1000,
        &[0.0, 0.5, 1.0],
        &[&[0.0], &[1.0], &[0.0]],
    ))
}

/// Play `instance` to completion and return what the target saw.
fn play_once(config: AnimationConfig, instance: &AnimationInstance) -> Vec<f32> {
    let sched = scheduler("anim-once");
    let (target, values) = RecordingTarget::new();
    let anim = Animation::new(vec![target], config, sched.clone()).unwrap();
    let (tx, rx) = mpsc::channel();
    anim.on_stop(move || {
        let _ = tx.send(());
    });
    anim.enqueue(instance).unwrap();
    anim.play().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    sched.shutdown();
    let out = values.lock().unwrap().clone();
    out
}

#[test]
fn playback_is_deterministic() {
    let config = AnimationConfig {
        fps: 100,
        speed: 10.0,
        easing: Easing::Sine(EasingType::InOut),
        ..AnimationConfig::default()
    };
    let first = play_once(config, &triangle());
    let second = play_once(config, &triangle());
    assert_eq!(first.len(), 101);
    assert_eq!(first, second);
    assert_eq!(first[0], 0.0);
    assert_eq!(first[50], 1.0);
    assert_eq!(first[100], 0.0);
}

#[test]
fn speed_does_not_change_values() {
    let slow = AnimationConfig {
        fps: 100,
        speed: 5.0,
        ..AnimationConfig::default()
    };
    let fast = AnimationConfig {
        speed: 20.0,
        ..slow
    };
    assert_eq!(play_once(slow, &triangle()), play_once(fast, &triangle()));
}

#[test]
fn queued_instances_play_in_order() {
    let sched = scheduler("anim-queue");
    let (target, values) = RecordingTarget::new();
    let anim = Animation::new(
        vec![target],
        AnimationConfig {
            fps: 100,
            ..AnimationConfig::default()
        },
        sched.clone(),
    )
    .unwrap();
    let segments = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&segments);
    anim.on_segment_complete(move |index| s.lock().unwrap().push(index));
    let (tx, rx) = mpsc::channel();
    anim.on_stop(move || {
        let _ = tx.send(());
    });

    let up = AnimationInstance::single(Segment::from_values(20, &[0.0, 1.0], &[&[0.0], &[2.0]]));
    let down = AnimationInstance::new(vec![
        Segment::from_values(20, &[0.0, 1.0], &[&[5.0], &[3.0]]),
        Segment::from_values(10, &[0.0, 1.0], &[&[3.0], &[9.0]]),
    ]);
    anim.enqueue(&up).unwrap();
    anim.enqueue(&down).unwrap();
    assert_eq!(anim.queued(), 2);
    anim.play().unwrap();
    assert_eq!(anim.queued(), 1);

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        *values.lock().unwrap(),
        vec![0.0, 1.0, 2.0, 5.0, 4.0, 3.0, 3.0, 9.0]
    );
    assert_eq!(*segments.lock().unwrap(), vec![0, 0, 1]);
    sched.shutdown();
}

#[test]
fn play_while_playing_restarts() {
    let sched = scheduler("anim-restart");
    let (target, _) = RecordingTarget::new();
    let anim = Animation::new(vec![target], AnimationConfig::default(), sched.clone()).unwrap();
    let starts = Arc::new(AtomicUsize::new(0));
    let st = Arc::clone(&starts);
    anim.on_start(move || {
        st.fetch_add(1, Ordering::SeqCst);
    });
    anim.enqueue(&triangle()).unwrap();
    anim.play().unwrap();
    thread::sleep(Duration::from_millis(30));
    anim.play().unwrap();
    assert!(anim.is_playing());
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    anim.stop();
    sched.shutdown();
}

#[test]
fn failing_target_does_not_stop_the_others() {
    let sched = scheduler("anim-fail");
    let (target, values) = RecordingTarget::new();
    let failing: Box<dyn OutputTarget> = Box::new(FailingTarget);
    let anim = Animation::new(
        vec![failing, target],
        AnimationConfig {
            fps: 100,
            ..AnimationConfig::default()
        },
        sched.clone(),
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    anim.on_stop(move || {
        let _ = tx.send(());
    });
    anim.enqueue(&AnimationInstance::single(Segment::from_values(
        20,
        &[0.0, 1.0],
        &[&[0.0, 0.0], &[1.0, 2.0]],
    )))
    .unwrap();
    anim.play().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(*values.lock().unwrap(), vec![0.0, 1.0, 2.0]);
    sched.shutdown();
}

#[test]
fn stop_from_another_thread_fires_on_stop_once() {
    let sched = scheduler("anim-stop");
    let (target, values) = RecordingTarget::new();
    let anim = Arc::new(
        Animation::new(vec![target], AnimationConfig::default(), sched.clone()).unwrap(),
    );
    let stops = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&stops);
    anim.on_stop(move || {
        s.fetch_add(1, Ordering::SeqCst);
    });
    anim.enqueue(&triangle()).unwrap();
    anim.enqueue(&triangle()).unwrap();
    anim.play().unwrap();
    thread::sleep(Duration::from_millis(50));

    let stopper = {
        let anim = Arc::clone(&anim);
        thread::spawn(move || anim.stop())
    };
    stopper.join().unwrap();
    anim.stop();

    let written = values.lock().unwrap().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(values.lock().unwrap().len(), written);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(anim.queued(), 0);
    assert!(!anim.is_playing());
    sched.shutdown();
}

#[test]
fn json_instance_plays() {
    let json = r#"{
        "segments": [{
            "duration_ms": 30,
            "cue_points": [0.0, 1.0],
            "key_frames": [[{"value": 1.0}], [{"delta": -1.0}]]
        }]
    }"#;
    let instance = AnimationInstance::from_json(json).unwrap();
    let values = play_once(
        AnimationConfig {
            fps: 100,
            ..AnimationConfig::default()
        },
        &instance,
    );
    assert_eq!(values.first(), Some(&1.0));
    assert_eq!(values.last(), Some(&0.0));
    assert_eq!(values.len(), 4);
}
