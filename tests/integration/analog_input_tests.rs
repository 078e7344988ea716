//! Analog input engine against mock channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use diozero_core::config::AnalogInputConfig;
use diozero_core::events::AnalogInputEvent;
use diozero_core::sensors::analog_input::AnalogInputDevice;
use diozero_core::{ConfigError, Error};

use crate::mock_hw::{MockChannel, scheduler};

fn recorder() -> (
    Arc<Mutex<Vec<AnalogInputEvent>>>,
    impl Fn(&AnalogInputEvent) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    (seen, move |e: &AnalogInputEvent| s.lock().unwrap().push(*e))
}

fn scaled(seen: &Mutex<Vec<AnalogInputEvent>>) -> Vec<f32> {
    seen.lock().unwrap().iter().map(AnalogInputEvent::scaled).collect()
}

#[test]
fn polling_reports_changes_scaled_by_range() {
    let sched = scheduler("ain-poll");
    let chan = MockChannel::polled(1, 0.5);
    let config = AnalogInputConfig {
        range: 2.0,
        ..AnalogInputConfig::default()
    };
    let dev = AnalogInputDevice::new(chan.as_raw(), config, sched.clone()).unwrap();
    let (seen, listener) = recorder();
    dev.add_listener_with(listener, 0.0, Duration::from_millis(5))
        .unwrap();
    assert!(dev.is_enabled());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(scaled(&seen), vec![1.0]);

    chan.set(-0.25);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(scaled(&seen), vec![1.0, -0.5]);
    assert_eq!(dev.scaled_value(), Ok(-0.5));
    assert_eq!(dev.range(), 2.0);

    dev.close();
    sched.shutdown();
}

#[test]
fn pushed_samples_respect_percent_threshold() {
    let sched = scheduler("ain-push");
    let chan = MockChannel::pushing(2);
    let dev = AnalogInputDevice::new(chan.as_raw(), AnalogInputConfig::default(), sched.clone())
        .unwrap();
    let (seen, listener) = recorder();
    dev.add_listener_with(listener, 0.1, Duration::from_millis(50))
        .unwrap();

    for v in [1.0, 1.05, 0.95, 1.2, 1.25] {
        chan.push(v);
    }
    assert_eq!(scaled(&seen), vec![1.0, 1.2]);
    assert_eq!(dev.percent_change(), 0.1);

    dev.remove_all_listeners().unwrap();
    assert!(!dev.is_enabled());
    assert_eq!(chan.detaches.load(Ordering::SeqCst), 1);
    dev.close();
    sched.shutdown();
}

#[test]
fn failed_reads_skip_ticks_without_stopping() {
    let sched = scheduler("ain-fail");
    let chan = MockChannel::polled(3, 0.3);
    chan.fail(true);
    let dev = AnalogInputDevice::new(chan.as_raw(), AnalogInputConfig::default(), sched.clone())
        .unwrap();
    let (seen, listener) = recorder();
    dev.add_listener_with(listener, 0.0, Duration::from_millis(5))
        .unwrap();

    thread::sleep(Duration::from_millis(40));
    assert!(seen.lock().unwrap().is_empty());
    assert!(chan.reads.load(Ordering::SeqCst) >= 2);

    chan.fail(false);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(scaled(&seen), vec![0.3]);
    dev.close();
    sched.shutdown();
}

#[test]
fn close_stops_polling_and_is_idempotent() {
    let sched = scheduler("ain-close");
    let chan = MockChannel::polled(4, 0.1);
    let dev = AnalogInputDevice::new(chan.as_raw(), AnalogInputConfig::default(), sched.clone())
        .unwrap();
    let (_, listener) = recorder();
    dev.add_listener_with(listener, 0.0, Duration::from_millis(5))
        .unwrap();
    thread::sleep(Duration::from_millis(20));

    dev.close();
    dev.close();
    let reads = chan.reads.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(chan.reads.load(Ordering::SeqCst), reads);
    assert_eq!(chan.closes.load(Ordering::SeqCst), 1);
    assert_eq!(dev.unscaled_value(), Err(Error::AlreadyClosed));
    assert!(dev.add_listener(|_| {}).is_err());
    sched.shutdown();
}

#[test]
fn invalid_tuning_is_rejected() {
    let sched = scheduler("ain-tuning");
    let chan = MockChannel::polled(5, 0.0);
    let dev = AnalogInputDevice::new(chan.as_raw(), AnalogInputConfig::default(), sched.clone())
        .unwrap();
    assert_eq!(
        dev.add_listener_with(|_| {}, -0.5, Duration::from_millis(10)).err(),
        Some(Error::Config(ConfigError::InvalidPercentChange))
    );
    assert_eq!(
        dev.add_listener_with(|_| {}, 0.1, Duration::ZERO).err(),
        Some(Error::Config(ConfigError::ZeroInterval("poll_interval")))
    );
    assert!(!dev.is_enabled());
    assert_eq!(dev.poll_interval(), Duration::from_millis(50));
    sched.shutdown();
}

#[test]
fn non_finite_range_is_rejected() {
    let sched = scheduler("ain-range");
    let chan = MockChannel::polled(6, 0.0);
    let config = AnalogInputConfig {
        range: f32::NAN,
        ..AnalogInputConfig::default()
    };
    assert_eq!(
        AnalogInputDevice::new(chan.as_raw(), config, sched.clone()).err(),
        Some(Error::Config(ConfigError::InvalidRange))
    );
    sched.shutdown();
}

#[test]
fn listener_may_register_while_another_thread_disables() {
    let sched = scheduler("ain-reentrant");
    let chan = MockChannel::polled(7, 0.4);
    let dev = Arc::new(
        AnalogInputDevice::new(chan.as_raw(), AnalogInputConfig::default(), sched.clone())
            .unwrap(),
    );

    let (entered_tx, entered_rx) = mpsc::channel();
    let entered_tx = Mutex::new(entered_tx);
    let fired = AtomicBool::new(false);
    let weak = Arc::downgrade(&dev);
    dev.add_listener_with(
        move |_: &AnalogInputEvent| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            let _ = entered_tx.lock().unwrap().send(());
            // Still inside the poll task when the other thread disables.
            thread::sleep(Duration::from_millis(150));
            if let Some(dev) = weak.upgrade() {
                dev.add_listener(|_| {}).unwrap();
            }
        },
        0.0,
        Duration::from_millis(5),
    )
    .unwrap();
    entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let remover = Arc::clone(&dev);
    thread::spawn(move || {
        let removed = remover.remove_all_listeners();
        let _ = done_tx.send(removed);
    });

    let finished = done_rx.recv_timeout(Duration::from_secs(3));
    if finished.is_err() {
        // Locked up: dropping the device would block on the same locks.
        std::mem::forget(dev);
        panic!("remove_all_listeners did not return");
    }
    assert_eq!(finished.unwrap(), Ok(()));
    assert!(dev.is_enabled());

    dev.close();
    sched.shutdown();
}
