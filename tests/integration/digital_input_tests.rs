//! Digital input engine against mock pins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use diozero_core::Error;
use diozero_core::config::{DigitalInputConfig, Pull, SmoothingConfig};
use diozero_core::drivers::digital_input::DigitalInputDevice;
use diozero_core::events::DigitalInputEvent;

use crate::mock_hw::{MockPin, edge_at, scheduler};

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn attaches_on_first_registration_and_detaches_on_last() {
    let sched = scheduler("din-idle");
    let pin = MockPin::new(17);
    let dev = DigitalInputDevice::new(pin.as_raw(), DigitalInputConfig::default(), sched.clone())
        .unwrap();
    assert!(!dev.is_listening());

    let a = dev.add_listener(|_| {}).unwrap();
    let b = dev.add_listener(|_| {}).unwrap();
    assert!(dev.is_listening());
    assert_eq!(MockPin::count(&pin.attaches), 1);

    assert!(dev.remove_listener(a).unwrap());
    assert!(dev.is_listening());
    assert!(dev.remove_listener(b).unwrap());
    assert!(!dev.is_listening());
    assert_eq!(MockPin::count(&pin.detaches), 1);

    // Callbacks alone keep the engine listening.
    let (_, hit) = counter();
    dev.when_activated(Some(Arc::new(hit))).unwrap();
    assert!(pin.has_listener());
    dev.when_activated(None).unwrap();
    assert!(!pin.has_listener());
    assert_eq!(MockPin::count(&pin.attaches), 2);
    assert_eq!(MockPin::count(&pin.detaches), 2);

    dev.close();
    sched.shutdown();
}

#[test]
fn listeners_see_events_in_registration_order() {
    let sched = scheduler("din-order");
    let pin = MockPin::new(17);
    let dev = DigitalInputDevice::new(pin.as_raw(), DigitalInputConfig::default(), sched.clone())
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let seen = Arc::clone(&seen);
        dev.add_listener(move |e: &DigitalInputEvent| {
            seen.lock().unwrap().push((tag, e.level));
        })
        .unwrap();
    }
    pin.edge(true);
    pin.edge(false);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("first", true), ("second", true), ("first", false), ("second", false)]
    );
    dev.close();
    sched.shutdown();
}

#[test]
fn pull_up_input_is_active_low() {
    let sched = scheduler("din-pullup");
    let pin = MockPin::new(4);
    let config = DigitalInputConfig {
        pull: Pull::Up,
        ..DigitalInputConfig::default()
    };
    let dev = DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap();
    let (activated, on) = counter();
    let (deactivated, off) = counter();
    dev.when_activated(Some(Arc::new(on))).unwrap();
    dev.when_deactivated(Some(Arc::new(off))).unwrap();

    pin.edge(false);
    pin.edge(true);
    pin.edge(false);
    assert_eq!(activated.load(Ordering::SeqCst), 2);
    assert_eq!(deactivated.load(Ordering::SeqCst), 1);
    assert!(dev.is_active().unwrap());
    dev.close();
    sched.shutdown();
}

#[test]
fn debounce_drops_chatter_inside_window() {
    let sched = scheduler("din-debounce");
    let pin = MockPin::new(5);
    let config = DigitalInputConfig {
        debounce_ms: Some(50),
        ..DigitalInputConfig::default()
    };
    let dev = DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap();
    let levels = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&levels);
    dev.add_listener(move |e: &DigitalInputEvent| l.lock().unwrap().push(e.level))
        .unwrap();

    let t0 = Instant::now();
    dev.accept(edge_at(true, t0));
    dev.accept(edge_at(false, t0 + Duration::from_millis(5)));
    dev.accept(edge_at(true, t0 + Duration::from_millis(20)));
    dev.accept(edge_at(false, t0 + Duration::from_millis(60)));
    dev.accept(edge_at(true, t0 + Duration::from_millis(70)));

    assert_eq!(*levels.lock().unwrap(), vec![true, false]);
    assert_eq!(dev.debounce_window(), Some(Duration::from_millis(50)));
    dev.close();
    sched.shutdown();
}

#[test]
fn smoothing_reports_one_event_per_crossing() {
    let sched = scheduler("din-smooth");
    let pin = MockPin::new(6);
    let config = DigitalInputConfig {
        smoothing: Some(SmoothingConfig {
            threshold: 3,
            event_age_ms: 100,
            poll_period_ms: 10,
        }),
        ..DigitalInputConfig::default()
    };
    let dev = DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap();
    let (activated, on) = counter();
    let (deactivated, off) = counter();
    let events = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&events);
    dev.when_activated(Some(Arc::new(on))).unwrap();
    dev.when_deactivated(Some(Arc::new(off))).unwrap();
    dev.add_listener(move |_| {
        e.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    // Raw edges never reach listeners directly.
    for _ in 0..5 {
        pin.edge(true);
        pin.edge(false);
    }
    assert_eq!(events.load(Ordering::SeqCst), 0);

    thread::sleep(Duration::from_millis(60));
    assert_eq!(activated.load(Ordering::SeqCst), 1);
    assert_eq!(deactivated.load(Ordering::SeqCst), 0);

    thread::sleep(Duration::from_millis(250));
    assert_eq!(activated.load(Ordering::SeqCst), 1);
    assert_eq!(deactivated.load(Ordering::SeqCst), 1);
    assert_eq!(events.load(Ordering::SeqCst), 2);
    dev.close();
    sched.shutdown();
}

fn sleep_until(at: Instant) {
    thread::sleep(at.saturating_duration_since(Instant::now()));
}

#[test]
fn smoothing_burst_activates_once_until_window_drains() {
    let sched = scheduler("din-burst");
    let pin = MockPin::new(12);
    let config = DigitalInputConfig {
        smoothing: Some(SmoothingConfig {
            threshold: 3,
            event_age_ms: 200,
            poll_period_ms: 50,
        }),
        ..DigitalInputConfig::default()
    };
    let dev = DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap();
    let (activated, on) = counter();
    let (deactivated, off) = counter();
    dev.when_activated(Some(Arc::new(on))).unwrap();
    dev.when_deactivated(Some(Arc::new(off))).unwrap();

    // Three active edges inside 100 ms.
    let t0 = Instant::now();
    for ms in [0, 40, 80] {
        sleep_until(t0 + Duration::from_millis(ms));
        dev.accept(edge_at(true, Instant::now()));
    }
    sleep_until(t0 + Duration::from_millis(170));
    assert_eq!(activated.load(Ordering::SeqCst), 1);

    // More edges while the window is still full change nothing.
    dev.accept(edge_at(true, Instant::now()));
    sleep_until(t0 + Duration::from_millis(250));
    assert_eq!(activated.load(Ordering::SeqCst), 1);
    assert_eq!(deactivated.load(Ordering::SeqCst), 0);

    // The last edge ages out at ~370 ms; the next tick reports the drain.
    sleep_until(t0 + Duration::from_millis(500));
    assert_eq!(activated.load(Ordering::SeqCst), 1);
    assert_eq!(deactivated.load(Ordering::SeqCst), 1);

    // Refilling the window activates again.
    for _ in 0..3 {
        dev.accept(edge_at(true, Instant::now()));
        thread::sleep(Duration::from_millis(20));
    }
    thread::sleep(Duration::from_millis(120));
    assert_eq!(activated.load(Ordering::SeqCst), 2);
    assert_eq!(deactivated.load(Ordering::SeqCst), 1);

    dev.close();
    sched.shutdown();
}

#[test]
fn smoothed_input_is_not_active_on_a_single_raw_edge() {
    let sched = scheduler("din-smooth-wait");
    let pin = MockPin::new(13);
    let config = DigitalInputConfig {
        smoothing: Some(SmoothingConfig {
            threshold: 3,
            event_age_ms: 200,
            poll_period_ms: 50,
        }),
        ..DigitalInputConfig::default()
    };
    let dev = DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap();
    dev.add_listener(|_| {}).unwrap();

    // The raw level reads active, the smoothed state does not.
    pin.edge(true);
    assert_eq!(dev.value(), Ok(true));
    assert_eq!(dev.is_active(), Ok(false));

    let start = Instant::now();
    assert_eq!(dev.wait_for_active(Duration::from_millis(300)), Ok(false));
    assert!(start.elapsed() >= Duration::from_millis(300));

    for _ in 0..3 {
        pin.edge(true);
    }
    assert_eq!(dev.wait_for_active(Duration::from_secs(1)), Ok(true));
    assert_eq!(dev.is_active(), Ok(true));

    dev.close();
    sched.shutdown();
}

#[test]
fn listener_may_register_while_another_thread_detaches() {
    let sched = scheduler("din-reentrant");
    let pin = MockPin::polled(14);
    let config = DigitalInputConfig {
        poll_interval_ms: 5,
        ..DigitalInputConfig::default()
    };
    let dev = Arc::new(DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap());

    let (entered_tx, entered_rx) = mpsc::channel();
    let entered_tx = Mutex::new(entered_tx);
    let fired = AtomicBool::new(false);
    let weak = Arc::downgrade(&dev);
    let id = dev
        .add_listener(move |e: &DigitalInputEvent| {
            if !e.is_active() || fired.swap(true, Ordering::SeqCst) {
                return;
            }
            let _ = entered_tx.lock().unwrap().send(());
            // Still inside the poll task when the other thread detaches.
            thread::sleep(Duration::from_millis(150));
            if let Some(dev) = weak.upgrade() {
                dev.when_activated(Some(Arc::new(|| {}))).unwrap();
            }
        })
        .unwrap();

    thread::sleep(Duration::from_millis(30));
    pin.set_level(true);
    entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let remover = Arc::clone(&dev);
    thread::spawn(move || {
        let removed = remover.remove_listener(id);
        let _ = done_tx.send(removed);
    });

    let finished = done_rx.recv_timeout(Duration::from_secs(3));
    if finished.is_err() {
        // Locked up: dropping the device would block on the same locks.
        std::mem::forget(dev);
        panic!("remove_listener did not return");
    }
    assert_eq!(finished.unwrap(), Ok(true));
    assert!(dev.is_listening());

    dev.close();
    sched.shutdown();
}

#[test]
fn wait_for_value_times_out_and_releases_registration() {
    let sched = scheduler("din-timeout");
    let pin = MockPin::new(7);
    let dev = DigitalInputDevice::new(pin.as_raw(), DigitalInputConfig::default(), sched.clone())
        .unwrap();

    let start = Instant::now();
    assert_eq!(dev.wait_for_active(Duration::from_millis(50)), Ok(false));
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(!dev.is_listening());
    assert_eq!(MockPin::count(&pin.attaches), 1);
    assert_eq!(MockPin::count(&pin.detaches), 1);
    dev.close();
    sched.shutdown();
}

#[test]
fn wait_for_value_returns_immediately_when_already_there() {
    let sched = scheduler("din-already");
    let pin = MockPin::new(8);
    pin.set_level(true);
    let dev = DigitalInputDevice::new(pin.as_raw(), DigitalInputConfig::default(), sched.clone())
        .unwrap();
    let start = Instant::now();
    assert_eq!(dev.wait_for_active(Duration::ZERO), Ok(true));
    assert!(start.elapsed() < Duration::from_secs(1));
    dev.close();
    sched.shutdown();
}

#[test]
fn wait_for_value_wakes_on_edge() {
    let sched = scheduler("din-wake");
    let pin = MockPin::new(9);
    let dev = DigitalInputDevice::new(pin.as_raw(), DigitalInputConfig::default(), sched.clone())
        .unwrap();
    let presser = {
        let pin = Arc::clone(&pin);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            pin.edge(true);
        })
    };
    assert_eq!(dev.wait_for_active(Duration::from_secs(2)), Ok(true));
    presser.join().unwrap();
    dev.close();
    sched.shutdown();
}

#[test]
fn close_is_idempotent_and_wakes_waiters() {
    let sched = scheduler("din-close");
    let pin = MockPin::new(10);
    let dev = Arc::new(
        DigitalInputDevice::new(pin.as_raw(), DigitalInputConfig::default(), sched.clone())
            .unwrap(),
    );
    let waiter = {
        let dev = Arc::clone(&dev);
        thread::spawn(move || dev.wait_for_active(Duration::ZERO))
    };
    while !dev.is_listening() {
        thread::sleep(Duration::from_millis(1));
    }
    dev.close();
    dev.close();
    assert_eq!(waiter.join().unwrap(), Err(Error::AlreadyClosed));
    assert_eq!(MockPin::count(&pin.closes), 1);
    assert_eq!(MockPin::count(&pin.detaches), 1);
    assert_eq!(dev.wait_for_active(Duration::ZERO), Err(Error::AlreadyClosed));
    sched.shutdown();
}

#[test]
fn pin_without_edges_is_polled() {
    let sched = scheduler("din-poll");
    let pin = MockPin::polled(11);
    let config = DigitalInputConfig {
        poll_interval_ms: 5,
        ..DigitalInputConfig::default()
    };
    let dev = DigitalInputDevice::new(pin.as_raw(), config, sched.clone()).unwrap();
    let levels = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&levels);
    dev.add_listener(move |e: &DigitalInputEvent| l.lock().unwrap().push(e.level))
        .unwrap();
    assert!(dev.is_listening());

    thread::sleep(Duration::from_millis(30));
    pin.set_level(true);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(*levels.lock().unwrap(), vec![true]);
    assert_eq!(MockPin::count(&pin.attaches), 0);

    dev.close();
    let after_close = levels.lock().unwrap().len();
    pin.set_level(false);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(levels.lock().unwrap().len(), after_close);
    sched.shutdown();
}
