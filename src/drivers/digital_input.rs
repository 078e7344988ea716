//! Digital input engine.
//!
//! Turns raw pin edges into polarity-aware [`DigitalInputEvent`]s, runs
//! them through the optional debounce and smoothing stages, and fans them
//! out to registered listeners.
//!
//! ## Listening lifecycle
//!
//! ```text
//!            first listener / callback / waiter
//!   Idle ─────────────────────────────────────────▶ Listening
//!    ▲                                                 │
//!    └──────── last registration removed, close() ─────┘
//! ```
//!
//! Entering `Listening` installs the raw edge callback, or starts a poll
//! task when the raw pin cannot push edges.  Leaving it removes the
//! callback exactly once.
//!
//! ## Event pipeline
//!
//! | Step       | Action                                                  |
//! |------------|---------------------------------------------------------|
//! | closed     | drop                                                    |
//! | debounce   | drop if inside the window since the last accepted edge  |
//! | smoothing  | queue active timestamps; the smoothing task dispatches  |
//! | dispatch   | activated / deactivated callback, then listeners        |
//!
//! Events are delivered in acceptance order.  Delivery never holds the
//! engine lock, so listeners may add or remove registrations, or close the
//! device, from inside a callback.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::filter::{DebounceState, SmoothingState, Transition};
use crate::config::DigitalInputConfig;
use crate::error::{Error, Result};
use crate::events::{
    Action, DigitalInputEvent, InputEventListener, ListenerId, ListenerSet, RawEdge, notify_all,
};
use crate::ports::RawDigitalInput;
use crate::scheduler::{ScheduledTask, Scheduler, TaskResult, Tick, lock};

struct InputState {
    listeners: ListenerSet<DigitalInputEvent>,
    activated: Option<Action>,
    deactivated: Option<Action>,
    /// Threads blocked in `wait_for_value`.
    waiters: usize,
    attached: bool,
    /// Bumped on every attach and detach; ticks from an older hook stop.
    hook_gen: u64,
    closed: bool,
    debounce: Option<DebounceState>,
    smoothing: Option<SmoothingState>,
    smoothing_task: Option<ScheduledTask>,
    poll_task: Option<ScheduledTask>,
    /// Last level seen by the poll task.
    polled_level: Option<bool>,
    /// Active state of the last dispatched event.
    last_active: Option<bool>,
    /// Bumped on every dispatched event; wakes waiters.
    seq: u64,
    outbox: VecDeque<DigitalInputEvent>,
    delivering: bool,
}

impl InputState {
    fn has_registrations(&self) -> bool {
        !self.listeners.is_empty()
            || self.activated.is_some()
            || self.deactivated.is_some()
            || self.waiters > 0
    }
}

struct Shared {
    gpio: u32,
    active_high: bool,
    poll_interval: Duration,
    raw: Arc<dyn RawDigitalInput>,
    scheduler: Scheduler,
    state: Mutex<InputState>,
    changed: Condvar,
    /// Serialises attach / detach.  Never held while waiting on a task.
    attach: Mutex<()>,
}

pub struct DigitalInputDevice {
    inner: Arc<Shared>,
}

impl DigitalInputDevice {
    pub fn new(
        raw: Arc<dyn RawDigitalInput>,
        config: DigitalInputConfig,
        scheduler: Scheduler,
    ) -> Result<Self> {
        config.validate()?;
        let gpio = raw.gpio();
        let active_high = config.active_high();
        debug!(
            "DigitalInput({}): pull={:?} active_high={} debounce={:?} smoothing={:?}",
            gpio, config.pull, active_high, config.debounce_ms, config.smoothing
        );
        Ok(Self {
            inner: Arc::new(Shared {
                gpio,
                active_high,
                poll_interval: Duration::from_millis(config.poll_interval_ms),
                raw,
                scheduler,
                state: Mutex::new(InputState {
                    listeners: ListenerSet::new(),
                    activated: None,
                    deactivated: None,
                    waiters: 0,
                    attached: false,
                    hook_gen: 0,
                    closed: false,
                    debounce: config
                        .debounce_ms
                        .map(|ms| DebounceState::new(Duration::from_millis(ms))),
                    smoothing: config.smoothing.as_ref().map(SmoothingState::new),
                    smoothing_task: None,
                    poll_task: None,
                    polled_level: None,
                    last_active: None,
                    seq: 0,
                    outbox: VecDeque::new(),
                    delivering: false,
                }),
                changed: Condvar::new(),
                attach: Mutex::new(()),
            }),
        })
    }

    /// Construct on the process-wide scheduler.
    pub fn with_shared_scheduler(
        raw: Arc<dyn RawDigitalInput>,
        config: DigitalInputConfig,
    ) -> Result<Self> {
        Self::new(raw, config, Scheduler::shared()?)
    }

    pub fn gpio(&self) -> u32 {
        self.inner.gpio
    }

    pub fn active_high(&self) -> bool {
        self.inner.active_high
    }

    /// Raw electrical level.
    pub fn value(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.raw.value()?)
    }

    /// Level interpreted through the device's polarity.  With smoothing
    /// configured this is the smoothed state, which is tracked only while
    /// the device is listening and reads inactive otherwise.
    pub fn is_active(&self) -> Result<bool> {
        self.inner.current_active()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.inner.state).attached
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    pub fn debounce_window(&self) -> Option<Duration> {
        lock(&self.inner.state).debounce.map(|d| d.window())
    }

    // ── Registrations ─────────────────────────────────────────

    pub fn add_listener(
        &self,
        listener: impl Fn(&DigitalInputEvent) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        self.add_listener_arc(Arc::new(listener))
    }

    /// Adding the same `Arc` twice returns the existing id.
    pub fn add_listener_arc(
        &self,
        listener: Arc<dyn InputEventListener<DigitalInputEvent>>,
    ) -> Result<ListenerId> {
        let id = {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            st.listeners.add(listener)
        };
        self.inner.sync_listening()?;
        Ok(id)
    }

    /// Returns `true` if the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let removed = {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            st.listeners.remove(id)
        };
        self.inner.sync_listening()?;
        Ok(removed)
    }

    pub fn remove_all_listeners(&self) -> Result<()> {
        {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            st.listeners.clear();
        }
        self.inner.sync_listening()
    }

    /// Set or clear (`None`) the callback fired on every active event.
    pub fn when_activated(&self, action: Option<Action>) -> Result<()> {
        {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            st.activated = action;
        }
        self.inner.sync_listening()
    }

    /// Set or clear (`None`) the callback fired on every inactive event.
    pub fn when_deactivated(&self, action: Option<Action>) -> Result<()> {
        {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            st.deactivated = action;
        }
        self.inner.sync_listening()
    }

    /// Entry point for raw edges; provider code that does not go through
    /// [`RawDigitalInput::set_listener`] may call this directly.
    pub fn accept(&self, edge: RawEdge) {
        self.inner.accept(edge);
    }

    // ── Blocking waits ────────────────────────────────────────

    /// Block the calling thread until the input reports `active`, or until
    /// `timeout` passes (`Duration::ZERO` waits forever).  Returns whether
    /// the state was reached.
    pub fn wait_for_value(&self, active: bool, timeout: Duration) -> Result<bool> {
        let start_seq = {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            st.waiters += 1;
            st.seq
        };
        let _waiter = WaiterGuard {
            shared: &self.inner,
        };
        self.inner.sync_listening()?;

        if self.inner.current_active()? == active {
            return Ok(true);
        }

        let reached =
            |s: &InputState| s.seq != start_seq && s.last_active == Some(active);
        let st = lock(&self.inner.state);
        let st = if timeout.is_zero() {
            self.inner
                .changed
                .wait_while(st, |s| !s.closed && !reached(s))
                .unwrap_or_else(PoisonError::into_inner)
        } else {
            self.inner
                .changed
                .wait_timeout_while(st, timeout, |s| !s.closed && !reached(s))
                .unwrap_or_else(PoisonError::into_inner)
                .0
        };
        let outcome = if reached(&*st) {
            Ok(true)
        } else if st.closed {
            Err(Error::AlreadyClosed)
        } else {
            Ok(false)
        };
        drop(st);
        outcome
    }

    pub fn wait_for_active(&self, timeout: Duration) -> Result<bool> {
        self.wait_for_value(true, timeout)
    }

    pub fn wait_for_inactive(&self, timeout: Duration) -> Result<bool> {
        self.wait_for_value(false, timeout)
    }

    /// Detach from the raw pin, drop every registration and close the raw
    /// device.  Idempotent; blocked waiters return `AlreadyClosed`.
    pub fn close(&self) {
        {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return;
            }
            st.closed = true;
            st.listeners.clear();
            st.activated = None;
            st.deactivated = None;
            st.outbox.clear();
        }
        self.inner.changed.notify_all();
        if let Err(e) = self.inner.sync_listening() {
            warn!("DigitalInput({}): detach on close failed: {}", self.inner.gpio, e);
        }
        self.inner.raw.close();
        info!("DigitalInput({}): closed", self.inner.gpio);
    }
}

impl Drop for DigitalInputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Releases a `wait_for_value` registration on every exit path.
struct WaiterGuard<'a> {
    shared: &'a Arc<Shared>,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        {
            let mut st = lock(&self.shared.state);
            st.waiters = st.waiters.saturating_sub(1);
        }
        if let Err(e) = self.shared.sync_listening() {
            warn!("DigitalInput({}): detach after wait failed: {}", self.shared.gpio, e);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Engine internals
// ═══════════════════════════════════════════════════════════════

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if lock(&self.state).closed {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn current_active(&self) -> Result<bool> {
        {
            let st = lock(&self.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            if let Some(smoothing) = st.smoothing.as_ref() {
                return Ok(smoothing.is_active());
            }
        }
        Ok(self.raw.value()? == self.active_high)
    }

    /// Attach or detach so the hardware hook matches the registrations.
    fn sync_listening(self: &Arc<Self>) -> Result<()> {
        let released = {
            let _serial = lock(&self.attach);
            let (want, attached) = {
                let st = lock(&self.state);
                (st.has_registrations() && !st.closed, st.attached)
            };
            match (want, attached) {
                (true, false) => return self.attach(),
                (false, true) => self.detach(),
                _ => return Ok(()),
            }
        };
        // A listener running inside one of these tasks may be blocked on
        // `attach`, so the wait happens after the guard is dropped.
        for task in released {
            task.cancel_and_wait();
        }
        Ok(())
    }

    fn attach(self: &Arc<Self>) -> Result<()> {
        let (generation, smoothing_period) = {
            let mut st = lock(&self.state);
            st.attached = true;
            st.hook_gen += 1;
            st.polled_level = None;
            let period = st.smoothing.as_mut().map(|s| {
                s.reset();
                s.poll_period()
            });
            (st.hook_gen, period)
        };

        let smoothing_task = match smoothing_period {
            Some(period) => {
                let weak = Arc::downgrade(self);
                match self.scheduler.schedule_at_fixed_rate(
                    "smoothing",
                    period,
                    period,
                    move || with_shared(&weak, |s| s.smoothing_tick(generation)),
                ) {
                    Ok(task) => Some(task),
                    Err(e) => {
                        self.abandon_attach();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let hooked = if self.raw.generates_events() {
            let weak = Arc::downgrade(self);
            self.raw
                .set_listener(Box::new(move |edge: RawEdge| {
                    if let Some(shared) = weak.upgrade() {
                        shared.accept(edge);
                    }
                }))
                .map(|()| None)
                .map_err(Error::from)
        } else {
            let weak = Arc::downgrade(self);
            self.scheduler
                .schedule_at_fixed_rate(
                    "digital-poll",
                    Duration::ZERO,
                    self.poll_interval,
                    move || with_shared(&weak, |s| s.poll_tick(generation)),
                )
                .map(Some)
        };

        let poll_task = match hooked {
            Ok(task) => task,
            Err(e) => {
                if let Some(task) = smoothing_task {
                    task.cancel();
                }
                self.abandon_attach();
                return Err(e);
            }
        };

        {
            let mut st = lock(&self.state);
            st.smoothing_task = smoothing_task;
            st.poll_task = poll_task;
        }
        if self.raw.generates_events() {
            info!("DigitalInput({}): listening (edge events)", self.gpio);
        } else {
            info!(
                "DigitalInput({}): listening (polling every {:?})",
                self.gpio, self.poll_interval
            );
        }
        Ok(())
    }

    fn abandon_attach(&self) {
        let mut st = lock(&self.state);
        st.attached = false;
        st.hook_gen += 1;
    }

    /// Unhook and hand back the tasks; the caller waits on them once
    /// `attach` is released.
    fn detach(&self) -> Vec<ScheduledTask> {
        let tasks = {
            let mut st = lock(&self.state);
            st.attached = false;
            st.hook_gen += 1;
            if let Some(smoothing) = st.smoothing.as_mut() {
                smoothing.reset();
            }
            [st.smoothing_task.take(), st.poll_task.take()]
        };
        for task in tasks.iter().flatten() {
            task.cancel();
        }
        if self.raw.generates_events() {
            self.raw.remove_listener();
        }
        info!("DigitalInput({}): idle", self.gpio);
        tasks.into_iter().flatten().collect()
    }

    fn accept(&self, edge: RawEdge) {
        let event = DigitalInputEvent {
            gpio: self.gpio,
            epoch_time: edge.epoch_time,
            nano_time: edge.nano_time,
            level: edge.level,
            active_high: self.active_high,
        };
        {
            let mut st = lock(&self.state);
            if st.closed {
                return;
            }
            if let Some(debounce) = st.debounce.as_mut() {
                if !debounce.accept(event.nano_time) {
                    debug!("DigitalInput({}): edge debounced", self.gpio);
                    return;
                }
            }
            if let Some(smoothing) = st.smoothing.as_mut() {
                if event.is_active() {
                    smoothing.record(event.nano_time);
                }
                return;
            }
        }
        self.dispatch(event);
    }

    /// Publish to waiters, then deliver in order.
    fn dispatch(&self, event: DigitalInputEvent) {
        {
            let mut st = lock(&self.state);
            if st.closed {
                return;
            }
            st.last_active = Some(event.is_active());
            st.seq = st.seq.wrapping_add(1);
            st.outbox.push_back(event);
            self.changed.notify_all();
            if st.delivering {
                return;
            }
            st.delivering = true;
        }
        self.drain_outbox();
    }

    fn drain_outbox(&self) {
        loop {
            let (event, callback, listeners) = {
                let mut st = lock(&self.state);
                let Some(event) = st.outbox.pop_front() else {
                    st.delivering = false;
                    return;
                };
                let callback = if event.is_active() {
                    st.activated.clone()
                } else {
                    st.deactivated.clone()
                };
                (event, callback, st.listeners.snapshot())
            };

            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                if let Some(f) = callback {
                    f();
                }
                notify_all(&listeners, &event);
            }));
            if delivered.is_err() {
                error!("DigitalInput({}): listener panicked", self.gpio);
            }
        }
    }

    fn is_hooked(st: &InputState, generation: u64) -> bool {
        !st.closed && st.attached && st.hook_gen == generation
    }

    fn poll_tick(&self, generation: u64) -> TaskResult {
        if !Self::is_hooked(&lock(&self.state), generation) {
            return Ok(Tick::Stop);
        }
        let level = self.raw.value()?;
        let changed = {
            let mut st = lock(&self.state);
            if !Self::is_hooked(&st, generation) {
                return Ok(Tick::Stop);
            }
            let previous = st.polled_level.replace(level);
            previous.is_some_and(|p| p != level)
        };
        if changed {
            self.accept(RawEdge::now(level));
        }
        Ok(Tick::Continue)
    }

    fn smoothing_tick(&self, generation: u64) -> TaskResult {
        let level = {
            let mut st = lock(&self.state);
            if !Self::is_hooked(&st, generation) {
                return Ok(Tick::Stop);
            }
            let Some(smoothing) = st.smoothing.as_mut() else {
                return Ok(Tick::Stop);
            };
            match smoothing.poll(Instant::now()) {
                Some(Transition::Activated) => self.active_high,
                Some(Transition::Deactivated) => !self.active_high,
                None => return Ok(Tick::Continue),
            }
        };
        debug!("DigitalInput({}): smoothed level {}", self.gpio, level);
        self.dispatch(DigitalInputEvent::now(self.gpio, level, self.active_high));
        Ok(Tick::Continue)
    }
}

fn with_shared(weak: &Weak<Shared>, f: impl FnOnce(&Shared) -> TaskResult) -> TaskResult {
    match weak.upgrade() {
        Some(shared) => f(&shared),
        None => Ok(Tick::Stop),
    }
}
