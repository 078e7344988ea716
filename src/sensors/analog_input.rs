//! Analog input engine.
//!
//! Samples a raw analog channel, either from pushed samples when the
//! channel supports them or from a fixed-rate poll task, and emits an
//! [`AnalogInputEvent`] whenever the reading moves past the configured
//! percentage of the last reported value.
//!
//! ```text
//!   raw push ──┐
//!              ├──▶ change_detected? ──yes──▶ baseline = v ──▶ listeners
//!   poll tick ─┘          │
//!                         no ──▶ drop
//! ```
//!
//! Scaled value is `unscaled × range`, unclamped.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::AnalogInputConfig;
use crate::error::{ConfigError, Error, Result};
use crate::events::{AnalogInputEvent, InputEventListener, ListenerId, ListenerSet, notify_all};
use crate::ports::RawAnalogInput;
use crate::scheduler::{ScheduledTask, Scheduler, TaskResult, Tick, lock};

// ── Change detection ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogPollState {
    last: Option<f32>,
    percent_change: f32,
    poll_interval: Duration,
}

impl AnalogPollState {
    pub fn new(percent_change: f32, poll_interval: Duration) -> Self {
        Self {
            last: None,
            percent_change,
            poll_interval,
        }
    }

    pub fn last(&self) -> Option<f32> {
        self.last
    }

    pub fn percent_change(&self) -> f32 {
        self.percent_change
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// `true` if `value` should be reported; a reported value becomes the
    /// new baseline.
    pub fn change_detected(&mut self, value: f32) -> bool {
        let changed = match self.last {
            None => true,
            Some(last) if self.percent_change == 0.0 => value != last,
            Some(last) => (value - last).abs() > self.percent_change * last.abs(),
        };
        if changed {
            self.last = Some(value);
        }
        changed
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ── Engine ────────────────────────────────────────────────────

struct AnalogState {
    listeners: ListenerSet<AnalogInputEvent>,
    poll: AnalogPollState,
    task: Option<ScheduledTask>,
    subscribed: bool,
    enabled: bool,
    closed: bool,
    /// Bumped on every enable and disable; samples and ticks from an
    /// older generation are dropped.
    generation: u64,
}

struct Shared {
    gpio: u32,
    range: f32,
    raw: Arc<dyn RawAnalogInput>,
    scheduler: Scheduler,
    state: Mutex<AnalogState>,
    /// Serialises enable / disable.  Never held while waiting on a task.
    toggle: Mutex<()>,
}

pub struct AnalogInputDevice {
    inner: Arc<Shared>,
}

impl AnalogInputDevice {
    pub fn new(
        raw: Arc<dyn RawAnalogInput>,
        config: AnalogInputConfig,
        scheduler: Scheduler,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Shared {
                gpio: raw.gpio(),
                range: config.range,
                raw,
                scheduler,
                state: Mutex::new(AnalogState {
                    listeners: ListenerSet::new(),
                    poll: AnalogPollState::new(
                        config.percent_change,
                        Duration::from_millis(config.poll_interval_ms),
                    ),
                    task: None,
                    subscribed: false,
                    enabled: false,
                    closed: false,
                    generation: 0,
                }),
                toggle: Mutex::new(()),
            }),
        })
    }

    /// Construct on the process-wide scheduler.
    pub fn with_shared_scheduler(
        raw: Arc<dyn RawAnalogInput>,
        config: AnalogInputConfig,
    ) -> Result<Self> {
        Self::new(raw, config, Scheduler::shared()?)
    }

    pub fn gpio(&self) -> u32 {
        self.inner.gpio
    }

    pub fn range(&self) -> f32 {
        self.inner.range
    }

    pub fn unscaled_value(&self) -> Result<f32> {
        if lock(&self.inner.state).closed {
            return Err(Error::AlreadyClosed);
        }
        Ok(self.inner.raw.value()?)
    }

    pub fn scaled_value(&self) -> Result<f32> {
        Ok(self.unscaled_value()? * self.inner.range)
    }

    pub fn percent_change(&self) -> f32 {
        lock(&self.inner.state).poll.percent_change()
    }

    pub fn poll_interval(&self) -> Duration {
        lock(&self.inner.state).poll.poll_interval()
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.inner.state).enabled
    }

    // ── Listeners ─────────────────────────────────────────────

    /// Register with the configured threshold and interval.
    pub fn add_listener(
        &self,
        listener: impl Fn(&AnalogInputEvent) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        self.add_listener_arc(Arc::new(listener), None)
    }

    /// Register, first replacing the change threshold and poll interval.
    pub fn add_listener_with(
        &self,
        listener: impl Fn(&AnalogInputEvent) + Send + Sync + 'static,
        percent_change: f32,
        poll_interval: Duration,
    ) -> Result<ListenerId> {
        if !percent_change.is_finite() || percent_change < 0.0 {
            return Err(ConfigError::InvalidPercentChange.into());
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll_interval").into());
        }
        self.add_listener_arc(Arc::new(listener), Some((percent_change, poll_interval)))
    }

    fn add_listener_arc(
        &self,
        listener: Arc<dyn InputEventListener<AnalogInputEvent>>,
        tuning: Option<(f32, Duration)>,
    ) -> Result<ListenerId> {
        let (id, retune) = {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            let retune = match tuning {
                Some((percent, interval)) => {
                    let changed = st.poll.poll_interval() != interval;
                    st.poll = AnalogPollState::new(percent, interval);
                    changed && st.enabled
                }
                None => false,
            };
            (st.listeners.add(listener), retune)
        };
        if retune {
            self.inner.disable();
        }
        self.inner.enable()?;
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let (removed, empty) = {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return Err(Error::AlreadyClosed);
            }
            (st.listeners.remove(id), st.listeners.is_empty())
        };
        if empty {
            self.inner.disable();
        }
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
        self.inner.disable();
        Ok(())
    }

    /// Feed a sample directly, as a pushing raw channel would.
    pub fn accept(&self, unscaled: f32) {
        self.inner.sample(None, unscaled);
    }

    /// Stop sampling, drop listeners and close the raw channel.
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut st = lock(&self.inner.state);
            if st.closed {
                return;
            }
            st.closed = true;
            st.listeners.clear();
        }
        self.inner.disable();
        self.inner.raw.close();
        info!("AnalogInput({}): closed", self.inner.gpio);
    }
}

impl Drop for AnalogInputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn enable(self: &Arc<Self>) -> Result<()> {
        let _serial = lock(&self.toggle);
        let (interval, generation) = {
            let mut st = lock(&self.state);
            if st.enabled || st.closed {
                return Ok(());
            }
            st.enabled = true;
            st.generation += 1;
            (st.poll.poll_interval(), st.generation)
        };

        let weak = Arc::downgrade(self);
        let started = if self.raw.generates_events() {
            self.raw
                .set_listener(Box::new(move |unscaled: f32| {
                    if let Some(shared) = weak.upgrade() {
                        shared.sample(Some(generation), unscaled);
                    }
                }))
                .map(|()| None)
                .map_err(Error::from)
        } else {
            self.scheduler
                .schedule_at_fixed_rate("analog-poll", interval, interval, move || {
                    poll_tick(&weak, generation)
                })
                .map(Some)
        };

        let mut st = lock(&self.state);
        match started {
            Ok(task) => {
                st.subscribed = task.is_none();
                st.task = task;
                info!(
                    "AnalogInput({}): enabled ({})",
                    self.gpio,
                    if st.subscribed { "pushed samples" } else { "polling" }
                );
                Ok(())
            }
            Err(e) => {
                st.enabled = false;
                st.generation += 1;
                Err(e)
            }
        }
    }

    fn disable(&self) {
        let task = {
            let _serial = lock(&self.toggle);
            let (task, subscribed) = {
                let mut st = lock(&self.state);
                if !st.enabled {
                    return;
                }
                st.enabled = false;
                st.generation += 1;
                (st.task.take(), std::mem::replace(&mut st.subscribed, false))
            };
            if subscribed {
                self.raw.remove_listener();
            }
            task
        };
        // A listener running inside this task may itself be waiting on
        // `toggle`, so the wait happens after the guard is dropped.
        if let Some(task) = task {
            task.cancel_and_wait();
        }
        info!("AnalogInput({}): disabled", self.gpio);
    }

    /// `generation` is `None` for samples fed directly by the caller.
    fn sample(&self, generation: Option<u64>, unscaled: f32) {
        let listeners = {
            let mut st = lock(&self.state);
            if st.closed || !st.enabled {
                return;
            }
            if generation.is_some_and(|g| g != st.generation) {
                return;
            }
            if !st.poll.change_detected(unscaled) {
                return;
            }
            st.listeners.snapshot()
        };
        let event = AnalogInputEvent::new(self.gpio, unscaled, self.range);
        debug!(
            "AnalogInput({}): {} (scaled {})",
            self.gpio,
            unscaled,
            event.scaled()
        );
        notify_all(&listeners, &event);
    }

    fn is_current(&self, generation: u64) -> bool {
        let st = lock(&self.state);
        st.enabled && st.generation == generation
    }
}

fn poll_tick(weak: &Weak<Shared>, generation: u64) -> TaskResult {
    let Some(shared) = weak.upgrade() else {
        return Ok(Tick::Stop);
    };
    if !shared.is_current(generation) {
        return Ok(Tick::Stop);
    }
    match shared.raw.value() {
        Ok(unscaled) => shared.sample(Some(generation), unscaled),
        Err(e) => warn!("AnalogInput({}): sample failed: {}", shared.gpio, e),
    }
    Ok(Tick::Continue)
}
