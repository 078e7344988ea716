//! Timer/scheduler engine.
//!
//! A pool of worker threads plus one timer thread.  The timer thread owns a
//! deadline heap and hands due tasks to the workers; workers run task
//! bodies.  Every engine callback (poll ticks, smoothing ticks, animation
//! frames) executes on a worker, never on the caller's thread.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  schedule_at_fixed_rate ──┐        schedule_once ──┐          │
//! │  schedule_once_after ─────┤                        │          │
//! │                           ▼                        │          │
//! │                  ┌─────────────────┐               │          │
//! │                  │  timer thread   │               │          │
//! │                  │ (deadline heap) │               │          │
//! │                  └────────┬────────┘               │          │
//! │                           ▼                        ▼          │
//! │                  ┌──────────────────────────────────────┐     │
//! │                  │            job queue (FIFO)          │     │
//! │                  └───────┬──────────┬──────────┬────────┘     │
//! │                          ▼          ▼          ▼              │
//! │                      worker-1   worker-2   worker-N           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A periodic task never runs concurrently with itself: if a run is still
//! in flight when the next deadline comes due, that tick is skipped.
//! Errors returned by a task body are logged and the task keeps its
//! schedule; a body returning [`Tick::Stop`] is cancelled cleanly.  Panics
//! are caught and logged so a worker never dies.

use std::cell::Cell;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::{PoolKind, SchedulerConfig};
use crate::error::{ConfigError, Error, Result, SchedulerError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════
//  Task types
// ═══════════════════════════════════════════════════════════════

/// What a periodic task body wants after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep the schedule.
    Continue,
    /// Cancel this task; it will not run again.
    Stop,
}

/// Result of one run of a periodic task body.
pub type TaskResult = anyhow::Result<Tick>;

type PeriodicBody = Box<dyn FnMut() -> TaskResult + Send>;
type OnceBody = Box<dyn FnOnce() + Send>;

enum Body {
    Periodic(PeriodicBody),
    Once(Option<OnceBody>),
}

struct TaskEntry {
    id: u64,
    label: &'static str,
    period: Option<Duration>,
    cancelled: AtomicBool,
    done: AtomicBool,
    in_flight: AtomicBool,
    /// Held for the whole run; `cancel_and_wait` synchronises on it.
    body: Mutex<Body>,
}

thread_local! {
    /// Id of the task the current worker thread is executing.
    static CURRENT_TASK: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Cancellable handle to a scheduled task.
///
/// Dropping the handle does **not** cancel the task.
pub struct ScheduledTask {
    entry: Arc<TaskEntry>,
}

impl ScheduledTask {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Request cancellation and return immediately.  A run already in
    /// flight completes.
    pub fn cancel(&self) {
        self.entry.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancel and block until any in-flight run has finished.  After this
    /// returns the body will not execute again.  Called from inside the
    /// task's own body it only marks the task cancelled.
    pub fn cancel_and_wait(&self) {
        self.cancel();
        if CURRENT_TASK.with(Cell::get) == Some(self.entry.id) {
            return;
        }
        drop(lock(&self.entry.body));
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.cancelled.load(Ordering::SeqCst)
    }

    /// True once the task can no longer run.
    pub fn is_done(&self) -> bool {
        self.entry.done.load(Ordering::SeqCst)
            || (self.is_cancelled() && !self.entry.in_flight.load(Ordering::SeqCst))
    }
}

impl core::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.entry.id)
            .field("label", &self.entry.label)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pool internals
// ═══════════════════════════════════════════════════════════════

struct TimerSlot {
    due: Instant,
    seq: u64,
    entry: Arc<TaskEntry>,
}

impl PartialEq for TimerSlot {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerSlot {}

impl PartialOrd for TimerSlot {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerSlot {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

struct PoolState {
    jobs: VecDeque<Arc<TaskEntry>>,
    timers: BinaryHeap<Reverse<TimerSlot>>,
    shutdown: bool,
    live_threads: usize,
    threads: Vec<JoinHandle<()>>,
    timer_seq: u64,
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    timer_wake: Condvar,
    drained: Condvar,
    next_id: AtomicU64,
}

impl Shared {
    fn new_entry(&self, label: &'static str, period: Option<Duration>, body: Body) -> Arc<TaskEntry> {
        Arc::new(TaskEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label,
            period,
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            body: Mutex::new(body),
        })
    }

    fn push_timer(&self, state: &mut PoolState, due: Instant, entry: Arc<TaskEntry>) {
        state.timer_seq += 1;
        state.timers.push(Reverse(TimerSlot {
            due,
            seq: state.timer_seq,
            entry,
        }));
        self.timer_wake.notify_one();
    }

    /// Mark the pool shut down and wake every thread.  Returns `false` if it
    /// already was.
    fn begin_shutdown(&self) -> bool {
        let mut state = lock(&self.state);
        if state.shutdown {
            return false;
        }
        state.shutdown = true;
        for Reverse(slot) in state.timers.drain() {
            slot.entry.cancelled.store(true, Ordering::SeqCst);
            slot.entry.done.store(true, Ordering::SeqCst);
        }
        self.work_ready.notify_all();
        self.timer_wake.notify_all();
        true
    }

    /// Wait up to the grace period for every thread to exit, then join them.
    fn await_drain(&self) {
        let grace = self.config.shutdown_grace();
        let (threads, drained) = {
            let state = lock(&self.state);
            let (mut state, timeout) = self
                .drained
                .wait_timeout_while(state, grace, |s| s.live_threads > 0)
                .unwrap_or_else(PoisonError::into_inner);
            (std::mem::take(&mut state.threads), !timeout.timed_out())
        };
        if drained {
            for handle in threads {
                let _ = handle.join();
            }
            info!("Scheduler: '{}' drained and stopped", self.config.name);
        } else {
            warn!(
                "Scheduler: '{}' did not drain within {:?}, detaching {} threads",
                self.config.name,
                grace,
                threads.len()
            );
        }
    }

    fn thread_exited(&self) {
        let mut state = lock(&self.state);
        state.live_threads = state.live_threads.saturating_sub(1);
        self.drained.notify_all();
    }
}

fn run_entry(entry: &TaskEntry) {
    let mut body = lock(&entry.body);
    if entry.cancelled.load(Ordering::SeqCst) {
        entry.done.store(true, Ordering::SeqCst);
        entry.in_flight.store(false, Ordering::SeqCst);
        return;
    }

    CURRENT_TASK.with(|c| c.set(Some(entry.id)));
    match &mut *body {
        Body::Periodic(f) => match panic::catch_unwind(AssertUnwindSafe(|| f())) {
            Ok(Ok(Tick::Continue)) => {}
            Ok(Ok(Tick::Stop)) => {
                debug!("Scheduler: task {} '{}' requested stop", entry.id, entry.label);
                entry.cancelled.store(true, Ordering::SeqCst);
                entry.done.store(true, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                warn!("Scheduler: task {} '{}' failed: {e:#}", entry.id, entry.label);
            }
            Err(_) => {
                error!("Scheduler: task {} '{}' panicked", entry.id, entry.label);
            }
        },
        Body::Once(f) => {
            if let Some(f) = f.take() {
                if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                    error!("Scheduler: one-shot {} '{}' panicked", entry.id, entry.label);
                }
            }
            entry.done.store(true, Ordering::SeqCst);
        }
    }
    CURRENT_TASK.with(|c| c.set(None));
    entry.in_flight.store(false, Ordering::SeqCst);
}

fn worker_loop(shared: &Shared) {
    loop {
        let next = {
            let mut state = lock(&shared.state);
            loop {
                if let Some(entry) = state.jobs.pop_front() {
                    break Some(entry);
                }
                if state.shutdown {
                    break None;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        match next {
            Some(entry) => run_entry(&entry),
            None => break,
        }
    }
    shared.thread_exited();
}

fn timer_loop(shared: &Shared) {
    let mut state = lock(&shared.state);
    while !state.shutdown {
        let now = Instant::now();
        let next_due = state.timers.peek().map(|Reverse(slot)| slot.due);
        match next_due {
            None => {
                state = shared
                    .timer_wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(due) if due > now => {
                state = shared
                    .timer_wake
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            Some(_) => {
                let Some(Reverse(slot)) = state.timers.pop() else {
                    continue;
                };
                if slot.entry.cancelled.load(Ordering::SeqCst) {
                    if !slot.entry.in_flight.load(Ordering::SeqCst) {
                        slot.entry.done.store(true, Ordering::SeqCst);
                    }
                    continue;
                }
                if slot.entry.in_flight.swap(true, Ordering::SeqCst) {
                    debug!(
                        "Scheduler: task {} '{}' still running, tick skipped",
                        slot.entry.id, slot.entry.label
                    );
                } else {
                    state.jobs.push_back(Arc::clone(&slot.entry));
                    shared.work_ready.notify_one();
                }
                if let Some(period) = slot.entry.period {
                    // Fixed rate; after a long stall resume from now instead
                    // of bursting through every missed deadline.
                    let next = (slot.due + period).max(now);
                    shared.push_timer(&mut state, next, slot.entry);
                }
            }
        }
    }
    drop(state);
    shared.thread_exited();
}

/// Spawn a named pool thread.
fn spawn_named(
    name: String,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    debug!("Spawning '{}' (stack={}KB)", name, stack_kb);
    thread::Builder::new()
        .name(name)
        .stack_size(stack_kb * 1024)
        .spawn(f)
        .map_err(|_| Error::Scheduler(SchedulerError::SpawnFailed))
}

/// Applies the pool kind's exit policy when the last handle goes away.
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        let started = self.shared.begin_shutdown();
        if started && self.shared.config.pool == PoolKind::NonDaemon {
            self.shared.await_drain();
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler handle
// ═══════════════════════════════════════════════════════════════

/// Cloneable handle to one shared worker pool.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    _owner: Arc<Owner>,
}

static SHARED_SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

impl Scheduler {
    /// Start a pool with `worker_threads` workers and one timer thread.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                timers: BinaryHeap::new(),
                shutdown: false,
                live_threads: 0,
                threads: Vec::new(),
                timer_seq: 0,
            }),
            work_ready: Condvar::new(),
            timer_wake: Condvar::new(),
            drained: Condvar::new(),
            next_id: AtomicU64::new(1),
            config,
        });
        let scheduler = Self {
            _owner: Arc::new(Owner {
                shared: Arc::clone(&shared),
            }),
            shared,
        };

        let prefix = format!(
            "{}-{}",
            scheduler.shared.config.name,
            scheduler.shared.config.pool.label()
        );
        let stack_kb = scheduler.shared.config.thread_stack_kb;

        let timer_shared = Arc::clone(&scheduler.shared);
        scheduler.register_thread(spawn_named(format!("{prefix}-timer"), stack_kb, move || {
            timer_loop(&timer_shared);
        }))?;
        for n in 1..=scheduler.shared.config.worker_threads {
            let worker_shared = Arc::clone(&scheduler.shared);
            scheduler.register_thread(spawn_named(format!("{prefix}-{n}"), stack_kb, move || {
                worker_loop(&worker_shared);
            }))?;
        }

        info!(
            "Scheduler: '{}' started ({} workers, {})",
            scheduler.shared.config.name,
            scheduler.shared.config.worker_threads,
            scheduler.shared.config.pool.label()
        );
        Ok(scheduler)
    }

    fn register_thread(&self, spawned: Result<JoinHandle<()>>) -> Result<()> {
        let handle = spawned?;
        let mut state = lock(&self.shared.state);
        state.live_threads += 1;
        state.threads.push(handle);
        Ok(())
    }

    /// Process-wide pool, created on first use and recreated if it has been
    /// shut down.
    pub fn shared() -> Result<Self> {
        let mut slot = lock(&SHARED_SCHEDULER);
        if let Some(existing) = slot.as_ref() {
            if !existing.is_shutdown() {
                return Ok(existing.clone());
            }
        }
        let scheduler = Self::new(SchedulerConfig::default())?;
        *slot = Some(scheduler.clone());
        Ok(scheduler)
    }

    /// Shut down the process-wide pool if it exists.
    pub fn shutdown_shared() {
        let scheduler = lock(&SHARED_SCHEDULER).take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.shared.state).shutdown
    }

    /// Run `task` every `period`, first after `initial_delay`.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        label: &'static str,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<ScheduledTask>
    where
        F: FnMut() -> TaskResult + Send + 'static,
    {
        if period.is_zero() {
            return Err(ConfigError::ZeroInterval("period").into());
        }
        let entry = self
            .shared
            .new_entry(label, Some(period), Body::Periodic(Box::new(task)));
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return Err(SchedulerError::ShutDown.into());
        }
        self.shared
            .push_timer(&mut state, Instant::now() + initial_delay, Arc::clone(&entry));
        debug!(
            "Scheduler: task {} '{}' every {:?} (delay {:?})",
            entry.id, label, period, initial_delay
        );
        Ok(ScheduledTask { entry })
    }

    /// Run `task` once, as soon as a worker is free.
    pub fn schedule_once<F>(&self, label: &'static str, task: F) -> Result<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        let entry = self
            .shared
            .new_entry(label, None, Body::Once(Some(Box::new(task))));
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return Err(SchedulerError::ShutDown.into());
        }
        entry.in_flight.store(true, Ordering::SeqCst);
        state.jobs.push_back(Arc::clone(&entry));
        self.shared.work_ready.notify_one();
        Ok(ScheduledTask { entry })
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once_after<F>(
        &self,
        label: &'static str,
        delay: Duration,
        task: F,
    ) -> Result<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        let entry = self
            .shared
            .new_entry(label, None, Body::Once(Some(Box::new(task))));
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return Err(SchedulerError::ShutDown.into());
        }
        self.shared
            .push_timer(&mut state, Instant::now() + delay, Arc::clone(&entry));
        Ok(ScheduledTask { entry })
    }

    /// Stop accepting work, drop pending timers, let queued jobs drain for
    /// up to the configured grace period, then join the threads.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shared.begin_shutdown() {
            info!("Scheduler: '{}' shutting down", self.shared.config.name);
            self.shared.await_drain();
        }
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.config.name)
            .field("pool", &self.shared.config.pool)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
