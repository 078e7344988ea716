//! Key-frame animation player.
//!
//! Drives one or more [`OutputTarget`]s from a FIFO queue of
//! [`AnimationInstance`]s.  Instances are validated and baked into frames
//! when enqueued; playback is one fixed-rate scheduler task that writes one
//! frame per tick.
//!
//! ```text
//!            play()                       queue empty, !loop
//!  Stopped ─────────▶ Playing ────────────────────────────────▶ Stopped
//!     ▲                │   ▲                                    (on_stop)
//!     │     stop()     │   │ queue empty, loop
//!     └────────────────┘   └── replay history (on_loop)
//! ```
//!
//! Tick period is `1000 / fps` ms divided by `speed`; baked frame values do
//! not depend on speed.  `stop()` returns only after the playback task has
//! finished its last tick, so no target is written after it returns.

pub mod easing;
pub mod instance;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::AnimationConfig;
use crate::error::{ConfigError, Error, Result};
use crate::events::Action;
use crate::ports::OutputTarget;
use crate::scheduler::{ScheduledTask, Scheduler, TaskResult, Tick, lock};

use self::instance::{AnimationInstance, BakedInstance};

/// Callback fired with the index of the segment that just finished.
pub type SegmentAction = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_start: Option<Action>,
    on_stop: Option<Action>,
    on_loop: Option<Action>,
    on_segment_complete: Option<SegmentAction>,
}

struct PlayState {
    pending: VecDeque<Arc<BakedInstance>>,
    /// Instances played since `play()`, replayed in order when looping.
    played: Vec<Arc<BakedInstance>>,
    current: Option<Arc<BakedInstance>>,
    segment: usize,
    step: usize,
    looping: bool,
    playing: bool,
    generation: u64,
    task: Option<ScheduledTask>,
}

/// What a tick decided while holding the state lock.
#[derive(Default)]
struct TickOutcome {
    segment_complete: Option<usize>,
    looped: bool,
    finished: bool,
}

struct Player {
    config: AnimationConfig,
    scheduler: Scheduler,
    target_count: usize,
    targets: Mutex<Vec<Box<dyn OutputTarget>>>,
    state: Mutex<PlayState>,
    callbacks: Mutex<Callbacks>,
}

pub struct Animation {
    inner: Arc<Player>,
}

impl Animation {
    pub fn new(
        targets: Vec<Box<dyn OutputTarget>>,
        config: AnimationConfig,
        scheduler: Scheduler,
    ) -> Result<Self> {
        config.validate()?;
        if targets.is_empty() {
            return Err(ConfigError::NoTargets.into());
        }
        Ok(Self {
            inner: Arc::new(Player {
                scheduler,
                target_count: targets.len(),
                targets: Mutex::new(targets),
                state: Mutex::new(PlayState {
                    pending: VecDeque::new(),
                    played: Vec::new(),
                    current: None,
                    segment: 0,
                    step: 0,
                    looping: config.looping,
                    playing: false,
                    generation: 0,
                    task: None,
                }),
                callbacks: Mutex::new(Callbacks::default()),
                config,
            }),
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn fps(&self) -> u32 {
        self.inner.config.fps
    }

    pub fn speed(&self) -> f32 {
        self.inner.config.speed
    }

    /// Wall-clock time between frames.
    pub fn period(&self) -> Duration {
        self.inner.config.tick_period()
    }

    pub fn target_count(&self) -> usize {
        self.inner.target_count
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.inner.state).playing
    }

    pub fn is_looping(&self) -> bool {
        lock(&self.inner.state).looping
    }

    pub fn set_loop(&self, looping: bool) {
        lock(&self.inner.state).looping = looping;
    }

    /// Instances waiting behind the current one.
    pub fn queued(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    // ── Callbacks ─────────────────────────────────────────────

    pub fn on_start(&self, f: impl Fn() + Send + Sync + 'static) {
        lock(&self.inner.callbacks).on_start = Some(Arc::new(f));
    }

    pub fn on_stop(&self, f: impl Fn() + Send + Sync + 'static) {
        lock(&self.inner.callbacks).on_stop = Some(Arc::new(f));
    }

    pub fn on_loop(&self, f: impl Fn() + Send + Sync + 'static) {
        lock(&self.inner.callbacks).on_loop = Some(Arc::new(f));
    }

    pub fn on_segment_complete(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).on_segment_complete = Some(Arc::new(f));
    }

    // ── Queue and playback ────────────────────────────────────

    /// Validate, bake and queue an instance.
    pub fn enqueue(&self, instance: &AnimationInstance) -> Result<()> {
        let baked = instance.bake(
            self.inner.target_count,
            self.inner.config.frame_period_ms(),
            self.inner.config.easing,
        )?;
        debug!(
            "Animation: queued instance ({} segments, {} frames)",
            baked.segment_count(),
            baked.frame_count()
        );
        lock(&self.inner.state).pending.push_back(Arc::new(baked));
        Ok(())
    }

    /// Start playing the next queued instance.  Already playing: the
    /// running task is cancelled and playback restarts, from the next
    /// queued instance if there is one, otherwise from the top of the
    /// current one.
    pub fn play(&self) -> Result<()> {
        let previous = lock(&self.inner.state).task.take();
        if let Some(task) = previous {
            task.cancel_and_wait();
        }

        let generation = {
            let mut st = lock(&self.inner.state);
            let next = match st.pending.pop_front() {
                Some(next) => next,
                None if st.playing => match st.current.clone() {
                    Some(current) => current,
                    None => return Err(Error::NothingToPlay),
                },
                None => return Err(Error::NothingToPlay),
            };
            st.played.clear();
            st.played.push(Arc::clone(&next));
            st.current = Some(next);
            st.segment = 0;
            st.step = 0;
            st.playing = true;
            st.generation += 1;
            st.generation
        };

        info!(
            "Animation: play ({} fps, speed {}, period {:?})",
            self.inner.config.fps,
            self.inner.config.speed,
            self.period()
        );
        let on_start = lock(&self.inner.callbacks).on_start.clone();
        if let Some(f) = on_start {
            f();
        }

        let weak = Arc::downgrade(&self.inner);
        let scheduled = self.inner.scheduler.schedule_at_fixed_rate(
            "animation",
            Duration::ZERO,
            self.period(),
            move || Player::tick(&weak, generation),
        );
        let task = match scheduled {
            Ok(task) => task,
            Err(e) => {
                let mut st = lock(&self.inner.state);
                if st.generation == generation {
                    st.playing = false;
                    st.current = None;
                }
                return Err(e);
            }
        };

        let mut st = lock(&self.inner.state);
        if st.generation == generation {
            st.task = Some(task);
        } else {
            // A concurrent stop() or play() superseded this run.
            drop(st);
            task.cancel_and_wait();
        }
        Ok(())
    }

    /// Stop playback and flush the queue.  Blocks until the playback task
    /// has finished; fires `on_stop` if something was playing.  Idempotent.
    pub fn stop(&self) {
        let (task, was_playing) = {
            let mut st = lock(&self.inner.state);
            st.pending.clear();
            st.played.clear();
            st.current = None;
            st.generation += 1;
            let was_playing = std::mem::replace(&mut st.playing, false);
            (st.task.take(), was_playing)
        };
        if let Some(task) = task {
            task.cancel_and_wait();
        }
        if was_playing {
            info!("Animation: stopped");
            self.inner.fire_stop();
        }
    }
}

impl Drop for Animation {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Player {
    fn tick(weak: &Weak<Player>, generation: u64) -> TaskResult {
        match weak.upgrade() {
            Some(player) => player.advance(generation),
            None => Ok(Tick::Stop),
        }
    }

    fn advance(&self, generation: u64) -> TaskResult {
        let (frame, outcome) = {
            let mut st = lock(&self.state);
            if !st.playing || st.generation != generation {
                return Ok(Tick::Stop);
            }
            let Some(current) = st.current.clone() else {
                st.playing = false;
                return Ok(Tick::Stop);
            };

            let frame = current.frames(st.segment).get(st.step).cloned();
            let mut outcome = TickOutcome::default();

            st.step += 1;
            if st.step >= current.frames(st.segment).len() {
                outcome.segment_complete = Some(st.segment);
                st.step = 0;
                st.segment += 1;
            }
            if st.segment >= current.segment_count() {
                st.segment = 0;
                if let Some(next) = st.pending.pop_front() {
                    st.played.push(Arc::clone(&next));
                    st.current = Some(next);
                } else if st.looping {
                    let history = std::mem::take(&mut st.played);
                    st.pending.extend(history);
                    st.current = st.pending.pop_front();
                    if let Some(first) = &st.current {
                        let first = Arc::clone(first);
                        st.played.push(first);
                    }
                    outcome.looped = true;
                } else {
                    st.playing = false;
                    st.current = None;
                    st.task = None;
                    outcome.finished = true;
                }
            }
            (frame, outcome)
        };

        if let Some(frame) = frame {
            self.apply(&frame);
        }
        self.fire(&outcome);

        if outcome.finished {
            info!("Animation: finished");
            Ok(Tick::Stop)
        } else {
            Ok(Tick::Continue)
        }
    }

    fn apply(&self, frame: &[f32]) {
        let mut targets = lock(&self.targets);
        for (index, (target, &value)) in targets.iter_mut().zip(frame).enumerate() {
            if let Err(e) = target.set_value(value) {
                warn!("Animation: target {} rejected {}: {}", index, value, e);
            }
        }
    }

    fn fire(&self, outcome: &TickOutcome) {
        let (segment_cb, loop_cb) = {
            let cbs = lock(&self.callbacks);
            (cbs.on_segment_complete.clone(), cbs.on_loop.clone())
        };
        if let (Some(index), Some(f)) = (outcome.segment_complete, segment_cb) {
            f(index);
        }
        if outcome.looped {
            debug!("Animation: looping");
            if let Some(f) = loop_cb {
                f();
            }
        }
        if outcome.finished {
            self.fire_stop();
        }
    }

    fn fire_stop(&self) {
        let on_stop = lock(&self.callbacks).on_stop.clone();
        if let Some(f) = on_stop {
            f();
        }
    }
}
