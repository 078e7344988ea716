//! Device event model.
//!
//! Events are produced by:
//! - raw pin edges or poll ticks (digital input)
//! - poll ticks or pushed samples (analog input)
//! - the smoothing stage (synthesised activated / deactivated events)
//!
//! and fanned out to application listeners held in a [`ListenerSet`].
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Raw edge    │────▶│              │     │ listener #1  │
//! │ Poll tick   │────▶│    Engine    │────▶│ listener #2  │
//! │ Smoothing   │────▶│  (accept)    │     │ ...          │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Listener notification order is registration order.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

// ── Events ────────────────────────────────────────────────────

/// A timestamped level change on a digital input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitalInputEvent {
    pub gpio: u32,
    /// Wall-clock time of the edge.
    pub epoch_time: SystemTime,
    /// Monotonic time of the edge; used for debounce and smoothing.
    pub nano_time: Instant,
    /// Raw electrical level.
    pub level: bool,
    /// Polarity of the owning device.
    pub active_high: bool,
}

impl DigitalInputEvent {
    /// Event stamped with the current time.
    pub fn now(gpio: u32, level: bool, active_high: bool) -> Self {
        Self::at(gpio, Instant::now(), level, active_high)
    }

    /// Event stamped at a specific monotonic instant.
    pub fn at(gpio: u32, nano_time: Instant, level: bool, active_high: bool) -> Self {
        Self {
            gpio,
            epoch_time: SystemTime::now(),
            nano_time,
            level,
            active_high,
        }
    }

    pub fn is_active(&self) -> bool {
        self.level == self.active_high
    }
}

/// A sampled analog value that crossed the change threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogInputEvent {
    pub gpio: u32,
    pub epoch_time: SystemTime,
    pub nano_time: Instant,
    /// Normalised reading, nominally -1..1.
    pub unscaled: f32,
    pub range: f32,
}

impl AnalogInputEvent {
    pub fn new(gpio: u32, unscaled: f32, range: f32) -> Self {
        Self {
            gpio,
            epoch_time: SystemTime::now(),
            nano_time: Instant::now(),
            unscaled,
            range,
        }
    }

    /// `unscaled × range`, unclamped.
    pub fn scaled(&self) -> f32 {
        self.unscaled * self.range
    }
}

/// Edge reported by a raw digital pin, before polarity is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEdge {
    pub epoch_time: SystemTime,
    pub nano_time: Instant,
    pub level: bool,
}

impl RawEdge {
    pub fn now(level: bool) -> Self {
        Self {
            epoch_time: SystemTime::now(),
            nano_time: Instant::now(),
            level,
        }
    }
}

// ── Listeners ─────────────────────────────────────────────────

/// Receives events from one engine.  Called on scheduler or raw-device
/// threads, so it must not block for long.
pub trait InputEventListener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> InputEventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event);
    }
}

/// Parameterless callback (activated, deactivated, animation lifecycle).
pub type Action = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`ListenerSet::add`]; used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of unique listeners.  Adding the same `Arc` twice returns the
/// existing id instead of registering a duplicate.
pub struct ListenerSet<E> {
    entries: Vec<(ListenerId, Arc<dyn InputEventListener<E>>)>,
    next_id: u64,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ListenerSet<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add(&mut self, listener: Arc<dyn InputEventListener<E>>) -> ListenerId {
        if let Some((id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &listener))
        {
            return *id;
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copy of the current listeners in notification order, so the caller
    /// can notify without holding the engine lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn InputEventListener<E>>> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Notify every listener in order.
pub fn notify_all<E>(listeners: &[Arc<dyn InputEventListener<E>>], event: &E) {
    for listener in listeners {
        listener.on_event(event);
    }
}
