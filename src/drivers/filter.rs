//! Digital input filter stages.
//!
//! Two optional stages sit in front of listener dispatch:
//!
//! | Stage      | Input                    | Output                               |
//! |------------|--------------------------|--------------------------------------|
//! | Debounce   | every raw edge           | edge, or dropped inside the window   |
//! | Smoothing  | active edges (timestamps)| one activated / deactivated per flip |
//!
//! Both are plain state machines driven by caller-supplied instants, so the
//! engine owns the clock and the tests can replay exact timelines.

use core::time::Duration;
use std::time::Instant;

use heapless::Deque;

use crate::config::{SMOOTHING_QUEUE_CAP, SmoothingConfig};

// ── Debounce ──────────────────────────────────────────────────

/// Drops edges that arrive within `window` of the last accepted edge.
#[derive(Debug, Clone, Copy)]
pub struct DebounceState {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl DebounceState {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `true` if the edge at `at` passes; a passing edge re-arms the window.
    pub fn accept(&mut self, at: Instant) -> bool {
        match self.last_accepted {
            Some(last) if at.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last_accepted = Some(at);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

// ── Smoothing ─────────────────────────────────────────────────

/// Output of one smoothing poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activated,
    Deactivated,
}

/// Counts active edges over a sliding window.
///
/// Reports `Activated` once when the window first holds `threshold`
/// edges and `Deactivated` once when it drains empty.
#[derive(Debug)]
pub struct SmoothingState {
    threshold: usize,
    event_age: Duration,
    poll_period: Duration,
    queue: Deque<Instant, SMOOTHING_QUEUE_CAP>,
    active: bool,
}

impl SmoothingState {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            threshold: config.threshold,
            event_age: Duration::from_millis(config.event_age_ms),
            poll_period: Duration::from_millis(config.poll_period_ms),
            queue: Deque::new(),
            active: false,
        }
    }

    pub fn poll_period(&self) -> Duration {
        self.poll_period
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Record an active edge.  A full window drops its oldest entry.
    pub fn record(&mut self, at: Instant) {
        if self.queue.is_full() {
            self.queue.pop_front();
        }
        let _ = self.queue.push_back(at);
    }

    /// Purge entries older than the event age, then compare against the
    /// threshold.
    pub fn poll(&mut self, now: Instant) -> Option<Transition> {
        while let Some(&oldest) = self.queue.front() {
            if now.saturating_duration_since(oldest) > self.event_age {
                self.queue.pop_front();
            } else {
                break;
            }
        }

        if !self.active && self.queue.len() >= self.threshold {
            self.active = true;
            Some(Transition::Activated)
        } else if self.active && self.queue.is_empty() {
            self.active = false;
            Some(Transition::Deactivated)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.active = false;
    }
}
