//! # Sliding Alert Window
//! Fixed-capacity ring of the last `W` per-tick hit counts plus the
//! two-state alert machine (`Idle` / `AlertActive`).
//!
//! The baseline is the running average of the window sum observed at every
//! past full tick, and it includes the sum that was just evaluated. Sustained
//! high traffic therefore slowly raises its own baseline.

use std::collections::VecDeque;

use serde::Serialize;

/// Upper bound on up-front buffer allocation; larger windows grow on demand.
const PREALLOC_TICKS: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Triggered,
    Recovered,
}

/// What a single `observe` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Buffer not full yet; no baseline exists.
    WarmingUp { window_hits: u64 },
    /// First full tick: baseline seeded, nothing evaluated.
    BaselineSeeded { window_hits: u64 },
    Evaluated {
        window_hits: u64,
        average: f64,
        transition: Option<AlertState>,
    },
}

impl Observation {
    pub fn window_hits(&self) -> u64 {
        match *self {
            Observation::WarmingUp { window_hits }
            | Observation::BaselineSeeded { window_hits }
            | Observation::Evaluated { window_hits, .. } => window_hits,
        }
    }

    pub fn transition(&self) -> Option<AlertState> {
        match *self {
            Observation::Evaluated { transition, .. } => transition,
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlidingAlertWindow {
    buf: VecDeque<u64>,
    capacity: usize,
    threshold: u64,
    window_sum: u64,
    historical_sum: u64,
    historical_count: u64,
    triggered: bool,
}

impl SlidingAlertWindow {
    /// `capacity` is the number of ticks in the window and must be > 0.
    pub fn new(capacity: usize, threshold: u64) -> Self {
        assert!(capacity > 0, "alert window capacity must be positive");
        Self {
            buf: VecDeque::with_capacity(capacity.min(PREALLOC_TICKS)),
            capacity,
            threshold,
            window_sum: 0,
            historical_sum: 0,
            historical_count: 0,
            triggered: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn window_sum(&self) -> u64 {
        self.window_sum
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Baseline average, once at least one full tick has been seen.
    pub fn average(&self) -> Option<f64> {
        (self.historical_count > 0)
            .then(|| self.historical_sum as f64 / self.historical_count as f64)
    }

    /// Buffered per-tick totals, oldest first.
    pub fn values(&self) -> impl Iterator<Item = u64> + '_ {
        self.buf.iter().copied()
    }

    /// Push one tick's total and run the alert machine.
    pub fn observe(&mut self, tick_hits: u64) -> Observation {
        if !self.is_full() {
            self.buf.push_back(tick_hits);
            self.window_sum += tick_hits;
            if !self.is_full() {
                return Observation::WarmingUp {
                    window_hits: self.window_sum,
                };
            }
            // Just became full.
            self.historical_sum = self.window_sum;
            self.historical_count = 1;
            return Observation::BaselineSeeded {
                window_hits: self.window_sum,
            };
        }

        let evicted = self.buf.pop_front().unwrap_or(0);
        self.window_sum = self.window_sum - evicted + tick_hits;
        self.buf.push_back(tick_hits);

        let average = self.historical_sum as f64 / self.historical_count as f64;
        let limit = average + self.threshold as f64;
        let over = self.window_sum as f64 > limit;

        let transition = match (self.triggered, over) {
            (false, true) => {
                self.triggered = true;
                Some(AlertState::Triggered)
            }
            (true, false) => {
                self.triggered = false;
                Some(AlertState::Recovered)
            }
            _ => None,
        };

        self.historical_sum = self.historical_sum.saturating_add(self.window_sum);
        self.historical_count += 1;

        Observation::Evaluated {
            window_hits: self.window_sum,
            average,
            transition,
        }
    }
}
