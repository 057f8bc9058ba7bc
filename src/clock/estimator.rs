//! # Interval estimator.
//!
//! Learns the period of a pulse stream with an exponential moving average:
//!
//! ```text
//! observe(t0) → None                          (previous = t0)
//! observe(t1) → Some(t1 - t0)                 (first estimate)
//! observe(tk) → Some((1 - lr) * est + lr * (tk - previous))
//! ```
//!
//! The estimate is a signed number of seconds: duplicate or out-of-order
//! timestamps produce a gap `<= 0` that is folded in as-is. Clamping to a
//! usable delay happens in [`plan`](super::plan).

use tokio::time::Instant;

/// Exponentially smoothed estimate of the inter-pulse period.
#[derive(Debug, Clone)]
pub struct IntervalEstimator {
    learning_rate: f64,
    previous: Option<Instant>,
    interval: Option<f64>,
}

impl IntervalEstimator {
    /// Creates an empty estimator.
    ///
    /// `learning_rate` is expected in `[0, 1]`: `0` freezes the first estimate,
    /// `1` always follows the most recent gap.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            previous: None,
            interval: None,
        }
    }

    /// Folds the pulse observed at `now` into the estimate.
    ///
    /// Returns the interval estimate in seconds, or `None` for the very first pulse.
    pub fn observe(&mut self, now: Instant) -> Option<f64> {
        let estimate = self.previous.map(|previous| {
            let gap = signed_gap(previous, now);
            match self.interval {
                None => gap,
                Some(current) => {
                    (1.0 - self.learning_rate) * current + self.learning_rate * gap
                }
            }
        });
        if estimate.is_some() {
            self.interval = estimate;
        }
        self.previous = Some(now);
        estimate
    }

    /// Current estimate in seconds, if at least two pulses were observed.
    pub fn interval(&self) -> Option<f64> {
        self.interval
    }

    /// Arrival time of the last observed pulse.
    pub fn previous(&self) -> Option<Instant> {
        self.previous
    }
}

/// `to - from` in seconds, negative when `to` is earlier than `from`.
fn signed_gap(from: Instant, to: Instant) -> f64 {
    match to.checked_duration_since(from) {
        Some(d) => d.as_secs_f64(),
        None => -from.duration_since(to).as_secs_f64(),
    }
}
