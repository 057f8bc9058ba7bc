//! # Adaptive clock multiplication.
//!
//! Building blocks:
//! - [`IntervalEstimator`] exponentially smoothed inter-pulse period;
//! - [`plan`] the `N - 1` sub-pulse delays for one period;
//! - [`TimerSet`] delayed publishes that can be cancelled as a group;
//! - [`MultiplierTask`] one `(channel, N)` pair: receive, estimate, publish, schedule.
//!
//! ```text
//! pulse ──► MultiplierTask ──► TimerSet::cancel_all()        (stale period)
//!                │
//!                ├──► IntervalEstimator::observe(now) ──► interval
//!                ├──► publish(x{N}.{channel}, payload)       (sub-pulse 0)
//!                └──► plan(interval, N) ──► TimerSet::schedule_at(now + d_k)
//!                                                 │
//!                                                 ▼
//!                                  publish(x{N}.{channel}, payload)   (k = 1..N-1)
//! ```

mod estimator;
mod planner;
mod spec;
mod task;
mod timers;

pub use estimator::IntervalEstimator;
pub use planner::plan;
pub use spec::{MultiplierSpec, output_key, validate_learning_rate};
pub use task::{MultiplierTask, Phase, RunFlag};
pub use timers::{TimerHandle, TimerSet};
