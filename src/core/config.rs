//! # Runtime configuration.
//!
//! Provides [`Config`] centralized settings for the supervisor runtime.
//! File/CLI configuration ([`crate::settings::Settings`]) resolves into this.
//!
//! ## Sentinel values
//! - `report_interval = 0s` → no periodic pulse-count report
//! - `event_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::clock::validate_learning_rate;
use crate::error::ConfigError;

/// Control channel used to wake every task during shutdown.
pub const DEFAULT_CONTROL_CHANNEL: &str = "CLOCKMULTIPLIER_UNBLOCK";

/// Global configuration for the supervisor runtime.
///
/// ## Field semantics
/// - `grace`: maximum wait for every task to reach its stopped state
/// - `event_capacity`: lifecycle event ring buffer size (min 1)
/// - `control_channel`: reserved bus channel for the shutdown broadcast
/// - `learning_rate`: interval smoothing factor shared by all tasks, in `[0, 1]`
/// - `report_interval`: period of the diagnostic pulse-count log (`0s` = off)
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for tasks to stop after the control broadcast.
    ///
    /// Tasks still running afterwards are aborted and reported in
    /// `RuntimeError::GraceExceeded`.
    pub grace: Duration,

    /// Capacity of the lifecycle event broadcast channel.
    ///
    /// Slow subscribers that lag behind more than `event_capacity` events skip
    /// older items. Pulse handling never waits on subscribers.
    pub event_capacity: usize,

    /// Reserved channel every task listens to besides its own.
    ///
    /// Must not be used as a source channel.
    pub control_channel: String,

    /// Learning rate of every task's interval estimator.
    ///
    /// `0` keeps the first measured interval forever, `1` follows the latest gap.
    pub learning_rate: f64,

    /// How often the supervisor logs the global pulse count.
    ///
    /// - `Duration::ZERO` = disabled
    pub report_interval: Duration,
}

impl Config {
    /// Returns the report period as an `Option`.
    ///
    /// - `None` → no report task
    /// - `Some(d)` → log the pulse count every `d`
    #[inline]
    pub fn report_every(&self) -> Option<Duration> {
        if self.report_interval == Duration::ZERO {
            None
        } else {
            Some(self.report_interval)
        }
    }

    /// Returns the event capacity clamped to a minimum of 1.
    #[inline]
    pub fn event_capacity_clamped(&self) -> usize {
        self.event_capacity.max(1)
    }

    /// Checks the fields that have no usable fallback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_learning_rate(self.learning_rate)?;
        if self.control_channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        Ok(())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 5s`
    /// - `event_capacity = 1024`
    /// - `control_channel = "CLOCKMULTIPLIER_UNBLOCK"`
    /// - `learning_rate = 1.0` (follow the latest gap)
    /// - `report_interval = 0s` (no report)
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            event_capacity: 1024,
            control_channel: DEFAULT_CONTROL_CHANNEL.to_string(),
            learning_rate: 1.0,
            report_interval: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_to_none() {
        let cfg = Config::default();
        assert_eq!(cfg.report_every(), None);
        assert_eq!(Config { event_capacity: 0, ..cfg }.event_capacity_clamped(), 1);
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert!(Config::default().validate().is_ok());
        let bad_lr = Config {
            learning_rate: 2.0,
            ..Config::default()
        };
        assert_eq!(
            bad_lr.validate(),
            Err(ConfigError::InvalidLearningRate { value: 2.0 })
        );
        let no_control = Config {
            control_channel: " ".into(),
            ..Config::default()
        };
        assert_eq!(no_control.validate(), Err(ConfigError::EmptyChannel));
    }
}
