use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::ConfigError;

/// Output key for a multiplier task: `x{multiplier}.{channel}`.
///
/// Downstream modules depend on this exact naming.
///
/// ```
/// assert_eq!(pulsevisor::output_key(8, "clock"), "x8.clock");
/// ```
pub fn output_key(multiplier: u32, channel: &str) -> String {
    format!("x{multiplier}.{channel}")
}

/// One `(channel, multiplier)` pair to run as a multiplier task.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiplierSpec {
    channel: Arc<str>,
    multiplier: NonZeroU32,
    learning_rate: f64,
}

impl MultiplierSpec {
    /// Validates and builds a spec.
    ///
    /// ### Errors
    /// - empty channel name
    /// - `multiplier == 0`
    /// - `learning_rate` outside `[0, 1]` or not finite
    pub fn new(
        channel: impl Into<Arc<str>>,
        multiplier: u32,
        learning_rate: f64,
    ) -> Result<Self, ConfigError> {
        let channel: Arc<str> = channel.into();
        if channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        let multiplier =
            NonZeroU32::new(multiplier).ok_or_else(|| ConfigError::InvalidMultiplier {
                value: multiplier.to_string(),
            })?;
        validate_learning_rate(learning_rate)?;
        Ok(Self {
            channel,
            multiplier,
            learning_rate,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier.get()
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Key the task publishes to, see [`output_key`].
    pub fn output_key(&self) -> String {
        output_key(self.multiplier(), &self.channel)
    }

    pub(crate) fn channel_arc(&self) -> Arc<str> {
        Arc::clone(&self.channel)
    }
}

/// Accepts learning rates within `[0, 1]`.
pub fn validate_learning_rate(value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLearningRate { value })
    }
}
