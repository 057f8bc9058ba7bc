use std::collections::HashSet;
use std::sync::Arc;

use crate::bus::BusRef;
use crate::clock::MultiplierSpec;
use crate::core::{Config, Supervisor};
use crate::error::ConfigError;
use crate::subscribers::Subscribe;

/// Builder for a [`Supervisor`]: bus, task set and observers.
///
/// The task set is the cross product of channels and multipliers, channel-major:
/// channels `[a, b]` with multipliers `[2, 4]` give `x2.a, x4.a, x2.b, x4.b`.
pub struct SupervisorBuilder {
    cfg: Config,
    bus: BusRef,
    channels: Vec<String>,
    multipliers: Vec<u32>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration and bus backend.
    pub fn new(cfg: Config, bus: BusRef) -> Self {
        Self {
            cfg,
            bus,
            channels: Vec::new(),
            multipliers: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Sets the source channels, in order.
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the multipliers applied to every channel, in order.
    pub fn with_multipliers<I>(mut self, multipliers: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        self.multipliers = multipliers.into_iter().collect();
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive lifecycle and pulse events through dedicated
    /// workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and builds the supervisor.
    ///
    /// Does not touch the bus or spawn anything; see [`Supervisor::start`].
    ///
    /// ### Errors
    /// - no channel or no multiplier
    /// - empty channel name, channel equal to the control channel
    /// - multiplier `0`, learning rate outside `[0, 1]`
    pub fn build(self) -> Result<Supervisor, ConfigError> {
        self.cfg.validate()?;
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.multipliers.is_empty() {
            return Err(ConfigError::NoMultipliers);
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.channels.len() * self.multipliers.len());
        for channel in &self.channels {
            if *channel == self.cfg.control_channel {
                return Err(ConfigError::ReservedChannel {
                    channel: channel.clone(),
                });
            }
            for &multiplier in &self.multipliers {
                let spec =
                    MultiplierSpec::new(channel.as_str(), multiplier, self.cfg.learning_rate)?;
                if !seen.insert(spec.output_key()) {
                    tracing::warn!(
                        key = %spec.output_key(),
                        "duplicate channel/multiplier pair ignored"
                    );
                    continue;
                }
                specs.push(spec);
            }
        }

        Ok(Supervisor::new_internal(
            self.cfg,
            self.bus,
            specs,
            self.subscribers,
        ))
    }
}
