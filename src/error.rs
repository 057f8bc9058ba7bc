//! Error types used by the pulsevisor runtime, its tasks and its collaborators.
//!
//! This module defines four enums:
//!
//! - [`ConfigError`] invalid or missing configuration, fatal at startup.
//! - [`BusError`] failures of the pub/sub bus (connect, subscribe, publish, receive).
//! - [`TaskError`] the reason a single multiplier task stopped abnormally.
//! - [`RuntimeError`] errors raised by the supervisor itself.
//!
//! All of them provide `as_label` for logs. Nothing is retried inside the runtime.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced while resolving configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No source channel was configured.
    #[error("no channel configured")]
    NoChannels,

    /// No multiplier was configured.
    #[error("no multiplier (rate) configured")]
    NoMultipliers,

    /// A channel name was empty after trimming.
    #[error("channel name must not be empty")]
    EmptyChannel,

    /// A channel collides with the reserved control channel.
    #[error("channel {channel:?} is reserved as the control channel")]
    ReservedChannel {
        /// The offending channel name.
        channel: String,
    },

    /// A multiplier was zero or could not be parsed.
    #[error("invalid multiplier {value:?}: must be an integer >= 1")]
    InvalidMultiplier {
        /// The raw value as found in configuration.
        value: String,
    },

    /// Learning rate outside `[0, 1]` or not finite.
    #[error("invalid learning rate {value}: must be within [0, 1]")]
    InvalidLearningRate {
        /// The rejected value.
        value: f64,
    },

    /// The configuration file could not be read or parsed.
    #[error("cannot load configuration: {reason}")]
    Load {
        /// Human-readable cause (I/O or TOML error).
        reason: String,
    },

    /// The requested bus backend is unknown or not compiled in.
    #[error("unsupported bus backend {backend:?}")]
    UnsupportedBackend {
        /// Backend name as configured.
        backend: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::NoChannels => "config_no_channels",
            ConfigError::NoMultipliers => "config_no_multipliers",
            ConfigError::EmptyChannel => "config_empty_channel",
            ConfigError::ReservedChannel { .. } => "config_reserved_channel",
            ConfigError::InvalidMultiplier { .. } => "config_invalid_multiplier",
            ConfigError::InvalidLearningRate { .. } => "config_invalid_learning_rate",
            ConfigError::Load { .. } => "config_load",
            ConfigError::UnsupportedBackend { .. } => "config_unsupported_backend",
        }
    }
}

/// # Errors produced by the pub/sub bus.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus could not be reached.
    #[error("cannot connect to bus: {reason}")]
    Connect {
        /// Underlying cause.
        reason: String,
    },

    /// Subscribing to a channel failed.
    #[error("subscribe to {channel:?} failed: {reason}")]
    Subscribe {
        /// Channel that was being subscribed.
        channel: String,
        /// Underlying cause.
        reason: String,
    },

    /// Writing a value failed.
    #[error("publish to {key:?} failed: {reason}")]
    Publish {
        /// Key that was being written.
        key: String,
        /// Underlying cause.
        reason: String,
    },

    /// Receiving the next message failed.
    #[error("receive failed: {reason}")]
    Receive {
        /// Underlying cause.
        reason: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use pulsevisor::BusError;
    ///
    /// let err = BusError::Publish { key: "x4.clock".into(), reason: "closed".into() };
    /// assert_eq!(err.as_label(), "bus_publish");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Connect { .. } => "bus_connect",
            BusError::Subscribe { .. } => "bus_subscribe",
            BusError::Publish { .. } => "bus_publish",
            BusError::Receive { .. } => "bus_receive",
        }
    }
}

/// # Errors that stop a single multiplier task.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The bus failed while the task (or one of its timers) was using it.
    #[error("task {task}: {source}")]
    Bus {
        /// Output key of the failing task.
        task: String,
        /// The bus failure.
        #[source]
        source: BusError,
    },

    /// The task panicked or was aborted before reaching its stopped state.
    #[error("task {task} did not stop cleanly: {reason}")]
    Join {
        /// Output key of the failing task (or `"unknown"`).
        task: String,
        /// Join failure description.
        reason: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Bus { .. } => "task_bus",
            TaskError::Join { .. } => "task_join",
        }
    }

    /// Returns the output key of the task that failed.
    pub fn task(&self) -> &str {
        match self {
            TaskError::Bus { task, .. } | TaskError::Join { task, .. } => task,
        }
    }
}

/// # Errors produced by the pulsevisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration was rejected before any task started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The bus failed outside of any task (startup or shutdown broadcast).
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A multiplier task stopped with an error.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Shutdown grace period was exceeded; some tasks remained blocked and were aborted.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Output keys of the tasks that did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use pulsevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Config(e) => e.as_label(),
            RuntimeError::Bus(e) => e.as_label(),
            RuntimeError::Task(e) => e.as_label(),
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_keeps_source() {
        let err = TaskError::Bus {
            task: "x2.clock".into(),
            source: BusError::Publish {
                key: "x2.clock".into(),
                reason: "connection reset".into(),
            },
        };
        assert_eq!(err.task(), "x2.clock");
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(RuntimeError::from(err).as_label(), "task_bus");
    }

    #[test]
    fn config_error_labels_are_stable() {
        let err = ConfigError::InvalidLearningRate { value: 1.5 };
        assert_eq!(err.as_label(), "config_invalid_learning_rate");
        assert_eq!(RuntimeError::from(err).as_label(), "config_invalid_learning_rate");
    }
}
