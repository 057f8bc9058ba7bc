//! File configuration for the `pulsevisor` binary.
//!
//! Configuration is loaded once at startup from a TOML file (default
//! `pulsevisor.toml`) and resolved into a runtime [`Config`] plus the task set.
//!
//! ```toml
//! [bus]
//! backend = "redis"
//! hostname = "localhost"
//! port = 6379
//!
//! [clock]
//! channel = "launchcontrol.note, launchcontrol.control"
//! rate = [2, 4]
//! learning_rate = 1.0
//!
//! [general]
//! debug = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::validate_learning_rate;
use crate::core::{Config, DEFAULT_CONTROL_CHANNEL};
use crate::error::ConfigError;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Bus backend and its address.
    #[serde(default)]
    pub bus: BusSettings,

    /// Channels, multipliers and interval learning.
    #[serde(default)]
    pub clock: ClockSettings,

    /// Diagnostics and shutdown.
    #[serde(default)]
    pub general: GeneralSettings,
}

/// Which bus implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Redis `SET` + `PUBLISH` / `SUBSCRIBE` (feature `redis`).
    Redis,
    /// In-process bus; only useful when embedding or testing.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusSettings {
    /// `"redis"` or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_backend() -> String {
    "redis".to_string()
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            hostname: default_hostname(),
            port: default_port(),
        }
    }
}

impl BusSettings {
    /// Parses the backend name (case-insensitive).
    pub fn backend(&self) -> Result<Backend, ConfigError> {
        match self.backend.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Backend::Redis),
            "memory" => Ok(Backend::Memory),
            _ => Err(ConfigError::UnsupportedBackend {
                backend: self.backend.clone(),
            }),
        }
    }

    /// Connection URL for the Redis backend, database 0.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/0", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockSettings {
    /// Source channels.
    #[serde(default)]
    pub channel: StringList,

    /// Multipliers applied to every channel.
    #[serde(default)]
    pub rate: RateList,

    /// Interval smoothing factor in `[0, 1]`.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Reserved channel used to wake every task on shutdown.
    #[serde(default = "default_control_channel")]
    pub control_channel: String,
}

fn default_learning_rate() -> f64 {
    1.0
}

fn default_control_channel() -> String {
    DEFAULT_CONTROL_CHANNEL.to_string()
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            channel: StringList::default(),
            rate: RateList::default(),
            learning_rate: default_learning_rate(),
            control_channel: default_control_channel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralSettings {
    /// `> 0` enables the periodic pulse-count report.
    #[serde(default)]
    pub debug: u32,

    /// Period of the pulse-count report in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,

    /// Shutdown grace period in milliseconds.
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
}

fn default_report_interval() -> u64 {
    1_000
}

fn default_grace() -> u64 {
    5_000
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            debug: 0,
            report_interval_ms: default_report_interval(),
            grace_ms: default_grace(),
        }
    }
}

/// A list of names, written either as a TOML array or as one delimited string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StringList {
    List(Vec<String>),
    Joined(String),
}

impl Default for StringList {
    fn default() -> Self {
        StringList::List(Vec::new())
    }
}

impl StringList {
    /// Trimmed, non-empty items in order.
    pub fn items(&self) -> Vec<String> {
        match self {
            StringList::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            StringList::Joined(joined) => split_list(joined),
        }
    }
}

/// A list of multipliers: a TOML array, a single integer or a delimited string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RateList {
    List(Vec<i64>),
    Single(i64),
    Joined(String),
}

impl Default for RateList {
    fn default() -> Self {
        RateList::List(Vec::new())
    }
}

impl RateList {
    /// Parses every multiplier; each must be an integer `>= 1`.
    pub fn multipliers(&self) -> Result<Vec<u32>, ConfigError> {
        match self {
            RateList::List(values) => values.iter().map(|&v| to_multiplier(v)).collect(),
            RateList::Single(value) => Ok(vec![to_multiplier(*value)?]),
            RateList::Joined(joined) => split_list(joined)
                .into_iter()
                .map(|item| {
                    item.parse::<i64>()
                        .map_err(|_| ConfigError::InvalidMultiplier { value: item.clone() })
                        .and_then(to_multiplier)
                })
                .collect(),
        }
    }
}

fn to_multiplier(value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v >= 1)
        .ok_or_else(|| ConfigError::InvalidMultiplier {
            value: value.to_string(),
        })
}

/// Splits a delimited list.
///
/// The separator is the first of `,`, `-`, tab or space present in the
/// string. Repeated separators and surrounding whitespace are ignored.
pub fn split_list(joined: &str) -> Vec<String> {
    let separator = [',', '-', '\t']
        .into_iter()
        .find(|sep| joined.contains(*sep))
        .unwrap_or(' ');

    joined
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Load settings from `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            reason: format!("read {}: {e}", path.display()),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Load { reason } => ConfigError::Load {
                reason: format!("parse {}: {reason}", path.display()),
            },
            other => other,
        })
    }

    /// Parse settings from a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Load {
            reason: e.to_string(),
        })
    }

    pub fn channels(&self) -> Vec<String> {
        self.clock.channel.items()
    }

    pub fn multipliers(&self) -> Result<Vec<u32>, ConfigError> {
        self.clock.rate.multipliers()
    }

    /// Checks everything that must hold before any task starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus.backend()?;
        let channels = self.channels();
        if channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if let Some(channel) = channels.iter().find(|c| **c == self.clock.control_channel) {
            return Err(ConfigError::ReservedChannel {
                channel: channel.clone(),
            });
        }
        if self.multipliers()?.is_empty() {
            return Err(ConfigError::NoMultipliers);
        }
        validate_learning_rate(self.clock.learning_rate)?;
        self.runtime_config().validate()
    }

    /// Runtime configuration; the report runs only when `general.debug > 0`.
    pub fn runtime_config(&self) -> Config {
        let report_interval = if self.general.debug > 0 {
            Duration::from_millis(self.general.report_interval_ms)
        } else {
            Duration::ZERO
        };
        Config {
            grace: Duration::from_millis(self.general.grace_ms),
            control_channel: self.clock.control_channel.clone(),
            learning_rate: self.clock.learning_rate,
            report_interval,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.bus.backend().unwrap(), Backend::Redis);
        assert_eq!(settings.bus.redis_url(), "redis://localhost:6379/0");
        assert_eq!(settings.clock.learning_rate, 1.0);
        assert_eq!(settings.clock.control_channel, "CLOCKMULTIPLIER_UNBLOCK");
        assert!(settings.channels().is_empty());
        assert_eq!(settings.validate(), Err(ConfigError::NoChannels));
    }

    #[test]
    fn test_parse_full_settings() {
        let toml = r#"
[bus]
backend = "memory"
hostname = "10.0.0.2"
port = 6380

[clock]
channel = ["launchcontrol.note", "keyboard.note"]
rate = [2, 4]
learning_rate = 0.5

[general]
debug = 1
report_interval_ms = 250
grace_ms = 100
"#;
        let settings = Settings::from_toml(toml).expect("parse failed");
        assert_eq!(settings.bus.backend().unwrap(), Backend::Memory);
        assert_eq!(settings.bus.redis_url(), "redis://10.0.0.2:6380/0");
        assert_eq!(settings.channels(), vec!["launchcontrol.note", "keyboard.note"]);
        assert_eq!(settings.multipliers().unwrap(), vec![2, 4]);
        assert!(settings.validate().is_ok());

        let cfg = settings.runtime_config();
        assert_eq!(cfg.learning_rate, 0.5);
        assert_eq!(cfg.grace, Duration::from_millis(100));
        assert_eq!(cfg.report_every(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_delimited_lists() {
        let toml = r#"
[clock]
channel = "clock,  gate,,beat"
rate = "2 4  8"
"#;
        let settings = Settings::from_toml(toml).expect("parse failed");
        assert_eq!(settings.channels(), vec!["clock", "gate", "beat"]);
        assert_eq!(settings.multipliers().unwrap(), vec![2, 4, 8]);
        assert_eq!(settings.runtime_config().report_every(), None);
    }

    #[test]
    fn test_single_rate() {
        let settings = Settings::from_toml("[clock]\nchannel = \"clock\"\nrate = 3\n").unwrap();
        assert_eq!(settings.multipliers().unwrap(), vec![3]);
    }

    #[test]
    fn test_split_list_separator_priority() {
        assert_eq!(split_list("a,b-c d"), vec!["a", "b-c d"]);
        assert_eq!(split_list("2-4-8"), vec!["2", "4", "8"]);
        assert_eq!(split_list("a\tb c"), vec!["a", "b c"]);
        assert_eq!(split_list("  a   b "), vec!["a", "b"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_invalid_settings() {
        let zero = Settings::from_toml("[clock]\nchannel = \"clock\"\nrate = [2, 0]\n").unwrap();
        assert_eq!(
            zero.validate(),
            Err(ConfigError::InvalidMultiplier { value: "0".into() })
        );

        let text = Settings::from_toml("[clock]\nchannel = \"clock\"\nrate = \"2,x\"\n").unwrap();
        assert_eq!(
            text.validate(),
            Err(ConfigError::InvalidMultiplier { value: "x".into() })
        );

        let no_rate = Settings::from_toml("[clock]\nchannel = \"clock\"\n").unwrap();
        assert_eq!(no_rate.validate(), Err(ConfigError::NoMultipliers));

        let reserved = Settings::from_toml(
            "[clock]\nchannel = \"CLOCKMULTIPLIER_UNBLOCK\"\nrate = 2\n",
        )
        .unwrap();
        assert!(matches!(
            reserved.validate(),
            Err(ConfigError::ReservedChannel { .. })
        ));

        let lr =
            Settings::from_toml("[clock]\nchannel = \"clock\"\nrate = 2\nlearning_rate = 1.5\n")
                .unwrap();
        assert_eq!(
            lr.validate(),
            Err(ConfigError::InvalidLearningRate { value: 1.5 })
        );

        let backend = Settings::from_toml("[bus]\nbackend = \"zmq\"\n").unwrap();
        assert_eq!(
            backend.bus.backend(),
            Err(ConfigError::UnsupportedBackend { backend: "zmq".into() })
        );
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("pulsevisor-{}.toml", std::process::id()));
        std::fs::write(&path, "[clock]\nchannel = \"clock\"\nrate = [4]\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(settings.channels(), vec!["clock"]);

        let missing = Settings::load(&path).unwrap();
        assert_eq!(missing, Settings::default());

        let err = Settings::load_from(&path).unwrap_err();
        assert_eq!(err.as_label(), "config_load");
    }

    #[test]
    fn test_parse_error_is_load_error() {
        let err = Settings::from_toml("[clock\n").unwrap_err();
        assert_eq!(err.as_label(), "config_load");
    }
}
