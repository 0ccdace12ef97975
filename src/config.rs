use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigurationError;

pub const DEFAULT_QUEUE_NAME: &str = "default";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Options recognised by a queue instance.
///
/// Store connection parameters are deliberately absent: callers construct the
/// store and hand it over.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Isolates independent queues sharing one store.
    #[serde(alias = "queueName")]
    pub queue_name: String,
    /// Period between two poll ticks.
    #[serde(alias = "pollIntervalMs", alias = "interval")]
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_owned(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Config {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms =
            interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Loads a YAML configuration file. Missing fields take their defaults;
    /// the result is validated before being returned.
    pub fn from_path(
        path: impl AsRef<Path>,
    ) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ConfigurationError::Read(format!("{}: {error}", path.display()))
        })?;

        let config: Config = serde_yaml::from_str(&raw).map_err(|error| {
            ConfigurationError::Read(format!("{}: {error}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queue_name.is_empty() {
            return Err(ConfigurationError::EmptyQueueName);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::ZeroPollInterval);
        }
        Ok(())
    }
}
