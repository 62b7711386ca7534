//! Configuration for lease pools.
//!
//! Pools take an explicit [`LeasePoolConfig`] at construction; there is no
//! process-wide settings object. Configs can be built in code, taken from
//! [`Default`], or loaded from TOML:
//!
//! ```toml
//! capacity = 4
//! default_lease_ms = 2000
//! acquire_timeout_ms = 500
//! timer_thread_name = "palantir-timer"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the pool cannot work with
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration text could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a [`LeasePool`](crate::LeasePool)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePoolConfig {
    /// Number of resources the pool manages
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Lease duration used by `acquire_default`
    #[serde(
        rename = "default_lease_ms",
        default = "default_lease_duration",
        with = "duration_ms"
    )]
    pub default_lease_duration: Duration,

    /// Upper bound on how long `acquire` waits for admission (`None` waits forever)
    #[serde(
        rename = "acquire_timeout_ms",
        default,
        with = "option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub acquire_timeout: Option<Duration>,

    /// Name given to the pool's expiration timer thread
    #[serde(default = "default_timer_thread_name")]
    pub timer_thread_name: String,
}

fn default_capacity() -> usize {
    4
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(1)
}

fn default_timer_thread_name() -> String {
    "lion-lease-timer".to_string()
}

impl Default for LeasePoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            default_lease_duration: default_lease_duration(),
            acquire_timeout: None,
            timer_thread_name: default_timer_thread_name(),
        }
    }
}

impl LeasePoolConfig {
    /// Default configuration with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Check that the configuration describes a usable pool
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "capacity must be a positive integer".to_string(),
            ));
        }

        if self.default_lease_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "default lease duration must be greater than zero".to_string(),
            ));
        }

        if self.timer_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "timer thread name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render this configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Whole milliseconds, refusing durations that do not fit in a `u64`
fn millis(value: &Duration) -> Result<u64, String> {
    u64::try_from(value.as_millis())
        .map_err(|_| format!("{:?} does not fit in milliseconds", value))
}

mod duration_ms {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::millis(value).map_err(S::Error::custom)?)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&super::millis(d).map_err(S::Error::custom)?),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
