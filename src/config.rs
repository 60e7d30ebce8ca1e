use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server tuning.
///
/// ```toml
/// workers = 10
/// grace_period_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Number of handler invocations allowed to run at once. Further calls
    /// queue until a worker frees up.
    pub workers: usize,
    /// How long `stop()` waits for in-flight calls before abandoning them.
    pub grace_period_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period_ms = grace_period.as_millis() as u64;
        self
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub connect_timeout_ms: u64,
    /// Idle connections kept for reuse; extra ones are closed after their call.
    pub max_idle_connections: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
        }
    }
}

impl ChannelConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        assert_eq!(ServerConfig::from_toml("").unwrap(), ServerConfig::default());
        assert_eq!(ChannelConfig::from_toml("").unwrap(), ChannelConfig::default());
    }

    #[test]
    fn parses_server_config() {
        let config = ServerConfig::from_toml("workers = 2\ngrace_period_ms = 250\n").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.grace_period(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_zero_workers_and_unknown_keys() {
        assert!(matches!(
            ServerConfig::from_toml("workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("threads = 4"),
            Err(ConfigError::Parse(_))
        ));
    }
}
