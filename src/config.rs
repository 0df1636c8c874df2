//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine name for identification.
    pub name: String,
    /// Number of queue workers.
    pub num_workers: usize,
    /// Default timeout applied to jobs submitted without one.
    pub default_job_timeout: Duration,
    /// Maximum number of terminal jobs kept in the history buffer.
    pub max_history: usize,
    /// Scheduler scan tick.
    pub tick_interval: Duration,
    /// Default timeout for a single workflow step.
    pub default_step_timeout: Duration,
    /// Maximum captured output per command execution, in bytes.
    pub max_command_output: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "ops-automation".to_string(),
            num_workers: 4,
            default_job_timeout: Duration::from_secs(300), // 5 minutes
            max_history: 500,
            tick_interval: Duration::from_secs(1),
            default_step_timeout: Duration::from_secs(300),
            max_command_output: 64 * 1024,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset. Recognized variables: `ENGINE_NAME`, `ENGINE_WORKERS`,
    /// `ENGINE_JOB_TIMEOUT_SECS`, `ENGINE_MAX_HISTORY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("ENGINE_NAME") {
            config.name = name;
        }
        if let Some(workers) = parse_env("ENGINE_WORKERS")? {
            if workers == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "ENGINE_WORKERS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.num_workers = workers;
        }
        if let Some(secs) = parse_env::<u64>("ENGINE_JOB_TIMEOUT_SECS")? {
            config.default_job_timeout = Duration::from_secs(secs);
        }
        if let Some(max_history) = parse_env("ENGINE_MAX_HISTORY")? {
            config.max_history = max_history;
        }
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_finite() {
        let config = EngineConfig::default();
        assert!(config.num_workers > 0);
        assert!(config.default_job_timeout > Duration::ZERO);
        assert!(config.max_history > 0);
    }
}
