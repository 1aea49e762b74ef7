use serde::{Deserialize, Serialize};

use crate::circuit::CircuitBreakerOptions;
use crate::retry::RetryPolicyOptions;

/// Global configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryPolicyOptions,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerOptions,
    #[serde(default)]
    pub for_each: ForEachConfig,
    #[serde(default)]
    pub validate: ValidateConfig,
}

/// Default fan-out parallelism applied when a task omits `forEach.maxParallel`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForEachConfig {
    pub default_max_parallel: i64,
}

impl Default for ForEachConfig {
    fn default() -> Self {
        Self {
            default_max_parallel: 10,
        }
    }
}

/// Configuration for the 'validate' command.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidateConfig {
    /// Show verbose output including all expressions checked.
    #[serde(default)]
    pub verbose: bool,
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Command line arguments (highest priority, merged by the caller)
    /// 2. Environment variables (`CORVUS__*`)
    /// 3. Config file (`corvus.yaml` in the current dir or `~/.config/corvus/corvus.yaml`)
    /// 4. Defaults (lowest priority)
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(
                config::File::with_name("corvus")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::File::with_name(&format!(
                    "{}/.config/corvus/corvus",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .format(config::FileFormat::Yaml)
                .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CORVUS")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = config_builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_retry_count, 3);
        assert_eq!(config.for_each.default_max_parallel, 10);
        assert!(!config.validate.verbose);
    }
}
