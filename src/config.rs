//! Engine configuration.
//!
//! Credential and project configuration loading is owned by the host; the
//! engine only needs the deployment target and a handful of tuning knobs.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, TablestepError};

/// Default interval between provider polls, in seconds.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default timeout for a single stack update, in seconds.
const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 1800;

/// Default timeout for per-table index readiness, in seconds.
const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 3600;

/// Configuration for a deployment target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Environment name (keys the persisted deployment state).
    pub environment: String,
    /// Bucket holding deployment bundles and state.
    pub deployment_bucket: String,
    /// Optional provider region override.
    #[serde(default)]
    pub region: Option<String>,
    /// Name of the root stack all nested stack updates go through.
    pub root_stack_name: String,
    /// Interval between provider polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Timeout for a single stack update, in seconds.
    #[serde(default = "default_update_timeout")]
    pub update_timeout_secs: u64,
    /// Timeout for per-table index readiness, in seconds.
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,
}

const fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_update_timeout() -> u64 {
    DEFAULT_UPDATE_TIMEOUT_SECS
}

const fn default_readiness_timeout() -> u64 {
    DEFAULT_READINESS_TIMEOUT_SECS
}

impl EngineConfig {
    /// Creates a configuration with default tuning.
    #[must_use]
    pub fn new(environment: &str, deployment_bucket: &str, root_stack_name: &str) -> Self {
        Self {
            environment: environment.to_string(),
            deployment_bucket: deployment_bucket.to_string(),
            region: None,
            root_stack_name: root_stack_name.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            update_timeout_secs: DEFAULT_UPDATE_TIMEOUT_SECS,
            readiness_timeout_secs: DEFAULT_READINESS_TIMEOUT_SECS,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            return Err(TablestepError::Config(ConfigError::validation(
                "environment must not be empty",
                "environment",
            )));
        }

        if self.deployment_bucket.trim().is_empty() {
            return Err(TablestepError::Config(ConfigError::validation(
                "deployment bucket must not be empty",
                "deployment_bucket",
            )));
        }

        if self.root_stack_name.trim().is_empty() {
            return Err(TablestepError::Config(ConfigError::validation(
                "root stack name must not be empty",
                "root_stack_name",
            )));
        }

        if self.poll_interval_secs == 0 {
            return Err(TablestepError::Config(ConfigError::validation(
                "poll interval must be at least 1 second",
                "poll_interval_secs",
            )));
        }

        if self.update_timeout_secs < self.poll_interval_secs {
            return Err(TablestepError::Config(ConfigError::validation(
                "update timeout must be at least one poll interval",
                "update_timeout_secs",
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = EngineConfig::new("prod", "deploy-bucket", "app-root");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_environment_rejected() {
        let mut config = EngineConfig::new("prod", "deploy-bucket", "app-root");
        config.environment = String::from("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = EngineConfig::new("prod", "deploy-bucket", "app-root");
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_applied_on_deserialize() {
        let json = r#"{
            "environment": "dev",
            "deployment_bucket": "bucket",
            "root_stack_name": "root"
        }"#;
        let config: EngineConfig = serde_json::from_str(json).expect("config should parse");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.update_timeout_secs, 1800);
        assert!(config.region.is_none());
    }
}
