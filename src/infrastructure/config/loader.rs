use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project config file, created by hand or by deployment tooling.
pub const CONFIG_FILE: &str = "subject-flow.yaml";
/// Optional local overrides, usually kept out of version control.
pub const LOCAL_CONFIG_FILE: &str = "subject-flow.local.yaml";
pub const ENV_PREFIX: &str = "SUBJECT_FLOW_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("graph_file cannot be empty")]
    EmptyGraphFile,

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid poll_interval_ms: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid sweeper interval_ms: {0}. Must be at least 1")]
    InvalidSweepInterval(u64),

    #[error("Invalid max_consecutive_failures: {0}. Must be at least 1")]
    InvalidMaxFailures(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. subject-flow.yaml
    /// 3. subject-flow.local.yaml
    /// 4. Environment variables (`SUBJECT_FLOW_*`, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(CONFIG_FILE))
                .merge(Yaml::file(LOCAL_CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
        .context("Failed to load configuration")
    }

    /// Load configuration from a specific file instead of the default files.
    ///
    /// Environment variables still take precedence.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
        .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .extract()
            .context("Failed to extract configuration from figment")?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.graph_file.trim().is_empty() {
            return Err(ConfigError::EmptyGraphFile);
        }

        if config.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if config.bus.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.bus.poll_interval_ms));
        }
        if config.bus.group_id.trim().is_empty() {
            return Err(ConfigError::EmptyField("bus.group_id"));
        }
        if config.bus.subject_ready_topic.trim().is_empty() {
            return Err(ConfigError::EmptyField("bus.subject_ready_topic"));
        }

        if config.controller.default_worker.trim().is_empty() {
            return Err(ConfigError::EmptyField("controller.default_worker"));
        }

        if config.sweeper.interval_ms == 0 {
            return Err(ConfigError::InvalidSweepInterval(config.sweeper.interval_ms));
        }
        if config.sweeper.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidMaxFailures(config.sweeper.max_consecutive_failures));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::Backend;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graph_file, "graph.yaml");
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.bus.subject_ready_topic, "subject-ready");
        assert_eq!(config.controller.default_timeout_ms, 300_000);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
graph_file: /etc/subject-flow/graph.yaml
backend: memory
bus:
  group_id: replicas
controller:
  default_timeout_ms: 120000
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.bus.group_id, "replicas");
        assert_eq!(config.bus.poll_interval_ms, 500);
        assert_eq!(config.controller.default_timeout_ms, 120_000);
        assert_eq!(config.logging.format, "pretty");
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "graph_file: from-file.yaml\nsweeper:\n  interval_ms: 750").unwrap();

        temp_env::with_vars(
            [
                ("SUBJECT_FLOW_GRAPH_FILE", Some("from-env.yaml")),
                ("SUBJECT_FLOW_DATABASE__MAX_CONNECTIONS", Some("2")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.graph_file, "from-env.yaml");
                assert_eq!(config.database.max_connections, 2);
                assert_eq!(config.sweeper.interval_ms, 750);
            },
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = ConfigLoader::load_from_file("/nonexistent/subject-flow.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConnections(0)
        ));
    }

    #[test]
    fn test_validate_intervals() {
        let mut config = Config::default();
        config.bus.poll_interval_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidPollInterval(0)
        ));

        let mut config = Config::default();
        config.sweeper.interval_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidSweepInterval(0)
        ));
    }

    #[test]
    fn test_validate_empty_fields() {
        let mut config = Config::default();
        config.graph_file = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyGraphFile
        ));

        let mut config = Config::default();
        config.bus.subject_ready_topic = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyField("bus.subject_ready_topic")
        ));
    }

    #[test]
    fn test_validate_logging() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidRotation(_)
        ));
    }
}
