use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::Config;
use crate::infrastructure::logging::config::{is_valid_format, is_valid_rotation};

pub const PROJECT_CONFIG_PATH: &str = ".sqlproxy/config.yaml";
pub const LOCAL_CONFIG_PATH: &str = ".sqlproxy/local.yaml";
pub const ENV_PREFIX: &str = "SQLPROXY_";

const MAX_CONCURRENT_RECONCILES: usize = 64;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_reconciles: {0}. Must be between 1 and 64")]
    InvalidConcurrency(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Image for {0} cannot be empty")]
    EmptyImage(&'static str),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .sqlproxy/config.yaml
    /// 3. .sqlproxy/local.yaml
    /// 4. Environment variables (SQLPROXY_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(Path::new(PROJECT_CONFIG_PATH))
            .merge(Yaml::file(LOCAL_CONFIG_PATH))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        let config: Config = Self::figment(path)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENT_RECONCILES).contains(&config.max_concurrent_reconciles) {
            return Err(ConfigError::InvalidConcurrency(
                config.max_concurrent_reconciles,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !is_valid_format(&config.logging.format) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if !is_valid_rotation(&config.logging.rotation) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.images.proxy.trim().is_empty() {
            return Err(ConfigError::EmptyImage("proxy"));
        }
        if config.images.exporter.trim().is_empty() {
            return Err(ConfigError::EmptyImage("exporter"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_reconciles, 1);
        assert_eq!(config.requeue_interval_ms, 0);
        assert!(config.requeue_interval().is_none());
        assert!(!config.suspend_enabled);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retry.max_backoff_ms, 300_000);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
requeue_interval_ms: 30000
suspend_enabled: true
max_concurrent_reconciles: 8
images:
  proxy: registry.local/proxy:1.0
logging:
  level: debug
  format: pretty
retry:
  initial_backoff_ms: 500
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.requeue_interval_ms, 30_000);
        assert!(config.suspend_enabled);
        assert_eq!(config.max_concurrent_reconciles, 8);
        assert_eq!(config.images.proxy, "registry.local/proxy:1.0");
        assert_eq!(config.images.exporter, Config::default().images.exporter);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.retry.max_retries, 3);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_concurrency_bounds() {
        for invalid in [0, 65] {
            let config = Config {
                max_concurrent_reconciles: invalid,
                ..Default::default()
            };
            assert!(matches!(
                ConfigLoader::validate(&config),
                Err(ConfigError::InvalidConcurrency(n)) if n == invalid
            ));
        }
        let config = Config {
            max_concurrent_reconciles: 64,
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format_and_rotation() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRotation(_))
        ));
    }

    #[test]
    fn test_validate_retry() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxRetries(0))
        ));

        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30_000;
        config.retry.max_backoff_ms = 10_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30_000, 10_000))
        ));
    }

    #[test]
    fn test_validate_empty_image() {
        let mut config = Config::default();
        config.images.exporter = " ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyImage("exporter"))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let base = yaml_file("max_concurrent_reconciles: 5\nlogging:\n  level: info\n  format: pretty\n");
        let overlay = yaml_file("max_concurrent_reconciles: 15\nlogging:\n  level: debug\n");

        let config: Config = ConfigLoader::figment(base.path())
            .merge(Yaml::file(overlay.path()))
            .extract()
            .unwrap();

        assert_eq!(config.max_concurrent_reconciles, 15, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "pretty",
            "Base value should persist when not overridden"
        );
    }

    #[test]
    fn test_env_override() {
        let file = yaml_file("max_concurrent_reconciles: 2\nlogging:\n  level: warn\n");
        temp_env::with_vars(
            [
                ("SQLPROXY_MAX_CONCURRENT_RECONCILES", Some("12")),
                ("SQLPROXY_LOGGING__LEVEL", Some("debug")),
                ("SQLPROXY_SUSPEND_ENABLED", Some("true")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.max_concurrent_reconciles, 12);
                assert_eq!(config.logging.level, "debug");
                assert!(config.suspend_enabled);
            },
        );
    }

    #[test]
    fn test_env_override_is_validated() {
        let file = yaml_file("suspend_enabled: false\n");
        temp_env::with_var("SQLPROXY_MAX_CONCURRENT_RECONCILES", Some("100"), || {
            let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
            assert!(err.to_string().contains("max_concurrent_reconciles"));
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::load_from_file(dir.path().join("absent.yaml")).is_err());
    }
}
