use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure for the reconciliation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Requeue interval applied after a successful tick when the resource
    /// declares none (0 disables the engine-level default)
    #[serde(default)]
    pub requeue_interval_ms: u64,

    /// Broadcast activation state (maintenance/suspend) to every pod
    #[serde(default)]
    pub suspend_enabled: bool,

    /// Log per-object proxy diffs at debug level
    #[serde(default)]
    pub log_proxy_diffs: bool,

    /// Maximum number of distinct resources reconciled concurrently (1-64)
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Default images
    #[serde(default)]
    pub images: ImagesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Error backoff configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

const fn default_max_concurrent_reconciles() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requeue_interval_ms: 0,
            suspend_enabled: false,
            log_proxy_diffs: false,
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            images: ImagesConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Engine default requeue, `None` when disabled.
    pub fn requeue_interval(&self) -> Option<Duration> {
        (self.requeue_interval_ms > 0).then(|| Duration::from_millis(self.requeue_interval_ms))
    }
}

/// Images used when the resource does not pin its own
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ImagesConfig {
    /// Proxy image
    #[serde(default = "default_proxy_image")]
    pub proxy: String,

    /// Metrics exporter image
    #[serde(default = "default_exporter_image")]
    pub exporter: String,
}

fn default_proxy_image() -> String {
    "mariadb/maxscale:23.08".to_string()
}

fn default_exporter_image() -> String {
    "prom/mysqld-exporter:v0.15.1".to_string()
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            proxy: default_proxy_image(),
            exporter: default_exporter_image(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of consecutive failed ticks before backoff stops growing
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
