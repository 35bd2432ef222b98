//! Service configuration loaded from a TOML file

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::env::HOOKD_CONFIG;

/// Default config file name, resolved relative to the working directory
/// unless overridden via `HOOKD_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "hookd.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard ceiling on a single handler invocation; a handler that exceeds
    /// it is treated as a retryable fault
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Retry ceiling used when the caller does not override it
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Delay before a retry when the handler does not supply one
    #[serde(default = "default_retry_delay")]
    pub default_retry_delay_secs: f64,

    /// Cleanup sweeps scheduled actions older than this
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_handler_timeout() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    30.0
}

fn default_retention_hours() -> u64 {
    24
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_handler_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            default_retry_delay_secs: default_retry_delay(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `HOOKD_CONFIG` or the default file; a missing file means
    /// defaults, not an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var(HOOKD_CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.executor.handler_timeout_ms, 5000);
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert_eq!(config.scheduler.default_retry_delay_secs, 30.0);
        assert_eq!(config.scheduler.retention_hours, 24);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/hookd.toml")).unwrap();
        assert_eq!(config.scheduler.default_max_retries, 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hookd.toml");
        fs::write(
            &path,
            r#"
[scheduler]
default_max_retries = 5

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.scheduler.default_max_retries, 5);
        assert_eq!(config.scheduler.default_retry_delay_secs, 30.0);
        assert_eq!(config.executor.handler_timeout_ms, 5000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hookd.toml");
        fs::write(&path, "not valid toml [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
