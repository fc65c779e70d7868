//! Configuration management for the svcwatch service watcher.
//!
//! This module provides a configuration system that supports:
//! - Loading from YAML files
//! - Environment variable overrides (`SVCWATCH__*`)
//! - Validation of discovery and logging settings

use crate::discovery_config::DiscoveryConfig;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "SVCWATCH";

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use svcwatch_core::config::AppConfig;
///
/// let config = AppConfig::from_config_builder("svcwatch.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidFormat {
            reason: e.to_string(),
        })
    }

    /// Loads configuration using the `config` crate, layering
    /// `SVCWATCH__SECTION__KEY` environment variables over the file.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("discovery.service_types")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::InvalidFormat {
                reason: e.to_string(),
            })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate().map_err(ConfigError::Invalid)?;
        self.logging.parse_level()?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,

    /// Whether to include file/line info
    #[serde(default)]
    pub file_line: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Invalid log level: {}", self.level)))
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.discovery.service_types, vec!["_http._tcp.local."]);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
discovery:
  service_types:
    - _ipp._tcp.local.
    - _printer._tcp.local.
  interface: 10.0.0.2
  event_buffer: 32
logging:
  level: debug
  format: json
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.discovery.service_types.len(), 2);
        assert_eq!(
            config.discovery.interface,
            Some("10.0.0.2".parse().unwrap())
        );
        assert_eq!(config.discovery.event_buffer, 32);
        assert_eq!(config.discovery.variant, "mdns");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.parse_level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_invalid_yaml() {
        let result = AppConfig::from_yaml("discovery: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "discovery:\n  event_buffer: 8").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.discovery.event_buffer, 8);
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_file("/nonexistent/svcwatch.yaml");
        assert!(matches!(result, Err(ConfigError::LoadFailed { .. })));
    }

    #[test]
    fn test_config_builder_without_file_uses_defaults() {
        let config = AppConfig::from_config_builder("/nonexistent/svcwatch.yaml").unwrap();
        assert_eq!(config.discovery.event_buffer, 256);
    }
}
