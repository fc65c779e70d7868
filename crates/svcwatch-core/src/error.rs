//! Error types for configuration loading and validation.

use thiserror::Error;

/// Result type alias using [`ConfigError`] as the error type.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load configuration file
    #[error("Failed to load config from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Configuration could not be deserialized
    #[error("Invalid config format: {reason}")]
    InvalidFormat { reason: String },

    /// A configuration value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::LoadFailed {
            path: "svcwatch.yaml".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load config from svcwatch.yaml: not found"
        );

        let err = ConfigError::Invalid("event_buffer cannot be 0".to_string());
        assert!(err.to_string().contains("event_buffer"));
    }
}
