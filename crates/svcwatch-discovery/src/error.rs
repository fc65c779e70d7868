//! Error types for the discovery engine

use std::net::IpAddr;
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors surfaced by discovery engines and the stream factory
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The engine instance was started more than once
    #[error("Discovery engine has already been started")]
    AlreadyStarted,

    /// The shared resolver could not be created or bound for this subscription
    #[error("{variant} discovery failed for type {service_type} with cause: {source}")]
    CreationFailed {
        variant: &'static str,
        service_type: String,
        #[source]
        source: ResolverError,
    },

    /// A resolved service carried a port outside 0..=65535
    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    /// The requested service type is not a DNS-SD service type
    #[error("Invalid service type: '{0}'")]
    InvalidServiceType(String),

    /// No engine is registered for the requested variant
    #[error("Unknown discovery variant: {0}")]
    UnknownVariant(String),

    /// Internal error
    #[error("Internal discovery error: {0}")]
    Internal(String),
}

/// Errors reported by a resolver backend
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The mDNS daemon failed to start or rejected a command
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    /// The listening interface could not be selected
    #[error("Failed to bind interface {interface}: {reason}")]
    Interface { interface: IpAddr, reason: String },

    /// The resolver is closing or already closed
    #[error("Resolver is closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_failed_message() {
        let err = DiscoveryError::CreationFailed {
            variant: "MdnsDiscovery",
            service_type: "_http._tcp.local.".to_string(),
            source: ResolverError::Daemon("socket bind failed".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "MdnsDiscovery discovery failed for type _http._tcp.local. with cause: mDNS daemon error: socket bind failed"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_port_message() {
        assert_eq!(DiscoveryError::InvalidPort(70000).to_string(), "Invalid port: 70000");
    }
}
