//! Configuration types for service discovery

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Configuration for the discovery streams opened by the watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// DNS-SD service types to watch (e.g. `_http._tcp.local.`)
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,

    /// Interface address to listen on (all interfaces if not set)
    #[serde(default)]
    pub interface: Option<IpAddr>,

    /// Discovery engine variant to use
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Number of events buffered per stream before the engine waits on the consumer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_types: default_service_types(),
            interface: None,
            variant: default_variant(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DiscoveryConfig {
    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.service_types.is_empty() {
            return Err("at least one service type must be configured".to_string());
        }

        if let Some(bad) = self.service_types.iter().find(|t| !t.starts_with('_')) {
            return Err(format!(
                "service type '{}' must start with an underscore",
                bad
            ));
        }

        if let Some(bad) = self.service_types.iter().find(|t| !has_protocol(t)) {
            return Err(format!(
                "service type '{}' must name a protocol (._tcp or ._udp)",
                bad
            ));
        }

        if self.event_buffer == 0 {
            return Err("event_buffer cannot be 0".to_string());
        }

        if self.variant.trim().is_empty() {
            return Err("variant cannot be empty".to_string());
        }

        Ok(())
    }
}

/// True when `service_type` carries a `_tcp` or `_udp` protocol label,
/// with or without the trailing `.local.` domain
fn has_protocol(service_type: &str) -> bool {
    let trimmed = service_type.trim();
    ["._tcp", "._udp"].iter().any(|proto| {
        trimmed.ends_with(proto) || trimmed.contains(&format!("{}.", proto))
    })
}

fn default_service_types() -> Vec<String> {
    vec!["_http._tcp.local.".to_string()]
}

fn default_variant() -> String {
    "mdns".to_string()
}

fn default_event_buffer() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.variant, "mdns");
        assert!(config.interface.is_none());
    }

    #[test]
    fn test_rejects_empty_service_types() {
        let config = DiscoveryConfig {
            service_types: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let config = DiscoveryConfig {
            event_buffer: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            "event_buffer cannot be 0"
        );
    }

    #[test]
    fn test_rejects_malformed_service_type() {
        let config = DiscoveryConfig {
            service_types: vec!["http._tcp.local.".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_service_type_without_protocol() {
        for bad in ["_foo", "_http._tcpx.local.", "_http.local."] {
            let config = DiscoveryConfig {
                service_types: vec![bad.to_string()],
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.contains("must name a protocol"), "{bad}: {err}");
        }
    }

    #[test]
    fn test_accepts_short_and_qualified_service_types() {
        let config = DiscoveryConfig {
            service_types: vec![
                "_http._tcp".to_string(),
                "_ipp._tcp.local".to_string(),
                "_sip._udp.local.".to_string(),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
