//! Configuration types for service discovery
//!
//! Re-exports configuration from svcwatch-core so callers need only one crate

pub use svcwatch_core::discovery_config::DiscoveryConfig;
