//! # svcwatch Core
//!
//! Configuration types shared by the svcwatch discovery engine and the
//! `svcwatch` binary:
//!
//! - **Discovery**: which DNS-SD service types to watch, on which interface,
//!   with which engine variant.
//! - **Logging**: level and output format for the `tracing` subscriber.
//! - **Errors**: [`ConfigError`] for load and validation failures.
//!
//! ## Example
//!
//! ```
//! use svcwatch_core::AppConfig;
//!
//! let config = AppConfig::from_yaml("discovery:\n  service_types: [_ipp._tcp.local.]").unwrap();
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;

pub use config::{AppConfig, LogFormat, LoggingConfig};
pub use discovery_config::DiscoveryConfig;
pub use error::{ConfigError, Result};
