//! mDNS / DNS-SD service discovery as cancellable event streams
//!
//! This crate watches the local network for services of a given DNS-SD type
//! and reports them as [`DiscoveryEvent::Added`] once fully resolved and
//! [`DiscoveryEvent::Removed`] when they leave.
//!
//! # Architecture
//!
//! - [`DiscoveryStreamFactory`] is the entry point. It builds one engine per
//!   stream from a compile-time table of [`EngineVariant`]s.
//! - A [`DiscoveryEngine`] acquires the shared resolver for its interface from
//!   a [`ResolverRegistry`], registers a listener for its service type and
//!   translates resolver notifications into events on a single task.
//! - The [`ResolverRegistry`] reference-counts resolvers per interface: the
//!   first subscriber creates one, the last one to cancel closes it.
//! - Resolvers implement the [`Resolver`] trait. The built-in backend wraps
//!   the `mdns-sd` daemon.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use svcwatch_discovery::{DiscoveryEvent, DiscoveryStreamFactory, EngineVariant};
//!
//! #[tokio::main]
//! async fn main() -> svcwatch_discovery::Result<()> {
//!     let factory = DiscoveryStreamFactory::new();
//!     let mut printers = factory.create_stream("_ipp._tcp", None, EngineVariant::Mdns)?;
//!
//!     while let Some(event) = printers.next().await {
//!         match event? {
//!             DiscoveryEvent::Added(service) => println!("+ {}", service),
//!             DiscoveryEvent::Removed(service) => println!("- {}", service),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod mdns;
pub mod registry;
pub mod resolver;
pub mod stream;
pub mod types;

pub use config::DiscoveryConfig;
pub use engine::{Discovery, DiscoveryEngine, EngineState};
pub use error::{DiscoveryError, ResolverError, Result};
pub use factory::{normalize_service_type, DiscoveryStreamFactory, EngineVariant};
pub use mdns::{MdnsConnector, MdnsResolver};
pub use registry::{Acquired, ResolverLease, ResolverRegistry};
pub use resolver::{ListenerId, RawService, Resolver, ResolverConnector, ResolverEvent};
pub use stream::{discovery_channel, CancelHandle, DiscoveryStream, Emitter};
pub use types::{DiscoveryEvent, DiscoveryEventKind, ServiceDescriptor, ServiceDescriptorBuilder};
