//! Resolver backend contract
//!
//! A resolver owns the sockets and protocol state for one listening
//! interface. Engines never call into it from the resolver's own threads:
//! listeners are plain channel senders and every notification is posted as a
//! [`ResolverEvent`] for the engine's translation loop to consume.

use crate::error::ResolverError;
use async_channel::Sender;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Identifier of a listener registered with a resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Service data as delivered by the resolver, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawService {
    /// Instance name without the service type suffix
    pub name: String,
    pub service_type: String,
    pub addresses: Vec<IpAddr>,
    /// Port as reported on the wire; validated when the descriptor is built
    pub port: u32,
    pub txt: Vec<(String, String)>,
}

impl RawService {
    /// A service known only by name, as carried by removal notifications
    pub fn named(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            ..Default::default()
        }
    }
}

/// Low-level notification posted to a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverEvent {
    /// An instance appeared; its details are not resolved yet
    Found { service_type: String, name: String },

    /// An instance was fully resolved
    Resolved(RawService),

    /// An instance left the network
    Removed(RawService),
}

/// Operations an engine needs from a shared resolver connection
pub trait Resolver: Send + Sync {
    /// Registers `listener` for notifications about `service_type`
    fn add_listener(
        &self,
        service_type: &str,
        listener: Sender<ResolverEvent>,
    ) -> Result<ListenerId, ResolverError>;

    /// Deregisters a listener; unknown ids are ignored
    fn remove_listener(&self, service_type: &str, id: ListenerId);

    /// Asks the resolver to resolve a found instance
    fn request_resolution(&self, service_type: &str, name: &str);

    /// Closes the resolver. Repeated calls are no-ops.
    fn close(&self);

    fn is_closing(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// True unless the resolver is closing or closed
    fn is_available(&self) -> bool {
        !(self.is_closing() || self.is_closed())
    }
}

/// Creates resolvers bound to a listening interface
pub trait ResolverConnector: Send + Sync {
    /// Opens a resolver on `interface`, or on every interface when `None`
    fn connect(&self, interface: Option<IpAddr>) -> Result<Arc<dyn Resolver>, ResolverError>;
}

/// Strips the `.<service_type>` suffix from a DNS-SD full name
///
/// `"Printer._http._tcp.local."` with type `"_http._tcp.local."` yields
/// `"Printer"`. Names that do not carry the suffix are returned unchanged.
pub fn instance_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
    fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(fullname)
}
