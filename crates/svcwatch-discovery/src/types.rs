//! Types for discovered services and discovery events

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::trace;

/// Resolved service detected on the local network.
///
/// Descriptors are immutable snapshots; build them with
/// [`ServiceDescriptorBuilder`]. Equality and hashing cover every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    name: String,
    service_type: String,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
    port: u16,
    attributes: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// Instance name, e.g. "Office Printer"
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service type, e.g. "_http._tcp.local."
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// IPv4 host address, if the service provided one
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4
    }

    /// IPv6 host address, if the service provided one
    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        self.ipv6
    }

    /// Service port (0 when a removal carried none)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// All TXT record pairs, ordered by key
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns the host address, favouring IPv4 over IPv6
    pub fn preferred_address(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }

    /// Returns the preferred address combined with the service port
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.preferred_address()
            .map(|addr| SocketAddr::new(addr, self.port))
    }

    /// Gets a TXT record value by key
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Gets a TXT record value by key, falling back to `default`
    pub fn attribute_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.attribute(key).unwrap_or(default)
    }

    /// Number of TXT records attached to the service
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket_addr() {
            Some(addr) => write!(f, "{} ({}) at {}", self.name, self.service_type, addr),
            None => write!(f, "{} ({})", self.name, self.service_type),
        }
    }
}

/// Accumulates partially resolved data into a [`ServiceDescriptor`].
///
/// A fresh builder is used for every resolution; `build` consumes it.
#[derive(Debug, Clone)]
pub struct ServiceDescriptorBuilder {
    name: String,
    service_type: String,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
    port: u16,
    attributes: BTreeMap<String, String>,
}

impl ServiceDescriptorBuilder {
    /// Starts a builder for the named instance of `service_type`
    pub fn new(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            ipv4: None,
            ipv6: None,
            port: 0,
            attributes: BTreeMap::new(),
        }
    }

    /// Stores the address in the slot for its family, replacing any earlier
    /// address of that family. Unspecified addresses are skipped.
    pub fn address(mut self, addr: IpAddr) -> Self {
        if addr.is_unspecified() {
            trace!(%addr, "Ignoring unspecified address");
            return self;
        }

        match addr {
            IpAddr::V4(v4) => self.ipv4 = Some(v4),
            IpAddr::V6(v6) => self.ipv6 = Some(v6),
        }
        self
    }

    /// Parses and stores a textual address; malformed input is ignored.
    pub fn address_str(self, addr: &str) -> Self {
        match addr.trim().parse::<IpAddr>() {
            Ok(parsed) => self.address(parsed),
            Err(_) => {
                trace!(addr, "Ignoring malformed address");
                self
            }
        }
    }

    /// Stores each address in turn; later addresses win within a family
    ///
    /// ```
    /// use svcwatch_discovery::ServiceDescriptorBuilder;
    ///
    /// let service = ServiceDescriptorBuilder::new("NAS", "_smb._tcp.local.")
    ///     .addresses(["192.168.1.10".parse().unwrap(), "192.168.1.11".parse().unwrap()])
    ///     .build();
    /// assert_eq!(service.ipv4(), Some("192.168.1.11".parse().unwrap()));
    /// assert_eq!(service.port(), 0);
    /// ```
    pub fn addresses<I: IntoIterator<Item = IpAddr>>(self, addrs: I) -> Self {
        addrs.into_iter().fold(self, Self::address)
    }

    /// Adds a TXT record; a repeated key overwrites the previous value
    pub fn txt_record(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the service port, rejecting values above 65535
    pub fn port(mut self, port: u32) -> Result<Self> {
        self.port = u16::try_from(port).map_err(|_| DiscoveryError::InvalidPort(port))?;
        Ok(self)
    }

    /// Finishes the descriptor
    pub fn build(self) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.name,
            service_type: self.service_type,
            ipv4: self.ipv4,
            ipv6: self.ipv6,
            port: self.port,
            attributes: self.attributes,
        }
    }
}

/// Event emitted on a discovery stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event", content = "service", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// Service appeared and was fully resolved
    Added(ServiceDescriptor),

    /// Service left the network
    Removed(ServiceDescriptor),
}

impl DiscoveryEvent {
    /// Service the event refers to
    pub fn descriptor(&self) -> &ServiceDescriptor {
        match self {
            DiscoveryEvent::Added(service) | DiscoveryEvent::Removed(service) => service,
        }
    }

    /// Consumes the event, returning its service
    pub fn into_descriptor(self) -> ServiceDescriptor {
        match self {
            DiscoveryEvent::Added(service) | DiscoveryEvent::Removed(service) => service,
        }
    }

    /// Added or removed, without the payload
    pub fn kind(&self) -> DiscoveryEventKind {
        match self {
            DiscoveryEvent::Added(_) => DiscoveryEventKind::Added,
            DiscoveryEvent::Removed(_) => DiscoveryEventKind::Removed,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, DiscoveryEvent::Added(_))
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, DiscoveryEvent::Removed(_))
    }
}

/// Discriminant of a [`DiscoveryEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryEventKind {
    Added,
    Removed,
}

impl DiscoveryEventKind {
    pub fn description(&self) -> &str {
        match self {
            DiscoveryEventKind::Added => "Service discovered on network",
            DiscoveryEventKind::Removed => "Service removed from network",
        }
    }
}

impl fmt::Display for DiscoveryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEventKind::Added => write!(f, "added"),
            DiscoveryEventKind::Removed => write!(f, "removed"),
        }
    }
}
