//! Reference-counted registry of shared resolvers
//!
//! Every listening interface maps to at most one live resolver. Engines hold
//! a [`ResolverLease`]; the resolver is created by the first lease for its
//! interface and closed when the last lease is dropped. The refcount, the
//! create and the close all happen under one mutex, so a release that closes
//! a resolver can never interleave with an acquire that would reuse it.

use crate::error::ResolverError;
use crate::mdns::MdnsConnector;
use crate::resolver::{Resolver, ResolverConnector};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry key: the listening interface, `None` for all interfaces
pub type InterfaceKey = Option<IpAddr>;

struct Entry {
    resolver: Arc<dyn Resolver>,
    refcount: usize,
}

/// Outcome of [`ResolverRegistry::acquire`]
pub enum Acquired {
    /// A lease on a live resolver
    Lease(ResolverLease),

    /// The registered resolver is closing; nothing was acquired
    Closing,
}

/// Shared resolvers keyed by interface
pub struct ResolverRegistry {
    connector: Arc<dyn ResolverConnector>,
    entries: Mutex<HashMap<InterfaceKey, Entry>>,
}

impl ResolverRegistry {
    pub fn new(connector: Arc<dyn ResolverConnector>) -> Arc<Self> {
        Arc::new(Self {
            connector,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Registry backed by mdns-sd daemons
    pub fn mdns() -> Arc<Self> {
        Self::new(Arc::new(MdnsConnector))
    }

    /// Acquires the resolver for `interface`, creating it if absent.
    ///
    /// A resolver that is closing is never resurrected: the call returns
    /// [`Acquired::Closing`] and leaves the refcount untouched.
    pub fn acquire(self: &Arc<Self>, interface: InterfaceKey) -> Result<Acquired, ResolverError> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&interface) {
            if !entry.resolver.is_available() {
                warn!(interface = ?interface, "Resolver is closing, acquire ignored");
                return Ok(Acquired::Closing);
            }
            entry.refcount += 1;
            debug!(interface = ?interface, refcount = entry.refcount, "Resolver reused");
            return Ok(Acquired::Lease(ResolverLease::new(
                self.clone(),
                interface,
                entry.resolver.clone(),
            )));
        }

        let resolver = self.connector.connect(interface)?;
        entries.insert(
            interface,
            Entry {
                resolver: resolver.clone(),
                refcount: 1,
            },
        );
        info!(interface = ?interface, "Resolver created");

        Ok(Acquired::Lease(ResolverLease::new(
            self.clone(),
            interface,
            resolver,
        )))
    }

    /// Releases one reference on `resolver` and returns the remaining count.
    ///
    /// At zero the resolver is closed and removed. A resolver already closing
    /// is evicted and closed regardless of its count, and 0 is returned. A
    /// release for a resolver that is no longer the registered one (it was
    /// evicted and replaced) leaves the current entry untouched and returns 0.
    pub(crate) fn release(&self, interface: InterfaceKey, resolver: &Arc<dyn Resolver>) -> usize {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&interface) else {
            return 0;
        };

        if !same_resolver(&entry.resolver, resolver) {
            debug!(interface = ?interface, "Stale lease released, resolver already replaced");
            return 0;
        }

        if !entry.resolver.is_available() {
            if let Some(stale) = entries.remove(&interface) {
                stale.resolver.close();
            }
            debug!(interface = ?interface, "Evicted closing resolver");
            return 0;
        }

        entry.refcount = entry.refcount.saturating_sub(1);
        let remaining = entry.refcount;
        if remaining == 0 {
            if let Some(last) = entries.remove(&interface) {
                last.resolver.close();
            }
            info!(interface = ?interface, "Resolver closed, no subscribers left");
        } else {
            debug!(interface = ?interface, refcount = remaining, "Resolver released");
        }

        remaining
    }

    /// Current reference count for `interface` (0 when absent)
    pub fn refcount(&self, interface: InterfaceKey) -> usize {
        self.entries
            .lock()
            .get(&interface)
            .map(|entry| entry.refcount)
            .unwrap_or(0)
    }

    pub fn is_active(&self, interface: InterfaceKey) -> bool {
        self.entries.lock().contains_key(&interface)
    }

    /// Number of live resolvers
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        let counts: HashMap<_, _> = entries.iter().map(|(k, e)| (*k, e.refcount)).collect();
        f.debug_struct("ResolverRegistry")
            .field("entries", &counts)
            .finish()
    }
}

fn same_resolver(a: &Arc<dyn Resolver>, b: &Arc<dyn Resolver>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// One reference on a shared resolver; dropping it releases the reference
pub struct ResolverLease {
    registry: Arc<ResolverRegistry>,
    interface: InterfaceKey,
    resolver: Arc<dyn Resolver>,
    released: bool,
}

impl ResolverLease {
    fn new(
        registry: Arc<ResolverRegistry>,
        interface: InterfaceKey,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            registry,
            interface,
            resolver,
            released: false,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    pub fn interface(&self) -> InterfaceKey {
        self.interface
    }

    /// Releases the reference now, returning the remaining count
    pub fn release(mut self) -> usize {
        self.released = true;
        self.registry.release(self.interface, &self.resolver)
    }
}

impl Drop for ResolverLease {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(self.interface, &self.resolver);
        }
    }
}

impl fmt::Debug for ResolverLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverLease")
            .field("interface", &self.interface)
            .finish()
    }
}
