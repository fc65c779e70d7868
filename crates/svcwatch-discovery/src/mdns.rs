//! mDNS resolver backed by the `mdns-sd` crate
//!
//! This is the only module that touches `mdns_sd` types. One
//! [`MdnsResolver`] wraps one `ServiceDaemon`; listeners for the same
//! service type share a single browse whose events are fanned out by a
//! dedicated thread.

use crate::error::ResolverError;
use crate::resolver::{
    instance_name, ListenerId, RawService, Resolver, ResolverConnector, ResolverEvent,
};
use async_channel::Sender;
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

type Listeners = Arc<Mutex<HashMap<ListenerId, Sender<ResolverEvent>>>>;

/// Opens [`MdnsResolver`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct MdnsConnector;

impl ResolverConnector for MdnsConnector {
    fn connect(&self, interface: Option<IpAddr>) -> Result<Arc<dyn Resolver>, ResolverError> {
        Ok(Arc::new(MdnsResolver::new(interface)?))
    }
}

/// A shared mDNS daemon bound to one interface (or all of them)
pub struct MdnsResolver {
    daemon: ServiceDaemon,
    interface: Option<IpAddr>,
    state: AtomicU8,
    next_listener: AtomicU64,
    /// Listener sets keyed by browsed service type
    browses: Mutex<HashMap<String, Listeners>>,
}

impl MdnsResolver {
    pub fn new(interface: Option<IpAddr>) -> Result<Self, ResolverError> {
        let daemon = ServiceDaemon::new().map_err(|e| ResolverError::Daemon(e.to_string()))?;

        if let Some(addr) = interface {
            let bind = daemon
                .disable_interface(IfKind::All)
                .and_then(|_| daemon.enable_interface(IfKind::Addr(addr)));
            if let Err(e) = bind {
                let _ = daemon.shutdown();
                return Err(ResolverError::Interface {
                    interface: addr,
                    reason: e.to_string(),
                });
            }
        }

        info!(interface = ?interface, "mDNS resolver created");

        Ok(Self {
            daemon,
            interface,
            state: AtomicU8::new(OPEN),
            next_listener: AtomicU64::new(1),
            browses: Mutex::new(HashMap::new()),
        })
    }

    pub fn interface(&self) -> Option<IpAddr> {
        self.interface
    }

    fn start_browse(&self, service_type: &str) -> Result<Listeners, ResolverError> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| ResolverError::Daemon(e.to_string()))?;

        let listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let fanout = listeners.clone();
        let browse_type = service_type.to_string();

        std::thread::Builder::new()
            .name(format!("svcwatch-browse-{}", service_type))
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    let Some(event) = translate(event) else {
                        continue;
                    };
                    let targets: Vec<_> = fanout.lock().values().cloned().collect();
                    for target in targets {
                        if target.try_send(event.clone()).is_err() {
                            trace!(service_type = browse_type, "Listener gone, dropping event");
                        }
                    }
                }
                debug!(service_type = browse_type, "Browse thread stopped");
            })?;

        debug!(service_type, "Browse started");
        Ok(listeners)
    }
}

impl Resolver for MdnsResolver {
    fn add_listener(
        &self,
        service_type: &str,
        listener: Sender<ResolverEvent>,
    ) -> Result<ListenerId, ResolverError> {
        if !self.is_available() {
            return Err(ResolverError::Closed);
        }

        let mut browses = self.browses.lock();
        let listeners = match browses.get(service_type) {
            Some(existing) => existing.clone(),
            None => {
                let created = self.start_browse(service_type)?;
                browses.insert(service_type.to_string(), created.clone());
                created
            }
        };

        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        listeners.lock().insert(id, listener);
        debug!(service_type, listener = %id, "Listener added");
        Ok(id)
    }

    fn remove_listener(&self, service_type: &str, id: ListenerId) {
        let mut browses = self.browses.lock();
        let Some(listeners) = browses.get(service_type) else {
            return;
        };

        let now_empty = {
            let mut set = listeners.lock();
            set.remove(&id);
            set.is_empty()
        };
        debug!(service_type, listener = %id, "Listener removed");

        if now_empty {
            browses.remove(service_type);
            if self.is_available() {
                if let Err(e) = self.daemon.stop_browse(service_type) {
                    debug!(service_type, error = %e, "mDNS stop_browse failed");
                }
            }
        }
    }

    fn request_resolution(&self, service_type: &str, name: &str) {
        // mdns-sd resolves every instance it finds while browsing, so the
        // ServiceResolved notification follows without an explicit query.
        trace!(service_type, name, "Resolution pending");
    }

    fn close(&self) {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        // Dropping the senders ends every listener's event channel.
        self.browses.lock().clear();

        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "mDNS daemon shutdown failed");
        }

        self.state.store(CLOSED, Ordering::SeqCst);
        info!(interface = ?self.interface, "mDNS resolver closed");
    }

    fn is_closing(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CLOSING
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CLOSED
    }
}

impl Drop for MdnsResolver {
    fn drop(&mut self) {
        if self.is_available() {
            warn!("mDNS resolver dropped while still open");
            self.close();
        }
    }
}

fn translate(event: MdnsEvent) -> Option<ResolverEvent> {
    match event {
        MdnsEvent::ServiceFound(service_type, fullname) => Some(ResolverEvent::Found {
            name: instance_name(&fullname, &service_type).to_string(),
            service_type,
        }),
        MdnsEvent::ServiceResolved(info) => Some(ResolverEvent::Resolved(to_raw(&info))),
        MdnsEvent::ServiceRemoved(service_type, fullname) => Some(ResolverEvent::Removed(
            RawService::named(instance_name(&fullname, &service_type), service_type.as_str()),
        )),
        MdnsEvent::SearchStarted(service_type) => {
            trace!(service_type, "Search started");
            None
        }
        MdnsEvent::SearchStopped(service_type) => {
            debug!(service_type, "Search stopped");
            None
        }
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Converts ServiceInfo from mdns-sd into a raw service
fn to_raw(info: &ServiceInfo) -> RawService {
    let service_type = info.get_type().to_string();
    let txt = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    RawService {
        name: instance_name(info.get_fullname(), &service_type).to_string(),
        addresses: info.get_addresses().iter().copied().collect(),
        port: u32::from(info.get_port()),
        txt,
        service_type,
    }
}
