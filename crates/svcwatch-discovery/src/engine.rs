//! Discovery engine
//!
//! A [`DiscoveryEngine`] binds one service type on one interface to the
//! shared resolver for that interface. Resolver notifications arrive on a
//! channel and are translated, one at a time and in arrival order, into
//! [`DiscoveryEvent`]s on the caller's stream.

use crate::error::{DiscoveryError, Result};
use crate::factory::EngineVariant;
use crate::registry::{Acquired, ResolverLease, ResolverRegistry};
use crate::resolver::{ListenerId, RawService, Resolver, ResolverEvent};
use crate::stream::Emitter;
use crate::types::{DiscoveryEvent, ServiceDescriptor, ServiceDescriptorBuilder};
use async_channel::Receiver;
use parking_lot::Mutex;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capability shared by every discovery engine variant
pub trait Discovery: Send + Sync {
    /// Starts discovery, pushing events into `emitter`.
    ///
    /// Fails with [`DiscoveryError::AlreadyStarted`] on any second call,
    /// including one made after `cancel`.
    /// Resolver failures are reported through the emitter, not returned.
    fn start(&self, emitter: Emitter) -> Result<()>;

    /// Stops discovery and releases shared resources. Idempotent.
    fn cancel(&self);

    fn state(&self) -> EngineState;
}

/// Lifecycle of an engine: `Created -> Started -> Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Started,
    Cancelled,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Started => write!(f, "Started"),
            EngineState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Listener registration plus the lease keeping the resolver alive
struct Subscription {
    lease: ResolverLease,
    listener: ListenerId,
}

struct Lifecycle {
    state: EngineState,
    /// Set by the first `start`, including one that finds the engine cancelled
    start_called: bool,
    subscription: Option<Subscription>,
}

struct Shared {
    variant: EngineVariant,
    service_type: String,
    interface: Option<IpAddr>,
    registry: Arc<ResolverRegistry>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

/// Engine translating resolver notifications for one service type
#[derive(Clone)]
pub struct DiscoveryEngine {
    shared: Arc<Shared>,
}

impl DiscoveryEngine {
    pub fn new(
        variant: EngineVariant,
        service_type: impl Into<String>,
        interface: Option<IpAddr>,
        registry: Arc<ResolverRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                variant,
                service_type: service_type.into(),
                interface,
                registry,
                lifecycle: Mutex::new(Lifecycle {
                    state: EngineState::Created,
                    start_called: false,
                    subscription: None,
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn variant(&self) -> EngineVariant {
        self.shared.variant
    }

    pub fn service_type(&self) -> &str {
        &self.shared.service_type
    }

    pub fn interface(&self) -> Option<IpAddr> {
        self.shared.interface
    }

    fn creation_failed(&self, source: crate::error::ResolverError) -> DiscoveryError {
        DiscoveryError::CreationFailed {
            variant: self.shared.variant.name(),
            service_type: self.shared.service_type.clone(),
            source,
        }
    }

    fn unsubscribe(&self, subscription: Subscription) {
        subscription
            .lease
            .resolver()
            .remove_listener(&self.shared.service_type, subscription.listener);
        let remaining = subscription.lease.release();
        debug!(
            service_type = self.shared.service_type,
            remaining, "Released shared resolver"
        );
    }
}

impl Discovery for DiscoveryEngine {
    fn start(&self, emitter: Emitter) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.start_called {
                return Err(DiscoveryError::AlreadyStarted);
            }
            lifecycle.start_called = true;

            if lifecycle.state == EngineState::Cancelled {
                debug!(
                    service_type = self.shared.service_type,
                    "Engine cancelled before start"
                );
                return Ok(());
            }
            lifecycle.state = EngineState::Started;
        }

        let shared = &self.shared;
        info!(
            variant = shared.variant.name(),
            service_type = shared.service_type,
            interface = ?shared.interface,
            "Starting discovery"
        );

        let lease = match shared.registry.acquire(shared.interface) {
            Ok(Acquired::Lease(lease)) => lease,
            Ok(Acquired::Closing) => {
                warn!(
                    service_type = shared.service_type,
                    interface = ?shared.interface,
                    "Shared resolver is closing, stream ends without events"
                );
                return Ok(());
            }
            Err(source) => {
                let error = self.creation_failed(source);
                warn!(error = %error, "Discovery failed to start");
                emitter.on_error(error);
                return Ok(());
            }
        };

        let (listener_tx, listener_rx) = async_channel::unbounded();
        let listener = match lease.resolver().add_listener(&shared.service_type, listener_tx) {
            Ok(id) => id,
            Err(source) => {
                drop(lease);
                let error = self.creation_failed(source);
                warn!(error = %error, "Discovery failed to start");
                emitter.on_error(error);
                return Ok(());
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                lease.resolver().remove_listener(&shared.service_type, listener);
                drop(lease);
                emitter.on_error(DiscoveryError::Internal(e.to_string()));
                return Ok(());
            }
        };

        let resolver = lease.resolver().clone();
        {
            let mut lifecycle = shared.lifecycle.lock();
            if lifecycle.state == EngineState::Cancelled {
                drop(lifecycle);
                self.unsubscribe(Subscription { lease, listener });
                return Ok(());
            }
            lifecycle.subscription = Some(Subscription { lease, listener });
        }

        let engine = self.clone();
        emitter.set_cancel_handler(move || engine.cancel());

        let translator = Translator {
            service_type: shared.service_type.clone(),
            resolver,
            events: listener_rx,
            emitter,
            shutdown: shared.shutdown.clone(),
        };
        runtime.spawn(translator.run());

        Ok(())
    }

    fn cancel(&self) {
        let subscription = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state == EngineState::Cancelled {
                return;
            }
            lifecycle.state = EngineState::Cancelled;
            lifecycle.subscription.take()
        };

        self.shared.shutdown.cancel();
        if let Some(subscription) = subscription {
            self.unsubscribe(subscription);
        }
        info!(service_type = self.shared.service_type, "Discovery cancelled");
    }

    fn state(&self) -> EngineState {
        self.shared.lifecycle.lock().state
    }
}

impl fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("variant", &self.shared.variant)
            .field("service_type", &self.shared.service_type)
            .field("interface", &self.shared.interface)
            .field("state", &self.state())
            .finish()
    }
}

/// Single consumer of one listener's notifications
struct Translator {
    service_type: String,
    resolver: Arc<dyn Resolver>,
    events: Receiver<ResolverEvent>,
    emitter: Emitter,
    shutdown: CancellationToken,
}

impl Translator {
    async fn run(self) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.events.recv() => match received {
                    Ok(event) => event,
                    Err(_) => {
                        debug!(service_type = self.service_type, "Resolver stopped delivering events");
                        break;
                    }
                },
            };

            let outgoing = match event {
                ResolverEvent::Found { service_type, name } => {
                    debug!(service_type, name, "Service found, requesting resolution");
                    self.resolver.request_resolution(&service_type, &name);
                    continue;
                }
                ResolverEvent::Resolved(raw) => match resolved_descriptor(raw) {
                    Ok(service) => {
                        debug!(service = %service, "Service resolved");
                        DiscoveryEvent::Added(service)
                    }
                    Err(e) => {
                        warn!(service_type = self.service_type, error = %e, "Rejected resolution");
                        continue;
                    }
                },
                ResolverEvent::Removed(raw) => {
                    let service = removed_descriptor(raw);
                    debug!(service = %service, "Service removed");
                    DiscoveryEvent::Removed(service)
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                delivered = self.emitter.on_next(outgoing) => {
                    if !delivered {
                        break;
                    }
                }
            }
        }

        debug!(service_type = self.service_type, "Translation loop stopped");
    }
}

fn base_builder(raw: RawService) -> (ServiceDescriptorBuilder, u32) {
    let builder = raw
        .txt
        .into_iter()
        .fold(
            ServiceDescriptorBuilder::new(raw.name, raw.service_type),
            |builder, (key, value)| builder.txt_record(key, value),
        )
        .addresses(raw.addresses);
    (builder, raw.port)
}

/// Builds the descriptor for a fully resolved service
pub(crate) fn resolved_descriptor(raw: RawService) -> Result<ServiceDescriptor> {
    let (builder, port) = base_builder(raw);
    Ok(builder.port(port)?.build())
}

/// Builds a best-effort descriptor from the data carried by a removal
pub(crate) fn removed_descriptor(raw: RawService) -> ServiceDescriptor {
    let (builder, port) = base_builder(raw);
    match builder.clone().port(port) {
        Ok(with_port) => with_port.build(),
        Err(_) => builder.build(),
    }
}
