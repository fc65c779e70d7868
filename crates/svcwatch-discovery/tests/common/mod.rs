//! Common test utilities: an in-memory resolver backend

#![allow(dead_code)]

use async_channel::Sender;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use svcwatch_discovery::{
    DiscoveryError, DiscoveryEvent, DiscoveryStream, ListenerId, RawService, Resolver,
    ResolverConnector, ResolverError, ResolverEvent,
};

pub const HTTP: &str = "_http._tcp.local.";

/// How long a test waits for an event before giving up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolver that records calls and lets tests inject notifications
#[derive(Default)]
pub struct FakeResolver {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Sender<ResolverEvent>)>>>,
    next_id: AtomicU64,
    pub registrations: AtomicUsize,
    pub resolution_requests: Mutex<Vec<(String, String)>>,
    closing: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeResolver {
    /// Posts `event` to every listener of `service_type`
    pub fn notify(&self, service_type: &str, event: ResolverEvent) {
        let targets: Vec<_> = self
            .listeners
            .lock()
            .get(service_type)
            .map(|set| set.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();
        for tx in targets {
            let _ = tx.try_send(event.clone());
        }
    }

    pub fn listener_count(&self, service_type: &str) -> usize {
        self.listeners
            .lock()
            .get(service_type)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Number of times `close` was invoked, repeats included
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulates a resolver shutting down underneath its users
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

impl Resolver for FakeResolver {
    fn add_listener(
        &self,
        service_type: &str,
        listener: Sender<ResolverEvent>,
    ) -> Result<ListenerId, ResolverError> {
        if !self.is_available() {
            return Err(ResolverError::Closed);
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .entry(service_type.to_string())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    fn remove_listener(&self, service_type: &str, id: ListenerId) {
        if let Some(set) = self.listeners.lock().get_mut(service_type) {
            set.retain(|(existing, _)| *existing != id);
        }
    }

    fn request_resolution(&self, service_type: &str, name: &str) {
        self.resolution_requests
            .lock()
            .push((service_type.to_string(), name.to_string()));
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listeners.lock().clear();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector counting creations and closes, optionally failing per interface
#[derive(Default)]
pub struct FakeConnector {
    pub creates: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    failing: Mutex<HashSet<Option<IpAddr>>>,
    created: Mutex<Vec<Arc<FakeResolver>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, interface: Option<IpAddr>) {
        self.failing.lock().insert(interface);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every resolver created so far, oldest first
    pub fn all(&self) -> Vec<Arc<FakeResolver>> {
        self.created.lock().clone()
    }

    /// Most recently created resolver
    pub fn latest(&self) -> Option<Arc<FakeResolver>> {
        self.created.lock().last().cloned()
    }
}

impl ResolverConnector for FakeConnector {
    fn connect(&self, interface: Option<IpAddr>) -> Result<Arc<dyn Resolver>, ResolverError> {
        if self.failing.lock().contains(&interface) {
            return Err(ResolverError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "cannot bind multicast socket",
            )));
        }

        self.creates.fetch_add(1, Ordering::SeqCst);
        let resolver = Arc::new(FakeResolver {
            closes: self.closes.clone(),
            ..Default::default()
        });
        self.created.lock().push(resolver.clone());
        Ok(resolver)
    }
}

pub fn resolved_printer() -> RawService {
    RawService {
        name: "Printer".to_string(),
        service_type: HTTP.to_string(),
        addresses: vec!["10.0.0.5".parse().unwrap(), "fe80::1".parse().unwrap()],
        port: 631,
        txt: vec![("rp".to_string(), "printer".to_string())],
    }
}

/// Next stream item, failing the test if none arrives in time
pub async fn next_item(
    stream: &mut DiscoveryStream,
) -> Option<Result<DiscoveryEvent, DiscoveryError>> {
    tokio::time::timeout(EVENT_TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for stream item")
}

pub async fn next_event(stream: &mut DiscoveryStream) -> DiscoveryEvent {
    next_item(stream)
        .await
        .expect("stream ended")
        .expect("stream failed")
}

/// Polls `condition` until it holds or the timeout passes
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
