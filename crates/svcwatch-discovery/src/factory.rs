//! Public entry point: discovery streams by service type and variant

use crate::engine::{Discovery, DiscoveryEngine};
use crate::error::{DiscoveryError, Result};
use crate::registry::ResolverRegistry;
use crate::stream::{discovery_channel, DiscoveryStream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use svcwatch_core::DiscoveryConfig;
use tracing::{debug, warn};

/// Events buffered per stream when no configuration is given
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Builds an engine for one subscription
pub type EngineConstructor =
    fn(String, Option<IpAddr>, Arc<ResolverRegistry>) -> Box<dyn Discovery>;

/// Discovery engine implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineVariant {
    /// Multicast DNS via the mdns-sd daemon
    Mdns,
}

impl EngineVariant {
    pub const ALL: &'static [EngineVariant] = &[EngineVariant::Mdns];

    /// Name reported in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            EngineVariant::Mdns => "MdnsDiscovery",
        }
    }

    /// Identifier used in configuration
    pub fn id(&self) -> &'static str {
        match self {
            EngineVariant::Mdns => "mdns",
        }
    }

    pub fn constructor(&self) -> EngineConstructor {
        match self {
            EngineVariant::Mdns => mdns_engine,
        }
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EngineVariant {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        EngineVariant::ALL
            .iter()
            .copied()
            .find(|v| v.id().eq_ignore_ascii_case(wanted) || v.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DiscoveryError::UnknownVariant(s.to_string()))
    }
}

fn mdns_engine(
    service_type: String,
    interface: Option<IpAddr>,
    registry: Arc<ResolverRegistry>,
) -> Box<dyn Discovery> {
    Box::new(DiscoveryEngine::new(
        EngineVariant::Mdns,
        service_type,
        interface,
        registry,
    ))
}

/// Returns the fully qualified form of a DNS-SD service type
///
/// `_http._tcp` and `_http._tcp.local` both become `_http._tcp.local.`.
pub fn normalize_service_type(service_type: &str) -> Result<String> {
    let trimmed = service_type.trim();
    let normalized = if trimmed.ends_with('.') {
        trimmed.to_string()
    } else if trimmed.ends_with(".local") {
        format!("{}.", trimmed)
    } else {
        format!("{}.local.", trimmed)
    };

    let valid = normalized.starts_with('_')
        && (normalized.contains("._tcp.") || normalized.contains("._udp."));
    if !valid {
        return Err(DiscoveryError::InvalidServiceType(service_type.to_string()));
    }

    Ok(normalized)
}

/// Creates discovery streams, one engine per stream
///
/// Each variant owns one [`ResolverRegistry`], so streams of the same variant
/// on the same interface share a resolver.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use svcwatch_discovery::{DiscoveryStreamFactory, EngineVariant};
///
/// # async fn run() -> svcwatch_discovery::Result<()> {
/// let factory = DiscoveryStreamFactory::new();
/// let mut stream = factory.create_stream("_http._tcp", None, EngineVariant::Mdns)?;
/// while let Some(event) = stream.next().await {
///     println!("{:?}", event?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryStreamFactory {
    registries: HashMap<EngineVariant, Arc<ResolverRegistry>>,
    event_buffer: usize,
}

impl DiscoveryStreamFactory {
    /// Factory with every built-in variant registered
    pub fn new() -> Self {
        Self::empty().with_registry(EngineVariant::Mdns, ResolverRegistry::mdns())
    }

    /// Factory without any variant; add them with [`Self::with_registry`]
    pub fn empty() -> Self {
        Self {
            registries: HashMap::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new().with_event_buffer(config.event_buffer)
    }

    /// Uses `registry` for every stream of `variant`
    pub fn with_registry(mut self, variant: EngineVariant, registry: Arc<ResolverRegistry>) -> Self {
        self.registries.insert(variant, registry);
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn registry(&self, variant: EngineVariant) -> Option<&Arc<ResolverRegistry>> {
        self.registries.get(&variant)
    }

    /// Opens a discovery stream for `service_type` on `interface`.
    ///
    /// Returns immediately; the engine starts on tokio's blocking pool and
    /// reports resolver failures as the stream's single error item. Must be
    /// called from within a tokio runtime.
    pub fn create_stream(
        &self,
        service_type: &str,
        interface: Option<IpAddr>,
        variant: EngineVariant,
    ) -> Result<DiscoveryStream> {
        let service_type = normalize_service_type(service_type)?;
        let registry = self
            .registries
            .get(&variant)
            .cloned()
            .ok_or_else(|| DiscoveryError::UnknownVariant(variant.id().to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;

        let engine = (variant.constructor())(service_type.clone(), interface, registry);
        let (emitter, stream) = discovery_channel(self.event_buffer);

        debug!(variant = variant.name(), service_type, interface = ?interface, "Creating discovery stream");

        runtime.spawn_blocking(move || {
            if let Err(e) = engine.start(emitter) {
                warn!(service_type, error = %e, "Discovery engine did not start");
            }
        });

        Ok(stream)
    }

    /// Like [`Self::create_stream`] with the variant given by its identifier
    pub fn create_stream_by_name(
        &self,
        service_type: &str,
        interface: Option<IpAddr>,
        variant: &str,
    ) -> Result<DiscoveryStream> {
        self.create_stream(service_type, interface, variant.parse()?)
    }
}

impl Default for DiscoveryStreamFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiscoveryStreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryStreamFactory")
            .field("variants", &self.registries.keys().collect::<Vec<_>>())
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_service_type() {
        assert_eq!(normalize_service_type("_http._tcp").unwrap(), "_http._tcp.local.");
        assert_eq!(normalize_service_type("_http._tcp.local").unwrap(), "_http._tcp.local.");
        assert_eq!(normalize_service_type("_ipp._tcp.local.").unwrap(), "_ipp._tcp.local.");
        assert_eq!(normalize_service_type(" _sip._udp ").unwrap(), "_sip._udp.local.");
    }

    #[test]
    fn test_rejects_invalid_service_type() {
        for bad in ["", "http", "_http", "printer._tcp.local."] {
            assert!(
                matches!(normalize_service_type(bad), Err(DiscoveryError::InvalidServiceType(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_variant_lookup() {
        assert_eq!("mdns".parse::<EngineVariant>().unwrap(), EngineVariant::Mdns);
        assert_eq!("MdnsDiscovery".parse::<EngineVariant>().unwrap(), EngineVariant::Mdns);
        assert!(matches!(
            "bonjour".parse::<EngineVariant>(),
            Err(DiscoveryError::UnknownVariant(_))
        ));
        assert_eq!(EngineVariant::Mdns.to_string(), "mdns");
    }

    #[test]
    fn test_constructor_builds_fresh_engine() {
        let registry = ResolverRegistry::mdns();
        let engine = (EngineVariant::Mdns.constructor())(
            "_http._tcp.local.".to_string(),
            None,
            registry,
        );
        assert_eq!(engine.state(), crate::engine::EngineState::Created);
    }

    #[tokio::test]
    async fn test_missing_variant_registry() {
        let factory = DiscoveryStreamFactory::empty();
        let result = factory.create_stream("_http._tcp", None, EngineVariant::Mdns);
        assert!(matches!(result, Err(DiscoveryError::UnknownVariant(_))));
    }

    #[test]
    fn test_requires_runtime() {
        let factory = DiscoveryStreamFactory::new();
        let result = factory.create_stream("_http._tcp", None, EngineVariant::Mdns);
        assert!(matches!(result, Err(DiscoveryError::Internal(_))));
    }
}
