use std::{fmt, sync::Arc};

use discord_core::{ConnectionRegistry, Connector, CorrelationCache, Timers};
use tracing::info;

use crate::{config::Settings, sdk::Interaction};

/// The process-wide services every node shares: one connection registry,
/// one cache for per-message client grants and one for live interactions.
pub struct Services<K: Connector> {
    pub registry: ConnectionRegistry<K>,
    pub grants: CorrelationCache<Arc<K::Client>>,
    pub interactions: CorrelationCache<Arc<dyn Interaction>>,
    settings: Settings,
}

impl<K: Connector> Clone for Services<K> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            grants: self.grants.clone(),
            interactions: self.interactions.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<K: Connector> Services<K> {
    pub fn new(connector: K, timers: Arc<dyn Timers>, settings: &Settings) -> Self {
        Self {
            registry: ConnectionRegistry::with_idle_teardown(connector, timers.clone(), settings.idle_teardown()),
            grants: CorrelationCache::with_ttl(timers.clone(), settings.grant_ttl()),
            interactions: CorrelationCache::with_ttl(timers, settings.correlation_ttl()),
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Drop every cached entry and disconnect every session.
    pub async fn shutdown(&self) {
        info!(
            grants = self.grants.len(),
            interactions = self.interactions.len(),
            connections = self.registry.len(),
            "shutting down discord services"
        );
        self.grants.clear();
        self.interactions.clear();
        self.registry.shutdown().await;
    }
}

impl<K: Connector> fmt::Debug for Services<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("connections", &self.registry.len())
            .field("grants", &self.grants.len())
            .field("interactions", &self.interactions.len())
            .finish()
    }
}
