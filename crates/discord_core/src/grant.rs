//! Revocable client grants attached to flow messages.
//!
//! Flow messages get cloned, reordered and silently discarded by the engine,
//! so a message never carries the client itself. It carries a [`ClientGrant`]:
//! a key into a grant cache whose entry owns one registry reference. The
//! reference is released exactly once, when the grant is revoked, expires, or
//! the issuing node closes.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    client::Connector,
    correlation::CorrelationCache,
    credential::Credential,
    error::GrantError,
    registry::ConnectionRegistry,
};

/// Accessor for a client bound to one message.
///
/// A grant is tied to the registration it was issued for. Once that
/// registration is gone the grant stays dead, even if the same key is issued
/// again later.
pub struct ClientGrant<C> {
    key: String,
    generation: u64,
    cache: CorrelationCache<Arc<C>>,
}

impl<C> Clone for ClientGrant<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            generation: self.generation,
            cache: self.cache.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> ClientGrant<C> {
    /// `"{message_id}:{node_id}"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The bound client, or `None` once the grant is gone. Each successful
    /// lookup extends the grant's lifetime.
    pub fn get(&self) -> Option<Arc<C>> {
        self.cache.touch_generation(&self.key, self.generation)
    }

    /// Give the client back early. Safe to call any number of times; only the
    /// first call that finds the grant live returns `true`.
    #[doc(alias = "drop")]
    pub fn revoke(&self) -> bool {
        self.cache.drop_generation(&self.key, self.generation)
    }

    pub fn is_live(&self) -> bool {
        self.cache.contains_generation(&self.key, self.generation)
    }
}

impl<C> fmt::Debug for ClientGrant<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientGrant").field("key", &self.key).finish()
    }
}

/// Issues grants on behalf of one node and revokes the leftovers on close.
pub struct GrantIssuer<K: Connector> {
    node_id: String,
    credential: Credential,
    registry: ConnectionRegistry<K>,
    grants: CorrelationCache<Arc<K::Client>>,
    ttl: Option<Duration>,
    outstanding: Arc<DashMap<String, u64>>,
    serial: AtomicU64,
}

impl<K: Connector> GrantIssuer<K> {
    pub fn new(
        node_id: impl Into<String>,
        credential: Credential,
        registry: ConnectionRegistry<K>,
        grants: CorrelationCache<Arc<K::Client>>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            credential,
            registry,
            grants,
            ttl: None,
            outstanding: Arc::new(DashMap::new()),
            serial: AtomicU64::new(1),
        }
    }

    /// Override the grant cache's default lifetime for grants from this node.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Take a registry reference and park it under `"{message_id}:{node_id}"`.
    pub async fn issue(&self, message_id: &str) -> Result<ClientGrant<K::Client>, GrantError> {
        if message_id.trim().is_empty() {
            return Err(GrantError::MissingMessageId);
        }
        let handle = self.registry.acquire(&self.credential).await?;
        let key = format!("{message_id}:{}", self.node_id);
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let client = handle.client();

        // registered before the cache entry so a displaced grant's hook
        // cannot erase the new record
        self.outstanding.insert(key.clone(), serial);

        let registry = self.registry.clone();
        let outstanding = self.outstanding.clone();
        let hook_key = key.clone();
        let generation = self.grants.put_with_drop(key.clone(), client, self.ttl, move || {
            outstanding.remove_if(&hook_key, |_, s| *s == serial);
            registry.release(handle);
            debug!(key = %hook_key, "client grant released");
        });

        debug!(key = %key, "client grant issued");
        Ok(ClientGrant {
            key,
            generation,
            cache: self.grants.clone(),
        })
    }

    /// Grants issued by this node that are still live.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Revoke every grant this node still has out.
    pub fn close(&self) {
        let keys: Vec<String> = self.outstanding.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if !self.grants.drop_key(&key) {
                // entry was taken out of the cache by someone else
                self.outstanding.remove(&key);
            }
        }
    }
}
