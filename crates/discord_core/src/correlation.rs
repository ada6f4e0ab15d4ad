//! Short-lived parking lot for in-flight objects.
//!
//! A node that starts an exchange (e.g. receives an interaction) parks the
//! live object here and emits only its key. A later, unrelated message brings
//! the key back and picks the object up again.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    error::CorrelationMiss,
    timers::{TimerHandle, Timers},
};

/// Entries not picked up within this window are evicted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Values that carry their own identity, e.g. an interaction id.
pub trait Correlated {
    fn correlation_id(&self) -> Option<String> {
        None
    }
}

impl Correlated for Value {
    /// Uses the top-level `id` field when it is a string or a number.
    fn correlation_id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

impl<T: Correlated + ?Sized> Correlated for Arc<T> {
    fn correlation_id(&self) -> Option<String> {
        (**self).correlation_id()
    }
}

type DropHook = Box<dyn FnOnce() + Send>;

struct Entry<V> {
    value: V,
    timer: TimerHandle,
    // bumped on every renewal; stale expiry timers compare against it
    epoch: u64,
    // fixed at registration; touch keeps it
    generation: u64,
    ttl: Option<Duration>,
    on_drop: Option<DropHook>,
}

struct Inner<V> {
    timers: Arc<dyn Timers>,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
    next_epoch: AtomicU64,
}

/// Key → value map with per-entry expiry.
///
/// * [`take`](Self::take) hands the value out exactly once.
/// * Registering an existing key again restarts its timer, which is how a
///   multi-step exchange keeps its object alive.
/// * [`touch`](Self::touch) reads without consuming and also restarts the timer
///   with the lifetime the entry was registered with.
///
/// Every registration gets a new generation number. The `*_generation`
/// variants only act on the registration that number came from, so a holder of
/// an old registration cannot reach a newer value parked under the same key.
pub struct CorrelationCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CorrelationCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Send + 'static> fmt::Debug for CorrelationCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationCache")
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.inner.lock().len())
            .finish()
    }
}

impl<V: Clone + Send + 'static> CorrelationCache<V> {
    pub fn new(timers: Arc<dyn Timers>) -> Self {
        Self::with_ttl(timers, DEFAULT_TTL)
    }

    pub fn with_ttl(timers: Arc<dyn Timers>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                timers,
                ttl,
                entries: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Park `value` under its own id, or under a fresh UUID if it has none.
    pub fn put(&self, value: V, ttl: Option<Duration>) -> String
    where
        V: Correlated,
    {
        let key = value
            .correlation_id()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.insert(key.clone(), value, ttl, None);
        key
    }

    pub fn put_with_key(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> String {
        let key = key.into();
        self.insert(key.clone(), value, ttl, None);
        key
    }

    /// Like [`put_with_key`](Self::put_with_key), and `on_drop` runs once when
    /// the entry expires or is dropped via [`drop_key`](Self::drop_key).
    ///
    /// Returns the generation of the new registration.
    pub fn put_with_drop(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> u64 {
        self.insert(key.into(), value, ttl, Some(Box::new(on_drop)))
    }

    /// Remove and return the value. `None` means unknown or expired.
    pub fn take(&self, key: &str) -> Option<V> {
        let entry = self.inner.lock().remove(key)?;
        entry.timer.cancel();
        trace!(key, "correlation entry taken");
        Some(entry.value)
    }

    /// [`take`](Self::take), with a miss turned into an error.
    pub fn require(&self, key: &str) -> Result<V, CorrelationMiss> {
        self.take(key).ok_or_else(|| CorrelationMiss { key: key.to_string() })
    }

    /// Read without consuming; restarts the entry's expiry timer.
    pub fn touch(&self, key: &str) -> Option<V> {
        self.renew(key, None)
    }

    /// [`touch`](Self::touch), but only while `key` still holds registration
    /// `generation`.
    pub fn touch_generation(&self, key: &str, generation: u64) -> Option<V> {
        self.renew(key, Some(generation))
    }

    /// Remove the entry and run its drop hook. Returns whether it existed.
    pub fn drop_key(&self, key: &str) -> bool {
        self.remove_and_drop(key, None)
    }

    /// [`drop_key`](Self::drop_key), but only while `key` still holds
    /// registration `generation`.
    pub fn drop_generation(&self, key: &str, generation: u64) -> bool {
        self.remove_and_drop(key, Some(generation))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn contains_generation(&self, key: &str, generation: u64) -> bool {
        self.inner
            .lock()
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, running drop hooks.
    pub fn clear(&self) {
        let drained: Vec<Entry<V>> = self.inner.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.timer.cancel();
            if let Some(hook) = entry.on_drop {
                hook();
            }
        }
    }

    fn renew(&self, key: &str, generation: Option<u64>) -> Option<V> {
        let mut entries = self.inner.lock();
        let entry = entries
            .get_mut(key)
            .filter(|entry| generation.is_none_or(|g| g == entry.generation))?;
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let timer = self.inner.schedule_expiry(key, epoch, entry.ttl);
        std::mem::replace(&mut entry.timer, timer).cancel();
        entry.epoch = epoch;
        Some(entry.value.clone())
    }

    fn remove_and_drop(&self, key: &str, generation: Option<u64>) -> bool {
        let entry = {
            let mut entries = self.inner.lock();
            let current = entries
                .get(key)
                .is_some_and(|entry| generation.is_none_or(|g| g == entry.generation));
            if !current {
                return false;
            }
            entries.remove(key)
        };
        match entry {
            Some(entry) => {
                entry.timer.cancel();
                if let Some(hook) = entry.on_drop {
                    hook();
                }
                debug!(key, "correlation entry dropped");
                true
            }
            None => false,
        }
    }

    fn insert(&self, key: String, value: V, ttl: Option<Duration>, on_drop: Option<DropHook>) -> u64 {
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let displaced_hook = {
            let mut entries = self.inner.lock();
            let timer = self.inner.schedule_expiry(&key, epoch, ttl);
            let previous = entries.remove(&key);
            let (on_drop, displaced) = match previous {
                Some(previous) => {
                    previous.timer.cancel();
                    trace!(key = %key, "correlation entry renewed");
                    match on_drop {
                        Some(hook) => (Some(hook), previous.on_drop),
                        None => (previous.on_drop, None),
                    }
                }
                None => (on_drop, None),
            };
            entries.insert(
                key,
                Entry {
                    value,
                    timer,
                    epoch,
                    generation: epoch,
                    ttl,
                    on_drop,
                },
            );
            displaced
        };
        if let Some(hook) = displaced_hook {
            hook();
        }
        epoch
    }
}

impl<V: Send + 'static> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule_expiry(self: &Arc<Self>, key: &str, epoch: u64, ttl: Option<Duration>) -> TimerHandle {
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        self.timers.schedule(
            ttl.unwrap_or(self.ttl),
            Box::new(move || {
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.expire(&key, epoch);
                    }
                })
            }),
        )
    }

    fn expire(&self, key: &str, epoch: u64) {
        let expired = {
            let mut entries = self.lock();
            if !entries.get(key).is_some_and(|e| e.epoch == epoch) {
                return;
            }
            entries.remove(key)
        };
        if let Some(entry) = expired {
            debug!(key, "correlation entry expired");
            if let Some(hook) = entry.on_drop {
                hook();
            }
        }
    }
}
