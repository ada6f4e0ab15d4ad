//! One live client per credential, shared by every node that asks for it.

use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tracing::{debug, info, warn};

use crate::{
    client::{ChatClient, Connector},
    credential::Credential,
    error::ConnectionError,
    timers::{TimerHandle, Timers},
};

/// How long an unreferenced client stays connected before it is torn down.
pub const DEFAULT_IDLE_TEARDOWN: Duration = Duration::from_secs(5 * 60);

type ConnectFuture<C> = Shared<BoxFuture<'static, Result<Arc<C>, ConnectionError>>>;

struct Slot<C> {
    id: u64,
    connect: ConnectFuture<C>,
    refs: usize,
    idle: Option<TimerHandle>,
    idle_epoch: u64,
}

struct Inner<K: Connector> {
    connector: Arc<K>,
    timers: Arc<dyn Timers>,
    idle_teardown: Duration,
    slots: Mutex<HashMap<Credential, Slot<K::Client>>>,
    next_slot: AtomicU64,
}

/// Reference-counted registry of client sessions keyed by credential.
///
/// Concurrent first acquisitions share one connect attempt. When the last
/// handle is released an idle timer starts; acquiring again before it fires
/// keeps the session, otherwise it is disconnected and forgotten.
pub struct ConnectionRegistry<K: Connector> {
    inner: Arc<Inner<K>>,
}

impl<K: Connector> Clone for ConnectionRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A counted reference to a shared client. Give it back with
/// [`ConnectionRegistry::release`].
pub struct ConnectionHandle<C> {
    credential: Credential,
    client: Arc<C>,
    slot: u64,
}

impl<C> ConnectionHandle<C> {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn client(&self) -> Arc<C> {
        self.client.clone()
    }
}

impl<C> Deref for ConnectionHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}

impl<C> fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("credential", &self.credential)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Gives the reference back if an `acquire` future is dropped mid-connect.
struct PendingRef<'a, K: Connector> {
    inner: &'a Arc<Inner<K>>,
    credential: &'a Credential,
    slot: u64,
    armed: bool,
}

impl<K: Connector> Drop for PendingRef<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_ref(self.credential, self.slot);
        }
    }
}

impl<K: Connector> ConnectionRegistry<K> {
    pub fn new(connector: K, timers: Arc<dyn Timers>) -> Self {
        Self::with_idle_teardown(connector, timers, DEFAULT_IDLE_TEARDOWN)
    }

    pub fn with_idle_teardown(connector: K, timers: Arc<dyn Timers>, idle_teardown: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                timers,
                idle_teardown,
                slots: Mutex::new(HashMap::new()),
                next_slot: AtomicU64::new(1),
            }),
        }
    }

    /// Get the shared client for `credential`, connecting on first use.
    ///
    /// A failed connect is not remembered: the next call tries again.
    pub async fn acquire(&self, credential: &Credential) -> Result<ConnectionHandle<K::Client>, ConnectionError> {
        if credential.is_blank() {
            return Err(ConnectionError::InvalidCredential);
        }

        let (slot, connect) = {
            let mut slots = self.inner.lock();
            let slot = slots.entry(credential.clone()).or_insert_with(|| {
                debug!(%credential, "opening client session");
                Slot {
                    id: self.inner.next_slot.fetch_add(1, Ordering::Relaxed),
                    connect: self.inner.connect_future(credential),
                    refs: 0,
                    idle: None,
                    idle_epoch: 0,
                }
            });
            slot.refs += 1;
            if let Some(idle) = slot.idle.take() {
                debug!(%credential, "idle teardown cancelled");
                idle.cancel();
            }
            (slot.id, slot.connect.clone())
        };

        let mut pending = PendingRef {
            inner: &self.inner,
            credential,
            slot,
            armed: true,
        };

        match connect.await {
            Ok(client) => {
                pending.armed = false;
                Ok(ConnectionHandle {
                    credential: credential.clone(),
                    client,
                    slot,
                })
            }
            Err(err) => {
                pending.armed = false;
                let mut slots = self.inner.lock();
                if slots.get(credential).is_some_and(|s| s.id == slot) {
                    slots.remove(credential);
                }
                warn!(%credential, error = %err, "client session could not be opened");
                Err(err)
            }
        }
    }

    /// Give a handle back. The last release arms the idle teardown timer.
    pub fn release(&self, handle: ConnectionHandle<K::Client>) {
        self.inner.release_ref(&handle.credential, handle.slot);
    }

    /// Outstanding handles for `credential`.
    pub fn ref_count(&self, credential: &Credential) -> usize {
        self.inner.lock().get(credential).map(|s| s.refs).unwrap_or(0)
    }

    /// Whether a session for `credential` is live (connected and not torn down).
    pub fn is_connected(&self, credential: &Credential) -> bool {
        self.inner
            .lock()
            .get(credential)
            .is_some_and(|s| matches!(s.connect.peek(), Some(Ok(_))))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect every session now, regardless of outstanding handles.
    pub async fn shutdown(&self) {
        let drained: Vec<(Credential, Slot<K::Client>)> = self.inner.lock().drain().collect();
        for (credential, mut slot) in drained {
            if let Some(idle) = slot.idle.take() {
                idle.cancel();
            }
            if slot.refs > 0 {
                debug!(%credential, refs = slot.refs, "shutting down a session still in use");
            }
            Inner::<K>::disconnect(&credential, slot.connect).await;
        }
    }
}

impl<K: Connector> Inner<K> {
    fn lock(&self) -> MutexGuard<'_, HashMap<Credential, Slot<K::Client>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connect_future(&self, credential: &Credential) -> ConnectFuture<K::Client> {
        let connector = self.connector.clone();
        let credential = credential.clone();
        async move {
            let client = connector.connect(&credential).await?;
            info!(%credential, user = %client.user_tag(), "client session ready");
            Ok(Arc::new(client))
        }
        .boxed()
        .shared()
    }

    fn release_ref(self: &Arc<Self>, credential: &Credential, slot_id: u64) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(credential) else {
            return;
        };
        if slot.id != slot_id {
            // handle from a session that was already torn down
            return;
        }
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return;
        }

        slot.idle_epoch += 1;
        let epoch = slot.idle_epoch;
        let weak = Arc::downgrade(self);
        let key = credential.clone();
        let timer = self.timers.schedule(
            self.idle_teardown,
            Box::new(move || {
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.teardown(&key, slot_id, epoch).await;
                    }
                })
            }),
        );
        if let Some(previous) = slot.idle.replace(timer) {
            previous.cancel();
        }
        debug!(%credential, after = ?self.idle_teardown, "idle teardown scheduled");
    }

    async fn teardown(&self, credential: &Credential, slot_id: u64, epoch: u64) {
        let connect = {
            let mut slots = self.lock();
            let still_idle = slots
                .get(credential)
                .is_some_and(|s| s.id == slot_id && s.refs == 0 && s.idle_epoch == epoch);
            if !still_idle {
                return;
            }
            match slots.remove(credential) {
                Some(slot) => slot.connect,
                None => return,
            }
        };
        info!(%credential, "tearing down idle client session");
        Self::disconnect(credential, connect).await;
    }

    async fn disconnect(credential: &Credential, connect: ConnectFuture<K::Client>) {
        if let Ok(client) = connect.await {
            if let Err(err) = client.disconnect().await {
                warn!(%credential, error = %err, "disconnect failed; ignoring");
            }
        }
    }
}
