//! Test doubles for the SDK seam.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    client::{ChatClient, Connector},
    credential::Credential,
    error::ConnectionError,
};

/// Session handed out by [`FakeConnector`].
pub struct FakeClient {
    tag: String,
    disconnects: Arc<AtomicUsize>,
    fail_disconnect: bool,
}

#[async_trait]
impl ChatClient for FakeClient {
    fn user_tag(&self) -> String {
        self.tag.clone()
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(ConnectionError::Disconnect("socket already gone".into()));
        }
        Ok(())
    }
}

/// Connector that counts connects/disconnects and can be told to fail.
#[derive(Clone, Default)]
pub struct FakeConnector {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    fail_disconnect: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_disconnects(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self, credential: &Credential) -> Result<FakeClient, ConnectionError> {
        // give concurrent acquirers a chance to pile onto the same attempt
        tokio::task::yield_now().await;
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectionError::Connect("login rejected".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeClient {
            tag: format!("bot{}", credential.fingerprint()),
            disconnects: self.disconnects.clone(),
            fail_disconnect: self.fail_disconnect.load(Ordering::SeqCst),
        })
    }
}
