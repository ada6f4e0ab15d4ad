//! Flow nodes built on the shared Discord services.

pub mod client;
pub mod event_manager;
pub mod interaction;
pub mod interaction_manager;

use std::sync::{Arc, Mutex};

use discord_core::{ConnectionHandle, ConnectionRegistry, Connector, Credential, Graph};
use serde_json::Value;

use crate::{
    message::Message,
    node::{NodeContext, NodeError},
};

/// One registry reference held for the lifetime of a node.
pub(crate) struct NodeSession<K: Connector> {
    registry: ConnectionRegistry<K>,
    handle: Mutex<Option<ConnectionHandle<K::Client>>>,
    failure: Option<String>,
}

impl<K: Connector> NodeSession<K> {
    /// Acquire the node's connection. A failure is reported on the node's
    /// status and remembered; the node stays deployed but refuses input.
    pub(crate) async fn open(ctx: &NodeContext, registry: ConnectionRegistry<K>, credential: &Credential) -> Self {
        let (handle, failure) = match registry.acquire(credential).await {
            Ok(handle) => {
                ctx.ok("ready");
                (Some(handle), None)
            }
            Err(err) => {
                let err = NodeError::from(err);
                ctx.fail(&err);
                (None, Some(err.to_string()))
            }
        };
        Self { registry, handle: Mutex::new(handle), failure }
    }

    pub(crate) fn client(&self) -> Result<Arc<K::Client>, NodeError> {
        let guard = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_ref() {
            Some(handle) => Ok(handle.client()),
            None => Err(NodeError::NotReady(self.failure.clone().unwrap_or_else(|| "node closed".into()))),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Release the reference; later calls are no-ops.
    pub(crate) fn close(&self) {
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            self.registry.release(handle);
        }
    }
}

/// Report a failed input on the node's status before handing it back.
pub(crate) fn reported<T>(ctx: &NodeContext, result: Result<T, NodeError>) -> Result<T, NodeError> {
    if let Err(err) = &result {
        ctx.fail(err);
    }
    result
}

/// A message property that may hold a string id, a numeric id or an object
/// with an `id` field.
pub(crate) fn id_or_object(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => id_or_object(obj.get("id")),
        _ => None,
    }
}

/// First non-empty property among `names`, looked up on the message and then
/// on its payload.
pub(crate) fn msg_or_payload<'a>(msg: &'a Message, names: &[&str]) -> Option<&'a Value> {
    let usable = |v: &&Value| !v.is_null();
    names
        .iter()
        .find_map(|name| msg.payload().get(*name).filter(usable))
        .or_else(|| names.iter().find_map(|name| msg.get(name).filter(usable)))
}

/// Id of an API object view, whatever its numeric width.
pub(crate) fn graph_id(graph: &Graph) -> String {
    match graph.get("id") {
        Some(Graph::Text(s)) => s,
        Some(Graph::BigInt(n)) => n.to_string(),
        Some(Graph::Number(n)) => format!("{n}"),
        _ => "unknown".to_string(),
    }
}
