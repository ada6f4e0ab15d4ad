use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use discord_core::{ClientGrant, GrantError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Type-erased view of a [`ClientGrant`] so messages stay non-generic.
pub trait GrantAccessor: Send + Sync {
    fn key(&self) -> &str;
    /// The bound client, or `None` once revoked or expired.
    fn client_any(&self) -> Option<Arc<dyn Any + Send + Sync>>;
    /// Idempotent early release.
    fn revoke(&self) -> bool;
    fn is_live(&self) -> bool;
}

impl<C: Send + Sync + 'static> GrantAccessor for ClientGrant<C> {
    fn key(&self) -> &str {
        ClientGrant::key(self)
    }

    fn client_any(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.get().map(|client| client as Arc<dyn Any + Send + Sync>)
    }

    fn revoke(&self) -> bool {
        ClientGrant::revoke(self)
    }

    fn is_live(&self) -> bool {
        ClientGrant::is_live(self)
    }
}

/// A flow message: opaque id, JSON payload, loose properties and at most one
/// client grant.
#[derive(Clone, JsonSchema, Serialize, Deserialize)]
pub struct Message {
    id: String,
    session_id: Option<String>,
    payload: Value,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(skip)]
    #[schemars(skip)]
    grant: Option<Arc<dyn GrantAccessor>>,
}

impl Message {
    pub fn new(id: &str, payload: Value, session_id: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            session_id,
            payload,
            metadata: HashMap::new(),
            grant: None,
        }
    }

    /// A message with a fresh UUID.
    pub fn with_payload(payload: Value) -> Self {
        Self::new(&uuid::Uuid::new_v4().to_string(), payload, None)
    }

    pub fn from_error(error: String) -> Self {
        let mut msg = Self::with_payload(json!({ "error": error.clone() }));
        msg.add("error", Value::String(error));
        msg
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    pub fn set_session_id(&mut self, session: Option<String>) {
        self.session_id = session;
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.metadata.get(name)
    }

    /// String property, ignoring empty strings.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.metadata.remove(name);
    }

    /// Attach a grant. A message carries at most one.
    pub fn bind_grant(&mut self, grant: Arc<dyn GrantAccessor>) -> Result<(), GrantError> {
        if self.grant.is_some() {
            return Err(GrantError::AlreadyBound);
        }
        self.grant = Some(grant);
        Ok(())
    }

    pub fn grant(&self) -> Option<&Arc<dyn GrantAccessor>> {
        self.grant.as_ref()
    }

    /// Resolve the attached grant to a concrete client type.
    pub fn client<C: Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.grant.as_ref()?.client_any()?.downcast::<C>().ok()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("payload", &self.payload)
            .field("metadata", &self.metadata)
            .field("grant", &self.grant.as_ref().map(|g| g.key().to_string()))
            .finish()
    }
}
