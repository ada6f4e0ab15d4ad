use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use discord_core::{ConnectionError, CorrelationMiss, GrantError, SerializationError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::{formatter::FormatError, message::Message, sdk::SdkError};

/// A node in a flow. Input nodes get messages pushed in; whatever comes back
/// is sent downstream.
#[async_trait]
pub trait FlowNode: Send + Sync {
    fn id(&self) -> &str;
    fn type_name(&self) -> &'static str;
    async fn input(&self, msg: Message) -> Result<Vec<Message>, NodeError>;
    /// Called once when the flow is stopped or redeployed.
    async fn close(&self);
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusFill {
    Green,
    Yellow,
    Red,
    Grey,
}

/// Status badge shown next to a node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NodeStatus {
    pub fill: StatusFill,
    pub text: String,
}

impl NodeStatus {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { fill: StatusFill::Green, text: text.into() }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self { fill: StatusFill::Red, text: text.into() }
    }
}

/// Where nodes report status changes and errors that don't belong to one
/// particular message.
pub trait StatusSink: Send + Sync {
    fn status(&self, node_id: &str, status: NodeStatus);
    fn error(&self, node_id: &str, error: &str);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn status(&self, node_id: &str, status: NodeStatus) {
        info!(node = node_id, fill = ?status.fill, "{}", status.text);
    }

    fn error(&self, node_id: &str, err: &str) {
        error!(node = node_id, "{}", err);
    }
}

/// Sink that keeps everything it was told, for hosts that render status
/// later and for tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    statuses: Arc<Mutex<Vec<(String, NodeStatus)>>>,
    errors: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_status(&self, node_id: &str) -> Option<NodeStatus> {
        let statuses = self.statuses.lock().unwrap_or_else(|p| p.into_inner());
        statuses.iter().rev().find(|(id, _)| id == node_id).map(|(_, s)| s.clone())
    }

    pub fn errors(&self, node_id: &str) -> Vec<String> {
        let errors = self.errors.lock().unwrap_or_else(|p| p.into_inner());
        errors.iter().filter(|(id, _)| id == node_id).map(|(_, e)| e.clone()).collect()
    }
}

impl StatusSink for RecordingSink {
    fn status(&self, node_id: &str, status: NodeStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((node_id.to_string(), status));
    }

    fn error(&self, node_id: &str, err: &str) {
        self.errors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((node_id.to_string(), err.to_string()));
    }
}

/// Identity plus sink, shared by every node implementation.
#[derive(Clone)]
pub struct NodeContext {
    id: String,
    sink: Arc<dyn StatusSink>,
}

impl NodeContext {
    pub fn new(id: impl Into<String>, sink: Arc<dyn StatusSink>) -> Self {
        Self { id: id.into(), sink }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ok(&self, text: impl Into<String>) {
        self.sink.status(&self.id, NodeStatus::ok(text));
    }

    /// Red status plus an error report.
    pub fn fail(&self, err: &NodeError) {
        let text = err.to_string();
        self.sink.status(&self.id, NodeStatus::failed(text.clone()));
        self.sink.error(&self.id, &text);
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext").field("id", &self.id).finish()
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Sdk(#[from] SdkError),
    #[error("Could not find interaction '{0}'. It may have expired.")]
    InteractionExpired(String),
    /// The node never obtained a connection, so it cannot serve input.
    #[error("not connected: {0}")]
    NotReady(String),
    #[error("{0}")]
    InvalidInput(String),
}

impl From<CorrelationMiss> for NodeError {
    fn from(miss: CorrelationMiss) -> Self {
        NodeError::InteractionExpired(miss.key)
    }
}
