use std::sync::Arc;

use async_trait::async_trait;
use discord_core::{Connector, CorrelationCache, Credential, snapshot};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{NodeSession, reported};
use crate::{
    message::Message,
    node::{FlowNode, NodeContext, NodeError},
    sdk::{Interaction, InteractionKind},
    services::Services,
};

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InteractionFilter {
    #[default]
    All,
    Button,
    SelectMenu,
    Command,
    MessageContextMenu,
    AutoComplete,
    ModalSubmit,
}

impl InteractionFilter {
    pub fn matches(self, kind: InteractionKind) -> bool {
        match self {
            Self::All => true,
            Self::Button => kind == InteractionKind::Button,
            Self::SelectMenu => kind == InteractionKind::StringSelect,
            Self::Command => kind.is_command(),
            Self::MessageContextMenu => kind == InteractionKind::MessageContextMenu,
            Self::AutoComplete => kind == InteractionKind::Autocomplete,
            Self::ModalSubmit => kind == InteractionKind::ModalSubmit,
        }
    }
}

/// How a component interaction is acknowledged.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Update,
    Reply,
}

/// How a command interaction is acknowledged.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CommandResponseType {
    #[default]
    DefersReply,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractionConfig {
    pub interaction_type: InteractionFilter,
    /// Comma separated custom ids or command names; empty accepts all.
    pub custom_id: Option<String>,
    pub ephemeral: bool,
    pub response_type: ResponseType,
    pub command_response_type: CommandResponseType,
}

impl InteractionConfig {
    fn accepts_name(&self, name: Option<&str>) -> bool {
        match self.custom_id.as_deref().filter(|ids| !ids.is_empty()) {
            None => true,
            Some(ids) => name.is_some_and(|name| ids.split(',').any(|id| id == name)),
        }
    }
}

/// Listens for interactions, parks them in the interaction cache and emits
/// their snapshot downstream.
pub struct InteractionNode<K: Connector> {
    ctx: NodeContext,
    config: InteractionConfig,
    session: NodeSession<K>,
    interactions: CorrelationCache<Arc<dyn Interaction>>,
}

impl<K: Connector> InteractionNode<K> {
    pub async fn start(
        ctx: NodeContext,
        config: InteractionConfig,
        credential: Credential,
        services: &Services<K>,
    ) -> Self {
        let session = NodeSession::open(&ctx, services.registry.clone(), &credential).await;
        Self { ctx, config, session, interactions: services.interactions.clone() }
    }

    /// Entry point for the host's gateway handler. Returns the message to
    /// send downstream, or `None` when the interaction is filtered out.
    pub async fn on_interaction(&self, interaction: Arc<dyn Interaction>) -> Result<Option<Message>, NodeError> {
        reported(&self.ctx, self.handle(interaction).await)
    }

    async fn handle(&self, interaction: Arc<dyn Interaction>) -> Result<Option<Message>, NodeError> {
        if !self.session.is_open() {
            return Ok(None);
        }
        let kind = interaction.kind();
        if !self.config.interaction_type.matches(kind) {
            trace!(node = self.ctx.id(), ?kind, "interaction type filtered out");
            return Ok(None);
        }
        let name = interaction.name();
        if kind != InteractionKind::Autocomplete && !self.config.accepts_name(name.as_deref()) {
            trace!(node = self.ctx.id(), name = ?name, "interaction name filtered out");
            return Ok(None);
        }

        match kind {
            InteractionKind::Autocomplete => {}
            InteractionKind::ModalSubmit => interaction.defer_reply(false).await?,
            k if k.is_command() => {
                if self.config.command_response_type == CommandResponseType::DefersReply {
                    interaction.defer_reply(self.config.ephemeral).await?;
                }
            }
            _ => match self.config.response_type {
                ResponseType::Update => interaction.defer_update().await?,
                ResponseType::Reply => interaction.defer_reply(false).await?,
            },
        }

        let payload = snapshot(Some(&interaction.to_graph()))?.unwrap_or(Value::Null);
        // parked only once acknowledged, so a failed defer leaves nothing behind
        let key = self.interactions.put(interaction.clone(), None);
        let mut msg = Message::with_payload(payload);
        msg.add("interactionId", key.clone());
        debug!(node = self.ctx.id(), interaction = %key, ?kind, "interaction received");
        Ok(Some(msg))
    }
}

#[async_trait]
impl<K: Connector> FlowNode for InteractionNode<K> {
    fn id(&self) -> &str {
        self.ctx.id()
    }

    fn type_name(&self) -> &'static str {
        "discordInteraction"
    }

    /// Listener nodes are fed through [`InteractionNode::on_interaction`].
    async fn input(&self, _msg: Message) -> Result<Vec<Message>, NodeError> {
        Ok(Vec::new())
    }

    async fn close(&self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_uses_defaults_for_missing_fields() {
        let config: InteractionConfig = serde_json::from_value(json!({
            "interactionType": "selectMenu",
            "custom_id": "ignored",
            "commandResponseType": "none"
        }))
        .unwrap();
        assert_eq!(config.interaction_type, InteractionFilter::SelectMenu);
        assert_eq!(config.response_type, ResponseType::Update);
        assert_eq!(config.command_response_type, CommandResponseType::None);
        assert!(!config.ephemeral);
    }

    #[test]
    fn filters() {
        assert!(InteractionFilter::Command.matches(InteractionKind::MessageContextMenu));
        assert!(!InteractionFilter::MessageContextMenu.matches(InteractionKind::Command));
        assert!(!InteractionFilter::SelectMenu.matches(InteractionKind::OtherSelect));
        assert!(InteractionFilter::All.matches(InteractionKind::ModalSubmit));

        let config = InteractionConfig { custom_id: Some("ping,pong".into()), ..Default::default() };
        assert!(config.accepts_name(Some("pong")));
        assert!(!config.accepts_name(Some("pin")));
        assert!(!config.accepts_name(None));
        assert!(InteractionConfig::default().accepts_name(None));
    }
}
