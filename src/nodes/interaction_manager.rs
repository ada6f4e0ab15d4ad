use std::sync::Arc;

use async_trait::async_trait;
use discord_core::{Connector, CorrelationCache, Credential, Graph, snapshot};
use serde_json::Value;
use tracing::debug;

use super::{NodeSession, id_or_object, msg_or_payload, reported};
use crate::{
    formatter::{format_attachments, format_components, format_embeds, format_modal_components},
    message::Message,
    node::{FlowNode, NodeContext, NodeError},
    sdk::{AutocompleteChoice, Interaction, InteractionKind, MessageFlag, ModalPayload, ReplyPayload},
    services::Services,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Action {
    Reply,
    Edit,
    FollowUp,
    EditFollowUp,
    Delete,
    ShowModal,
    RespondAutocomplete,
}

impl Action {
    fn parse(raw: Option<&str>) -> Result<Self, NodeError> {
        match raw.map(str::to_lowercase).as_deref() {
            None => Ok(Self::Edit),
            Some("reply") => Ok(Self::Reply),
            Some("edit") => Ok(Self::Edit),
            Some("followup") => Ok(Self::FollowUp),
            Some("editfollowup") => Ok(Self::EditFollowUp),
            Some("delete") => Ok(Self::Delete),
            Some("showmodal") => Ok(Self::ShowModal),
            Some("respondautocomplete") => Ok(Self::RespondAutocomplete),
            Some(_) => Err(NodeError::InvalidInput("msg.action has an incorrect value".into())),
        }
    }
}

/// The parts of a message that make up a response body.
struct Body {
    content: Option<String>,
    embeds: Vec<Value>,
    files: Vec<crate::formatter::Attachment>,
    components: Vec<crate::formatter::ActionRow>,
    suppress_embeds: bool,
    suppress_notifications: bool,
    ephemeral: bool,
}

impl Body {
    fn from_message(msg: &Message, action: Action) -> Result<Self, NodeError> {
        let content = match msg.payload() {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            payload => payload.get("content").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string),
        };
        let rows = msg_or_payload(msg, &["components"]);
        let components = match action {
            Action::ShowModal => format_modal_components(rows)?,
            _ => format_components(rows)?,
        };
        let flag = |name: &str| {
            msg.get_bool(name).or_else(|| msg.payload().get(name).and_then(Value::as_bool)) == Some(true)
        };
        Ok(Self {
            content,
            embeds: format_embeds(msg_or_payload(msg, &["embeds", "embed"]))?,
            files: format_attachments(msg_or_payload(msg, &["attachments", "attachment"]))?,
            components,
            suppress_embeds: flag("suppressEmbeds"),
            suppress_notifications: flag("suppressNotifications"),
            ephemeral: flag("ephemeral"),
        })
    }

    /// Ephemeral delivery is only honoured for new messages (replies and
    /// follow-ups), never for edits.
    fn payload(&self, allow_ephemeral: bool) -> ReplyPayload {
        let mut flags = Vec::new();
        if self.suppress_embeds {
            flags.push(MessageFlag::SuppressEmbeds);
        }
        if self.suppress_notifications {
            flags.push(MessageFlag::SuppressNotifications);
        }
        let ephemeral = allow_ephemeral && self.ephemeral;
        if ephemeral {
            flags.push(MessageFlag::Ephemeral);
        }
        ReplyPayload {
            content: self.content.clone().unwrap_or_else(|| " ".to_string()),
            embeds: self.embeds.clone(),
            files: self.files.clone(),
            components: self.components.clone(),
            flags,
            ephemeral,
        }
    }
}

/// Responds to interactions parked by an interaction listener.
pub struct InteractionManagerNode<K: Connector> {
    ctx: NodeContext,
    session: NodeSession<K>,
    interactions: CorrelationCache<Arc<dyn Interaction>>,
}

impl<K: Connector> InteractionManagerNode<K> {
    pub async fn start(ctx: NodeContext, credential: Credential, services: &Services<K>) -> Self {
        let session = NodeSession::open(&ctx, services.registry.clone(), &credential).await;
        Self { ctx, session, interactions: services.interactions.clone() }
    }

    async fn respond(&self, mut msg: Message) -> Result<Vec<Message>, NodeError> {
        self.session.client()?;
        let interaction_id = id_or_object(msg.get("interactionId"))
            .ok_or_else(|| NodeError::InvalidInput("msg.interactionId wasn't set correctly".into()))?;
        let action = Action::parse(msg.get_str("action"))?;
        let body = Body::from_message(&msg, action)?;
        let interaction = self.interactions.require(&interaction_id)?;
        let follow_up_id = id_or_object(msg.get("messageId"))
            .or_else(|| id_or_object(msg.get("followupId")))
            .or_else(|| msg.get("message").and_then(|m| id_or_object(m.get("id"))))
            .or_else(|| id_or_object(msg.payload().get("messageId")));

        let mut message: Option<Graph> = None;
        let mut extra: Option<Value> = None;
        let status = match action {
            Action::Reply => {
                interaction.reply(body.payload(true)).await?;
                "replied"
            }
            Action::Edit => {
                interaction.edit_reply(body.payload(false)).await?;
                "edited"
            }
            Action::FollowUp => {
                message = Some(interaction.follow_up(body.payload(true)).await?);
                "followup sent"
            }
            Action::EditFollowUp => {
                let id = follow_up_id.as_deref().ok_or_else(|| {
                    NodeError::InvalidInput(
                        "msg.messageId (or msg.message.id) is required to edit a follow-up message.".into(),
                    )
                })?;
                message = Some(interaction.edit_follow_up(id, body.payload(false)).await?);
                "followup edited"
            }
            Action::Delete => match &follow_up_id {
                Some(id) => {
                    interaction.delete_follow_up(id).await?;
                    extra = Some(serde_json::json!({ "deleted": true, "messageId": id }));
                    "followup deleted"
                }
                None => {
                    interaction.delete_reply().await?;
                    extra = Some(serde_json::json!({ "deleted": true }));
                    "reply deleted"
                }
            },
            Action::ShowModal => {
                let modal = ModalPayload {
                    custom_id: msg.get_str("customId").unwrap_or("myModal").to_string(),
                    title: body.content.clone().unwrap_or_else(|| "Modal".to_string()),
                    components: body.components.clone(),
                };
                interaction.show_modal(modal).await?;
                "modal showed"
            }
            Action::RespondAutocomplete => {
                if interaction.kind() != InteractionKind::Autocomplete {
                    return Err(NodeError::InvalidInput("Error: not autocomplete Interaction".into()));
                }
                let focused = interaction.focused_value().unwrap_or_default();
                let choices = autocomplete_choices(msg.get("autoCompleteChoices"), &focused);
                interaction.respond_autocomplete(choices).await?;
                "filtered"
            }
        };

        // a modal closes the interaction; everything else may be followed up
        if action != Action::ShowModal {
            self.interactions.put(interaction.clone(), None);
        }

        let payload = match extra {
            Some(value) => value,
            None => {
                let out = Graph::map([("interaction", interaction.to_graph())]);
                if let Some(message) = message {
                    out.insert("message", message);
                }
                snapshot(Some(&out))?.unwrap_or(Value::Null)
            }
        };
        msg.set_payload(payload);
        let text = format!("interaction {interaction_id} {status}");
        debug!(node = self.ctx.id(), "{}", text);
        self.ctx.ok(text);
        Ok(vec![msg])
    }
}

fn autocomplete_choices(choices: Option<&Value>, focused: &str) -> Vec<AutocompleteChoice> {
    choices
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|choice| choice.starts_with(focused))
        .map(|choice| AutocompleteChoice { name: choice.to_string(), value: choice.to_string() })
        .collect()
}

#[async_trait]
impl<K: Connector> FlowNode for InteractionManagerNode<K> {
    fn id(&self) -> &str {
        self.ctx.id()
    }

    fn type_name(&self) -> &'static str {
        "discordInteractionManager"
    }

    async fn input(&self, msg: Message) -> Result<Vec<Message>, NodeError> {
        reported(&self.ctx, self.respond(msg).await)
    }

    async fn close(&self) {
        self.session.close();
    }
}
