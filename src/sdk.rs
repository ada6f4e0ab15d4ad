//! The slice of the Discord API the nodes talk to.
//!
//! [`Interaction`] is fed by the host: its gateway event handler wraps each
//! incoming interaction and hands it to `InteractionNode::on_interaction`.
//! With the `serenity` feature, [`GuildEvents`] is implemented over the REST
//! client. Tests use in-memory fakes for both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discord_core::{Correlated, Graph};
use serde::Serialize;
use thiserror::Error;

use crate::formatter::{ActionRow, Attachment};

/// Failure reported by the Discord API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SdkError(pub String);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionKind {
    Button,
    StringSelect,
    /// User, role, mentionable or channel select.
    OtherSelect,
    Command,
    MessageContextMenu,
    UserContextMenu,
    Autocomplete,
    ModalSubmit,
}

impl InteractionKind {
    pub fn is_command(self) -> bool {
        matches!(self, Self::Command | Self::MessageContextMenu | Self::UserContextMenu)
    }

    pub fn is_component(self) -> bool {
        matches!(self, Self::Button | Self::StringSelect | Self::OtherSelect)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum MessageFlag {
    SuppressEmbeds,
    SuppressNotifications,
    Ephemeral,
}

/// Body of a reply, edit or follow-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplyPayload {
    pub content: String,
    pub embeds: Vec<serde_json::Value>,
    pub files: Vec<Attachment>,
    pub components: Vec<ActionRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<MessageFlag>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalPayload {
    pub custom_id: String,
    pub title: String,
    pub components: Vec<ActionRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutocompleteChoice {
    pub name: String,
    pub value: String,
}

/// A live interaction, as wrapped by the host's gateway handler.
#[async_trait]
pub trait Interaction: Send + Sync + 'static {
    /// Snowflake id, also the correlation key.
    fn id(&self) -> String;
    fn kind(&self) -> InteractionKind;
    /// Command name for commands, custom id for components and modals.
    fn name(&self) -> Option<String>;
    /// Currently typed value of the focused autocomplete option.
    fn focused_value(&self) -> Option<String> {
        None
    }
    /// Object view handed to the snapshot serializer.
    fn to_graph(&self) -> Graph;

    async fn defer_reply(&self, ephemeral: bool) -> Result<(), SdkError>;
    async fn defer_update(&self) -> Result<(), SdkError>;
    async fn reply(&self, payload: ReplyPayload) -> Result<(), SdkError>;
    async fn edit_reply(&self, payload: ReplyPayload) -> Result<(), SdkError>;
    async fn delete_reply(&self) -> Result<(), SdkError>;
    async fn follow_up(&self, payload: ReplyPayload) -> Result<Graph, SdkError>;
    async fn edit_follow_up(&self, message_id: &str, payload: ReplyPayload) -> Result<Graph, SdkError>;
    async fn delete_follow_up(&self, message_id: &str) -> Result<(), SdkError>;
    async fn show_modal(&self, modal: ModalPayload) -> Result<(), SdkError>;
    async fn respond_autocomplete(&self, choices: Vec<AutocompleteChoice>) -> Result<(), SdkError>;
}

impl Correlated for dyn Interaction {
    fn correlation_id(&self) -> Option<String> {
        Some(self.id())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ChannelKind {
    Text,
    Voice,
    Stage,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub kind: ChannelKind,
}

/// Where a scheduled event takes place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entityType", rename_all = "camelCase")]
pub enum EventEntity {
    External { location: String },
    Voice { channel_id: String },
    StageInstance { channel_id: String },
}

/// A guild-only scheduled event ready to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScheduledEvent {
    pub name: String,
    pub scheduled_start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub entity: EventEntity,
    pub description: Option<String>,
    pub reason: Option<String>,
}

/// Scheduled-event endpoints of a guild plus the channel lookup they need.
#[async_trait]
pub trait GuildEvents: Send + Sync {
    async fn channel(&self, channel_id: &str) -> Result<Option<ChannelInfo>, SdkError>;
    async fn fetch_event(&self, guild_id: &str, event_id: &str) -> Result<Graph, SdkError>;
    async fn list_events(&self, guild_id: &str) -> Result<Graph, SdkError>;
    async fn create_event(&self, guild_id: &str, event: NewScheduledEvent) -> Result<Graph, SdkError>;
    async fn delete_event(&self, guild_id: &str, event_id: &str) -> Result<(), SdkError>;
}

#[cfg(feature = "serenity")]
mod serenity_events {
    use async_trait::async_trait;
    use discord_core::{Graph, client::serenity_client::SerenityClient};
    use serde_json::json;
    use serenity::model::{
        channel::{Channel, ChannelType},
        id::{ChannelId, GuildId, ScheduledEventId},
    };

    use super::{ChannelInfo, ChannelKind, EventEntity, GuildEvents, NewScheduledEvent, SdkError};

    fn snowflake(raw: &str, what: &str) -> Result<u64, SdkError> {
        raw.parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| SdkError(format!("`{raw}` is not a valid {what} id")))
    }

    fn api(err: serenity::Error) -> SdkError {
        SdkError(err.to_string())
    }

    fn graph<T: serde::Serialize>(value: &T) -> Result<Graph, SdkError> {
        Graph::from_serialize(value).map_err(|e| SdkError(e.to_string()))
    }

    #[async_trait]
    impl GuildEvents for SerenityClient {
        async fn channel(&self, channel_id: &str) -> Result<Option<ChannelInfo>, SdkError> {
            let id = ChannelId::new(snowflake(channel_id, "channel")?);
            let channel = match self.http().get_channel(id).await {
                Ok(channel) => channel,
                Err(_) => return Ok(None),
            };
            let kind = match &channel {
                Channel::Guild(gc) => match gc.kind {
                    ChannelType::Text => ChannelKind::Text,
                    ChannelType::Voice => ChannelKind::Voice,
                    ChannelType::Stage => ChannelKind::Stage,
                    _ => ChannelKind::Other,
                },
                _ => ChannelKind::Other,
            };
            Ok(Some(ChannelInfo { id: channel.id().to_string(), kind }))
        }

        async fn fetch_event(&self, guild_id: &str, event_id: &str) -> Result<Graph, SdkError> {
            let guild = GuildId::new(snowflake(guild_id, "guild")?);
            let event = ScheduledEventId::new(snowflake(event_id, "event")?);
            let event = self.http().get_scheduled_event(guild, event, false).await.map_err(api)?;
            graph(&event)
        }

        async fn list_events(&self, guild_id: &str) -> Result<Graph, SdkError> {
            let guild = GuildId::new(snowflake(guild_id, "guild")?);
            let events = self.http().get_scheduled_events(guild, false).await.map_err(api)?;
            graph(&events)
        }

        async fn create_event(&self, guild_id: &str, event: NewScheduledEvent) -> Result<Graph, SdkError> {
            let guild = GuildId::new(snowflake(guild_id, "guild")?);
            // privacy level 2 is guild-only, the only level Discord accepts
            let mut body = json!({
                "name": event.name,
                "privacy_level": 2,
                "scheduled_start_time": event.scheduled_start_time.to_rfc3339(),
                "description": event.description,
            });
            if let Some(end) = event.scheduled_end_time {
                body["scheduled_end_time"] = json!(end.to_rfc3339());
            }
            match event.entity {
                EventEntity::StageInstance { channel_id } => {
                    body["entity_type"] = json!(1);
                    body["channel_id"] = json!(channel_id);
                }
                EventEntity::Voice { channel_id } => {
                    body["entity_type"] = json!(2);
                    body["channel_id"] = json!(channel_id);
                }
                EventEntity::External { location } => {
                    body["entity_type"] = json!(3);
                    body["entity_metadata"] = json!({ "location": location });
                }
            }
            let created = self
                .http()
                .create_scheduled_event(guild, &body, event.reason.as_deref())
                .await
                .map_err(api)?;
            graph(&created)
        }

        async fn delete_event(&self, guild_id: &str, event_id: &str) -> Result<(), SdkError> {
            let guild = GuildId::new(snowflake(guild_id, "guild")?);
            let event = ScheduledEventId::new(snowflake(event_id, "event")?);
            self.http().delete_scheduled_event(guild, event).await.map_err(api)
        }
    }
}
