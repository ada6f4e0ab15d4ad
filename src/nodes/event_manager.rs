use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use discord_core::{Connector, Credential, snapshot};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{NodeSession, graph_id, id_or_object, reported};
use crate::{
    message::Message,
    node::{FlowNode, NodeContext, NodeError},
    sdk::{ChannelKind, EventEntity, GuildEvents, NewScheduledEvent},
    services::Services,
};

/// Node-level defaults; message properties fill in whatever is unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct EventManagerConfig {
    pub guild: Option<String>,
    pub event: Option<String>,
}

/// Reads, lists, creates and deletes guild scheduled events.
pub struct EventManagerNode<K: Connector> {
    ctx: NodeContext,
    config: EventManagerConfig,
    session: NodeSession<K>,
}

impl<K> EventManagerNode<K>
where
    K: Connector,
    K::Client: GuildEvents,
{
    pub async fn start(ctx: NodeContext, config: EventManagerConfig, credential: Credential, services: &Services<K>) -> Self {
        let session = NodeSession::open(&ctx, services.registry.clone(), &credential).await;
        Self { ctx, config, session }
    }

    async fn run(&self, mut msg: Message) -> Result<Vec<Message>, NodeError> {
        let client = self.session.client()?;
        let guild = self
            .config
            .guild
            .clone()
            .filter(|g| !g.is_empty())
            .or_else(|| id_or_object(msg.get("guild")))
            .ok_or_else(|| NodeError::InvalidInput("msg.guild wasn't set correctly".into()))?;
        let event_id = || {
            self.config
                .event
                .clone()
                .filter(|e| !e.is_empty())
                .or_else(|| id_or_object(msg.get("event")))
                .ok_or_else(|| NodeError::InvalidInput("msg.event wasn't set correctly".into()))
        };

        let (text, result) = match msg.get_str("action").map(str::to_lowercase).as_deref() {
            None | Some("info") => {
                let event = client.fetch_event(&guild, &event_id()?).await?;
                (format!("event {} info obtained", graph_id(&event)), Some(event))
            }
            Some("all") => {
                let events = client.list_events(&guild).await?;
                (format!("events [{}] obtained", events.len()), Some(events))
            }
            Some("create") => {
                let request = self.new_event(client.as_ref(), &msg).await?;
                let event = client.create_event(&guild, request).await?;
                (format!("event {} created", graph_id(&event)), Some(event))
            }
            Some("delete") => {
                let event = client.fetch_event(&guild, &event_id()?).await?;
                let id = graph_id(&event);
                client.delete_event(&guild, &id).await?;
                (format!("event {id} deleted"), None)
            }
            Some(_) => return Err(NodeError::InvalidInput("msg.action has an incorrect value".into())),
        };

        msg.set_payload(snapshot(result.as_ref())?.unwrap_or(Value::Null));
        self.ctx.ok(text);
        Ok(vec![msg])
    }

    async fn new_event(&self, client: &K::Client, msg: &Message) -> Result<NewScheduledEvent, NodeError> {
        let invalid = |text: String| NodeError::InvalidInput(text);
        let name = id_or_object(msg.get("eventName")).ok_or_else(|| invalid("msg.eventName wasn't set correctly".into()))?;
        let start = msg
            .get("scheduledStartTime")
            .and_then(parse_time)
            .ok_or_else(|| invalid("msg.scheduledStartTime wasn't set correctly".into()))?;
        let end = msg
            .get("scheduledEndTime")
            .filter(|raw| !raw.is_null())
            .map(|raw| parse_time(raw).ok_or_else(|| invalid("msg.scheduledEndTime wasn't set correctly".into())))
            .transpose()?;

        let event_type = msg.get_str("eventType").unwrap_or("external");
        let entity = match event_type.to_lowercase().as_str() {
            "external" => {
                let location = msg.get_str("eventLocation").ok_or_else(|| {
                    invalid(
                        "msg.eventLocation wasn't set correctly, it is required when event type is set to external"
                            .into(),
                    )
                })?;
                if end.is_none() {
                    return Err(invalid(
                        "msg.scheduledEndTime wasn't set correctly, it is required when event type is set to external"
                            .into(),
                    ));
                }
                EventEntity::External { location: location.to_string() }
            }
            kind @ ("voice" | "stage") => {
                let channel = match id_or_object(msg.get("channel")) {
                    Some(id) => client.channel(&id).await?,
                    None => None,
                };
                let channel = channel.ok_or_else(|| {
                    invalid(format!(
                        "msg.channel wasn't set correctly, it is required when event type is set to {kind}"
                    ))
                })?;
                match (kind, channel.kind) {
                    ("voice", ChannelKind::Voice) => EventEntity::Voice { channel_id: channel.id },
                    ("voice", _) => {
                        return Err(invalid(
                            "msg.channel must reference a voice channel when event type is set to voice".into(),
                        ));
                    }
                    (_, ChannelKind::Stage) => EventEntity::StageInstance { channel_id: channel.id },
                    _ => {
                        return Err(invalid(
                            "msg.channel must reference a stage channel when event type is set to stage".into(),
                        ));
                    }
                }
            }
            _ => {
                return Err(invalid(format!(
                    "msg.eventType wasn't set correctly, {event_type} is not a valid event type"
                )));
            }
        };

        Ok(NewScheduledEvent {
            name,
            scheduled_start_time: start,
            scheduled_end_time: end,
            entity,
            description: msg.get_str("description").map(str::to_string),
            reason: msg.get_str("reason").map(str::to_string),
        })
    }
}

/// RFC 3339 strings, naive ISO timestamps (read as UTC) or epoch milliseconds.
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok().map(|t| t.and_utc())),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[async_trait]
impl<K> FlowNode for EventManagerNode<K>
where
    K: Connector,
    K::Client: GuildEvents,
{
    fn id(&self) -> &str {
        self.ctx.id()
    }

    fn type_name(&self) -> &'static str {
        "discordEventManager"
    }

    async fn input(&self, msg: Message) -> Result<Vec<Message>, NodeError> {
        reported(&self.ctx, self.run(msg).await)
    }

    async fn close(&self) {
        self.session.close();
    }
}
