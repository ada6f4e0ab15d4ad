use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use discord_core::{
    ChatClient, ConnectionError, Connector, Credential, Graph, ManualTimers, Timers,
    test_util::{FakeClient, FakeConnector},
};
use discord_flow::{
    config::Settings,
    message::Message,
    node::{FlowNode, NodeContext, NodeError, RecordingSink, StatusFill},
    nodes::{
        client::ClientNode,
        event_manager::{EventManagerConfig, EventManagerNode},
        interaction::{CommandResponseType, InteractionConfig, InteractionFilter, InteractionNode},
        interaction_manager::InteractionManagerNode,
    },
    sdk::{
        AutocompleteChoice, ChannelInfo, ChannelKind, EventEntity, GuildEvents, Interaction, InteractionKind,
        ModalPayload, NewScheduledEvent, ReplyPayload, SdkError,
    },
    services::Services,
};
use serde_json::{Value, json};

const TTL: Duration = Duration::from_secs(300);

fn services<K: Connector>(connector: K) -> (ManualTimers, Services<K>) {
    let timers = ManualTimers::new();
    let services = Services::new(connector, Arc::new(timers.clone()) as Arc<dyn Timers>, &Settings::default());
    (timers, services)
}

fn ctx(id: &str, sink: &RecordingSink) -> NodeContext {
    NodeContext::new(id, Arc::new(sink.clone()))
}

fn token() -> Credential {
    Credential::new("bot-token-abcd")
}

/// In-memory interaction that records every call made on it.
struct FakeInteraction {
    snowflake: u64,
    kind: InteractionKind,
    name: Option<String>,
    focused: Option<String>,
    calls: Mutex<Vec<String>>,
    replies: Mutex<Vec<ReplyPayload>>,
    modals: Mutex<Vec<ModalPayload>>,
    choices: Mutex<Vec<AutocompleteChoice>>,
    fail_defer: AtomicBool,
}

impl FakeInteraction {
    fn new(snowflake: u64, kind: InteractionKind, name: &str) -> Arc<Self> {
        Arc::new(Self {
            snowflake,
            kind,
            name: Some(name.to_string()),
            focused: None,
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            modals: Mutex::new(Vec::new()),
            choices: Mutex::new(Vec::new()),
            fail_defer: AtomicBool::new(false),
        })
    }

    fn autocomplete(snowflake: u64, focused: &str) -> Arc<Self> {
        Arc::new(Self {
            snowflake,
            kind: InteractionKind::Autocomplete,
            name: Some("fruit".into()),
            focused: Some(focused.to_string()),
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            modals: Mutex::new(Vec::new()),
            choices: Mutex::new(Vec::new()),
            fail_defer: AtomicBool::new(false),
        })
    }

    fn fail_defers(&self) {
        self.fail_defer.store(true, Ordering::SeqCst);
    }

    fn deferred(&self, call: &str) -> Result<(), SdkError> {
        if self.fail_defer.load(Ordering::SeqCst) {
            return Err(SdkError("Unknown interaction".into()));
        }
        self.record(call);
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl Interaction for FakeInteraction {
    fn id(&self) -> String {
        self.snowflake.to_string()
    }

    fn kind(&self) -> InteractionKind {
        self.kind
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn focused_value(&self) -> Option<String> {
        self.focused.clone()
    }

    fn to_graph(&self) -> Graph {
        let graph = Graph::map([
            ("id", Graph::from(self.snowflake)),
            ("customId", Graph::from(self.name.clone().unwrap_or_default())),
        ]);
        // the SDK object points back at itself through its client
        graph.insert("client", Graph::map([("interaction", graph.clone())]));
        graph
    }

    async fn defer_reply(&self, ephemeral: bool) -> Result<(), SdkError> {
        self.deferred(if ephemeral { "deferReply(ephemeral)" } else { "deferReply" })
    }

    async fn defer_update(&self) -> Result<(), SdkError> {
        self.deferred("deferUpdate")
    }

    async fn reply(&self, payload: ReplyPayload) -> Result<(), SdkError> {
        self.record("reply");
        self.replies.lock().unwrap().push(payload);
        Ok(())
    }

    async fn edit_reply(&self, payload: ReplyPayload) -> Result<(), SdkError> {
        self.record("editReply");
        self.replies.lock().unwrap().push(payload);
        Ok(())
    }

    async fn delete_reply(&self) -> Result<(), SdkError> {
        self.record("deleteReply");
        Ok(())
    }

    async fn follow_up(&self, payload: ReplyPayload) -> Result<Graph, SdkError> {
        self.record("followUp");
        self.replies.lock().unwrap().push(payload);
        Ok(Graph::map([("id", Graph::from(1_300_000_000_000_000_077u64))]))
    }

    async fn edit_follow_up(&self, message_id: &str, _payload: ReplyPayload) -> Result<Graph, SdkError> {
        self.record(&format!("editFollowUp({message_id})"));
        Ok(Graph::map([("id", Graph::from(message_id))]))
    }

    async fn delete_follow_up(&self, message_id: &str) -> Result<(), SdkError> {
        self.record(&format!("deleteFollowUp({message_id})"));
        Ok(())
    }

    async fn show_modal(&self, modal: ModalPayload) -> Result<(), SdkError> {
        self.record(&format!("showModal({})", modal.custom_id));
        self.modals.lock().unwrap().push(modal);
        Ok(())
    }

    async fn respond_autocomplete(&self, choices: Vec<AutocompleteChoice>) -> Result<(), SdkError> {
        self.record("respond");
        *self.choices.lock().unwrap() = choices;
        Ok(())
    }
}

fn manager_msg(interaction_id: &str, action: &str, payload: Value) -> Message {
    let mut msg = Message::new("m-out", payload, None);
    msg.add("interactionId", interaction_id);
    msg.add("action", action);
    msg
}

#[tokio::test]
async fn nodes_share_one_connection_and_tear_it_down_when_idle() {
    let connector = FakeConnector::new();
    let (timers, services) = services(connector.clone());
    let sink = RecordingSink::new();

    let listener = InteractionNode::start(ctx("listen", &sink), InteractionConfig::default(), token(), &services).await;
    let responder = InteractionManagerNode::start(ctx("respond", &sink), token(), &services).await;
    let client = ClientNode::start(ctx("client", &sink), token(), &services).await;
    assert_eq!(connector.connects(), 1);
    assert_eq!(services.registry.ref_count(&token()), 3);

    listener.close().await;
    responder.close().await;
    client.close().await;
    assert_eq!(services.registry.ref_count(&token()), 0);
    assert_eq!(connector.disconnects(), 0);

    timers.advance(TTL - Duration::from_secs(1)).await;
    assert_eq!(connector.disconnects(), 0);
    timers.advance(Duration::from_secs(1)).await;
    assert_eq!(connector.disconnects(), 1);
    assert!(services.registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_node_starts_connect_once() {
    let connector = FakeConnector::new();
    let (timers, services) = services(connector.clone());
    let sink = RecordingSink::new();

    let starts = (0..8).map(|i| {
        let services = services.clone();
        let sink = sink.clone();
        tokio::spawn(async move { ClientNode::start(ctx(&format!("c{i}"), &sink), token(), &services).await })
    });
    let nodes: Vec<_> = futures::future::join_all(starts).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(connector.connects(), 1);
    assert_eq!(services.registry.ref_count(&token()), 8);

    for node in &nodes {
        node.close().await;
    }
    timers.advance(TTL).await;
    assert_eq!(connector.disconnects(), 1);
}

#[tokio::test]
async fn grant_rides_along_and_close_releases_exactly_once() {
    let connector = FakeConnector::new();
    let (timers, services) = services(connector.clone());
    let sink = RecordingSink::new();
    let node = ClientNode::start(ctx("n1", &sink), token(), &services).await;

    let out = node.input(Message::new("m1", json!({"text": "hi"}), None)).await.unwrap();
    let msg = &out[0];
    assert_eq!(msg.grant().unwrap().key(), "m1:n1");
    let client = msg.client::<FakeClient>().unwrap();
    assert_eq!(client.user_tag(), format!("bot{}", token().fingerprint()));

    // downstream keeps a clone of the message, then the node goes away
    let copy = msg.clone();
    node.close().await;
    assert_eq!(services.registry.ref_count(&token()), 0);
    assert!(copy.client::<FakeClient>().is_none());
    assert!(!copy.grant().unwrap().revoke());

    timers.advance(TTL).await;
    assert_eq!(connector.disconnects(), 1);
}

#[tokio::test]
async fn unrevoked_grant_expires_and_releases() {
    let connector = FakeConnector::new();
    let (timers, services) = services(connector.clone());
    let sink = RecordingSink::new();
    let node = ClientNode::start(ctx("n1", &sink), token(), &services).await;

    let out = node.input(Message::new("m1", json!(null), None)).await.unwrap();
    assert_eq!(services.registry.ref_count(&token()), 2);

    timers.advance(TTL).await;
    assert!(out[0].client::<FakeClient>().is_none());
    assert_eq!(services.registry.ref_count(&token()), 1);
    assert_eq!(node.outstanding(), 0);
}

#[tokio::test]
async fn button_round_trip_through_listener_and_responder() {
    let (_timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let config = InteractionConfig {
        interaction_type: InteractionFilter::Button,
        custom_id: Some("approve,reject".into()),
        ..Default::default()
    };
    let listener = InteractionNode::start(ctx("listen", &sink), config, token(), &services).await;
    let responder = InteractionManagerNode::start(ctx("respond", &sink), token(), &services).await;

    let button = FakeInteraction::new(1_180_000_000_000_000_001, InteractionKind::Button, "approve");
    let msg = listener.on_interaction(button.clone()).await.unwrap().unwrap();
    assert_eq!(msg.get_str("interactionId"), Some("1180000000000000001"));
    assert_eq!(button.calls(), vec!["deferUpdate"]);
    // 64-bit id survives as an exact decimal string, the cycle as a marker
    assert_eq!(msg.payload()["id"], "1180000000000000001");
    assert_eq!(msg.payload()["client"]["interaction"], json!({"$ref": 0}));
    assert!(services.interactions.contains("1180000000000000001"));

    let out = responder
        .input(manager_msg("1180000000000000001", "reply", json!({"content": "Approved", "ephemeral": true})))
        .await
        .unwrap();
    assert_eq!(button.calls(), vec!["deferUpdate", "reply"]);
    let sent = button.replies.lock().unwrap()[0].clone();
    assert_eq!(sent.content, "Approved");
    assert!(sent.ephemeral);
    assert_eq!(out[0].payload()["interaction"]["id"], "1180000000000000001");
    assert_eq!(out[0].payload()["interaction"]["client"]["interaction"], json!({"$ref": 1}));
    assert_eq!(sink.last_status("respond").unwrap().text, "interaction 1180000000000000001 replied");

    // requeued for follow-ups
    assert!(services.interactions.contains("1180000000000000001"));
    let out = responder
        .input(manager_msg("1180000000000000001", "FollowUp", json!("more")))
        .await
        .unwrap();
    assert_eq!(out[0].payload()["message"]["id"], "1300000000000000077");

    // a modal ends the conversation
    let mut modal = manager_msg("1180000000000000001", "showmodal", json!({"content": "Why?"}));
    modal.add("customId", "reason");
    responder.input(modal).await.unwrap();
    assert_eq!(button.calls().last().unwrap(), "showModal(reason)");
    assert!(!services.interactions.contains("1180000000000000001"));

    let err = responder.input(manager_msg("1180000000000000001", "edit", json!("late"))).await.unwrap_err();
    assert_eq!(err.to_string(), "Could not find interaction '1180000000000000001'. It may have expired.");
    assert_eq!(sink.last_status("respond").unwrap().fill, StatusFill::Red);
}

#[tokio::test]
async fn listener_filters_by_type_and_name() {
    let (_timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let config = InteractionConfig {
        interaction_type: InteractionFilter::Command,
        custom_id: Some("ping".into()),
        ephemeral: true,
        ..Default::default()
    };
    let listener = InteractionNode::start(ctx("listen", &sink), config, token(), &services).await;

    let button = FakeInteraction::new(1, InteractionKind::Button, "ping");
    assert!(listener.on_interaction(button.clone()).await.unwrap().is_none());
    let other = FakeInteraction::new(2, InteractionKind::Command, "pong");
    assert!(listener.on_interaction(other.clone()).await.unwrap().is_none());
    assert!(services.interactions.is_empty());

    let ping = FakeInteraction::new(3, InteractionKind::Command, "ping");
    assert!(listener.on_interaction(ping.clone()).await.unwrap().is_some());
    assert_eq!(ping.calls(), vec!["deferReply(ephemeral)"]);
    assert!(button.calls().is_empty() && other.calls().is_empty());

    let quiet = InteractionNode::start(
        ctx("quiet", &sink),
        InteractionConfig { command_response_type: CommandResponseType::None, ..Default::default() },
        token(),
        &services,
    )
    .await;
    let cmd = FakeInteraction::new(4, InteractionKind::Command, "anything");
    assert!(quiet.on_interaction(cmd.clone()).await.unwrap().is_some());
    assert!(cmd.calls().is_empty());
}

#[tokio::test]
async fn parked_interaction_expires_unless_renewed() {
    let (timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let listener = InteractionNode::start(ctx("listen", &sink), InteractionConfig::default(), token(), &services).await;
    let responder = InteractionManagerNode::start(ctx("respond", &sink), token(), &services).await;

    let kept = FakeInteraction::new(10, InteractionKind::ModalSubmit, "form");
    let dropped = FakeInteraction::new(11, InteractionKind::ModalSubmit, "form");
    listener.on_interaction(kept.clone()).await.unwrap();
    listener.on_interaction(dropped.clone()).await.unwrap();

    timers.advance(Duration::from_secs(200)).await;
    responder.input(manager_msg("10", "edit", json!("thanks"))).await.unwrap();
    timers.advance(Duration::from_secs(200)).await;

    assert!(services.interactions.contains("10"));
    assert!(!services.interactions.contains("11"));
    let err = responder.input(manager_msg("11", "edit", json!("thanks"))).await.unwrap_err();
    assert!(matches!(err, NodeError::InteractionExpired(id) if id == "11"));
    assert_eq!(sink.errors("respond").len(), 1);
}

#[tokio::test]
async fn autocomplete_and_follow_up_edits() {
    let (_timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let listener = InteractionNode::start(
        ctx("listen", &sink),
        InteractionConfig { custom_id: Some("unrelated".into()), ..Default::default() },
        token(),
        &services,
    )
    .await;
    let responder = InteractionManagerNode::start(ctx("respond", &sink), token(), &services).await;

    // autocomplete ignores the name filter and is never deferred
    let auto = FakeInteraction::autocomplete(20, "ba");
    let msg = listener.on_interaction(auto.clone()).await.unwrap().unwrap();
    assert!(auto.calls().is_empty());

    let mut respond = manager_msg(msg.get_str("interactionId").unwrap(), "respondAutocomplete", json!(null));
    respond.add("autoCompleteChoices", json!(["banana", "apple", "bamboo"]));
    responder.input(respond).await.unwrap();
    let names: Vec<String> = auto.choices.lock().unwrap().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, vec!["banana", "bamboo"]);

    let err = responder.input(manager_msg("20", "editfollowup", json!("x"))).await.unwrap_err();
    assert!(err.to_string().contains("msg.messageId"));

    // a failed action consumed the entry; park a fresh command and edit a follow-up on it
    let cmd = FakeInteraction::new(21, InteractionKind::Command, "ask");
    assert!(listener.on_interaction(cmd.clone()).await.unwrap().is_none());
    services.interactions.put(cmd.clone() as Arc<dyn Interaction>, None);
    let mut edit = manager_msg("21", "editfollowup", json!("edited"));
    edit.add("message", json!({"id": "555"}));
    let out = responder.input(edit).await.unwrap();
    assert_eq!(out[0].payload()["message"]["id"], "555");

    let mut delete = manager_msg("21", "delete", json!(null));
    delete.add("followupId", "555");
    let out = responder.input(delete).await.unwrap();
    assert_eq!(out[0].payload(), &json!({"deleted": true, "messageId": "555"}));
    assert_eq!(cmd.calls(), vec!["editFollowUp(555)", "deleteFollowUp(555)"]);

    let err = responder.input(manager_msg("21", "explode", json!(null))).await.unwrap_err();
    assert_eq!(err.to_string(), "msg.action has an incorrect value");
}

#[tokio::test]
async fn responder_rejects_bad_component_rows() {
    let (_timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let responder = InteractionManagerNode::start(ctx("respond", &sink), token(), &services).await;
    let button = FakeInteraction::new(30, InteractionKind::Button, "b");
    services.interactions.put(button.clone() as Arc<dyn Interaction>, None);

    let err = responder
        .input(manager_msg("30", "edit", json!({"components": [{"type": 2, "components": []}]})))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Component rows must have type 1 and include a components array.");
    assert!(button.calls().is_empty());
    // a body that never reached Discord leaves the interaction parked
    assert!(services.interactions.contains("30"));

    let text_input = json!([{"type": 1, "components": [{"type": 4, "custom_id": "why", "label": "Why", "style": 2}]}]);
    let mut reply = manager_msg("30", "reply", json!("hi"));
    reply.add("components", text_input);
    let err = responder.input(reply).await.unwrap_err();
    assert_eq!(err.to_string(), "Unsupported component type '4'.");
    assert!(services.interactions.contains("30"));
}

#[tokio::test]
async fn show_modal_with_text_input() {
    let (_timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let responder = InteractionManagerNode::start(ctx("respond", &sink), token(), &services).await;
    let command = FakeInteraction::new(40, InteractionKind::Command, "feedback");
    services.interactions.put(command.clone() as Arc<dyn Interaction>, None);

    let mut modal = manager_msg("40", "showModal", json!("Feedback"));
    modal.add("customId", "feedbackForm");
    modal.add(
        "components",
        json!([{"type": 1, "components": [
            {"type": 4, "custom_id": "comment", "label": "Comment", "style": 2, "required": true}
        ]}]),
    );
    responder.input(modal).await.unwrap();

    assert_eq!(command.calls(), vec!["showModal(feedbackForm)"]);
    let shown = command.modals.lock().unwrap()[0].clone();
    assert_eq!(shown.title, "Feedback");
    assert_eq!(serde_json::to_value(&shown.components).unwrap()[0]["components"][0]["custom_id"], "comment");
    assert!(!services.interactions.contains("40"));
    assert_eq!(sink.last_status("respond").unwrap().text, "interaction 40 modal showed");
}

#[tokio::test]
async fn failed_defer_parks_nothing() {
    let (_timers, services) = services(FakeConnector::new());
    let sink = RecordingSink::new();
    let listener = InteractionNode::start(ctx("listen", &sink), InteractionConfig::default(), token(), &services).await;

    let button = FakeInteraction::new(50, InteractionKind::Button, "late");
    button.fail_defers();
    let err = listener.on_interaction(button.clone()).await.unwrap_err();
    assert_eq!(err.to_string(), "Unknown interaction");
    assert!(services.interactions.is_empty());
    assert_eq!(sink.errors("listen").len(), 1);
}

/// Guild with a voice channel (10), a stage channel (20) and a text channel (30).
#[derive(Clone, Default)]
struct GuildConnector {
    created: Arc<Mutex<Vec<NewScheduledEvent>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

struct GuildClient {
    created: Arc<Mutex<Vec<NewScheduledEvent>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChatClient for GuildClient {
    fn user_tag(&self) -> String {
        "events#0001".into()
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[async_trait]
impl Connector for GuildConnector {
    type Client = GuildClient;

    async fn connect(&self, _credential: &Credential) -> Result<GuildClient, ConnectionError> {
        Ok(GuildClient { created: self.created.clone(), deleted: self.deleted.clone() })
    }
}

fn event_graph(id: &str) -> Graph {
    Graph::map([("id", Graph::from(id.parse::<u64>().unwrap())), ("name", Graph::from("Launch"))])
}

#[async_trait]
impl GuildEvents for GuildClient {
    async fn channel(&self, channel_id: &str) -> Result<Option<ChannelInfo>, SdkError> {
        let kind = match channel_id {
            "10" => ChannelKind::Voice,
            "20" => ChannelKind::Stage,
            "30" => ChannelKind::Text,
            _ => return Ok(None),
        };
        Ok(Some(ChannelInfo { id: channel_id.to_string(), kind }))
    }

    async fn fetch_event(&self, _guild_id: &str, event_id: &str) -> Result<Graph, SdkError> {
        Ok(event_graph(event_id))
    }

    async fn list_events(&self, _guild_id: &str) -> Result<Graph, SdkError> {
        Ok(Graph::list(vec![event_graph("1"), event_graph("2")]))
    }

    async fn create_event(&self, _guild_id: &str, event: NewScheduledEvent) -> Result<Graph, SdkError> {
        self.created.lock().unwrap().push(event);
        Ok(event_graph("1300000000000000001"))
    }

    async fn delete_event(&self, _guild_id: &str, event_id: &str) -> Result<(), SdkError> {
        self.deleted.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}

fn event_msg(action: &str, props: Value) -> Message {
    let mut msg = Message::new("e1", json!(null), None);
    msg.add("action", action);
    if let Value::Object(props) = props {
        for (key, value) in props {
            msg.add(key, value);
        }
    }
    msg
}

#[tokio::test]
async fn event_manager_reads_and_deletes() {
    let connector = GuildConnector::default();
    let (_timers, services) = services(connector.clone());
    let sink = RecordingSink::new();
    let config = EventManagerConfig { guild: Some("900".into()), event: None };
    let node = EventManagerNode::start(ctx("events", &sink), config, token(), &services).await;

    let out = node.input(event_msg("info", json!({"event": "1300000000000000009"}))).await.unwrap();
    assert_eq!(out[0].payload()["id"], "1300000000000000009");
    assert_eq!(sink.last_status("events").unwrap().text, "event 1300000000000000009 info obtained");

    let out = node.input(event_msg("all", json!({}))).await.unwrap();
    assert_eq!(out[0].payload().as_array().unwrap().len(), 2);
    assert_eq!(sink.last_status("events").unwrap().text, "events [2] obtained");

    let out = node.input(event_msg("DELETE", json!({"event": {"id": "7"}}))).await.unwrap();
    assert_eq!(out[0].payload(), &Value::Null);
    assert_eq!(connector.deleted.lock().unwrap().clone(), vec!["7".to_string()]);

    let err = node.input(event_msg("nope", json!({}))).await.unwrap_err();
    assert_eq!(err.to_string(), "msg.action has an incorrect value");
}

#[tokio::test]
async fn event_manager_validates_new_events() {
    let connector = GuildConnector::default();
    let (_timers, services) = services(connector.clone());
    let sink = RecordingSink::new();
    let node = EventManagerNode::start(ctx("events", &sink), EventManagerConfig::default(), token(), &services).await;
    let base = json!({"guild": "900", "eventName": "Launch", "scheduledStartTime": "2026-11-01T18:00:00Z"});
    let with = |extra: Value| {
        let mut props = base.clone();
        for (k, v) in extra.as_object().unwrap() {
            props[k] = v.clone();
        }
        event_msg("create", props)
    };

    let cases = [
        (json!({"eventName": null}), "msg.eventName wasn't set correctly"),
        (json!({"scheduledStartTime": null}), "msg.scheduledStartTime wasn't set correctly"),
        (json!({}), "msg.eventLocation wasn't set correctly"),
        (json!({"eventLocation": "Park"}), "msg.scheduledEndTime wasn't set correctly"),
        (json!({"eventType": "voice"}), "msg.channel wasn't set correctly"),
        (json!({"eventType": "voice", "channel": "20"}), "must reference a voice channel"),
        (json!({"eventType": "stage", "channel": "30"}), "must reference a stage channel"),
        (json!({"eventType": "party"}), "party is not a valid event type"),
        (
            json!({"eventType": "voice", "channel": "10", "scheduledEndTime": "next tuesday"}),
            "msg.scheduledEndTime wasn't set correctly",
        ),
        (json!({"eventLocation": "Park", "scheduledEndTime": true}), "msg.scheduledEndTime wasn't set correctly"),
    ];
    for (extra, expected) in cases {
        let err = node.input(with(extra.clone())).await.unwrap_err();
        assert!(err.to_string().contains(expected), "{extra}: {err}");
    }
    assert!(connector.created.lock().unwrap().is_empty());

    let out = node.input(with(json!({"eventType": "Voice", "channel": {"id": "10"}}))).await.unwrap();
    assert_eq!(out[0].payload()["id"], "1300000000000000001");
    node.input(with(json!({"eventLocation": "Park", "scheduledEndTime": "2026-11-01T20:00:00Z"})))
        .await
        .unwrap();

    let created = connector.created.lock().unwrap().clone();
    assert_eq!(created[0].entity, EventEntity::Voice { channel_id: "10".into() });
    assert_eq!(created[1].entity, EventEntity::External { location: "Park".into() });
    assert!(created[1].scheduled_end_time.is_some());
    assert_eq!(sink.last_status("events").unwrap().text, "event 1300000000000000001 created");
}

#[tokio::test]
async fn shutdown_clears_everything() {
    let connector = FakeConnector::new();
    let (_timers, services) = services(connector.clone());
    let sink = RecordingSink::new();
    let node = ClientNode::start(ctx("n1", &sink), token(), &services).await;
    node.input(Message::new("m1", json!(1), None)).await.unwrap();
    services.interactions.put(FakeInteraction::new(1, InteractionKind::Button, "b") as Arc<dyn Interaction>, None);

    services.shutdown().await;
    assert!(services.grants.is_empty());
    assert!(services.interactions.is_empty());
    assert!(services.registry.is_empty());
    assert_eq!(connector.disconnects(), 1);
    assert_eq!(node.outstanding(), 0);
}
