use std::sync::Arc;

use async_trait::async_trait;
use discord_core::{ConnectionRegistry, Connector, Credential, GrantError, GrantIssuer};
use tracing::debug;

use super::{NodeSession, reported};
use crate::{
    message::Message,
    node::{FlowNode, NodeContext, NodeError},
    services::Services,
};

/// Hands downstream nodes a client through each message it forwards.
///
/// Every input gets a grant keyed `"{msg_id}:{node_id}"` bound to it; the
/// grant holds a registry reference until it is revoked, expires, or this
/// node closes.
pub struct ClientNode<K: Connector> {
    ctx: NodeContext,
    session: NodeSession<K>,
    issuer: GrantIssuer<K>,
}

impl<K: Connector> ClientNode<K> {
    pub async fn start(ctx: NodeContext, credential: Credential, services: &Services<K>) -> Self {
        let registry: ConnectionRegistry<K> = services.registry.clone();
        let session = NodeSession::open(&ctx, registry.clone(), &credential).await;
        let issuer = GrantIssuer::new(ctx.id(), credential, registry, services.grants.clone());
        Self { ctx, session, issuer }
    }

    /// Grants still out from this node.
    pub fn outstanding(&self) -> usize {
        self.issuer.outstanding()
    }

    async fn bind(&self, mut msg: Message) -> Result<Vec<Message>, NodeError> {
        // refuse input while the node's own connection is down
        self.session.client()?;
        if msg.grant().is_some() {
            return Err(GrantError::AlreadyBound.into());
        }
        let grant = self.issuer.issue(&msg.id()).await?;
        if let Err(err) = msg.bind_grant(Arc::new(grant.clone())) {
            grant.revoke();
            return Err(err.into());
        }
        debug!(node = self.ctx.id(), key = grant.key(), "client bound to message");
        Ok(vec![msg])
    }
}

#[async_trait]
impl<K: Connector> FlowNode for ClientNode<K> {
    fn id(&self) -> &str {
        self.ctx.id()
    }

    fn type_name(&self) -> &'static str {
        "discordClient"
    }

    async fn input(&self, msg: Message) -> Result<Vec<Message>, NodeError> {
        reported(&self.ctx, self.bind(msg).await)
    }

    async fn close(&self) {
        self.issuer.close();
        self.session.close();
    }
}
