//! Shared services behind the Discord flow nodes.
//!
//! Every node that talks to Discord goes through three small services:
//! * [`registry::ConnectionRegistry`] keeps one live client per bot token and
//!   tears it down once nobody has used it for a while.
//! * [`correlation::CorrelationCache`] parks in-flight objects (pending
//!   interactions, client grants) under a short-lived key.
//! * [`snapshot`] turns SDK object graphs into plain, acyclic JSON for the
//!   message bus and back.
//!
//! [`grant`] composes the first two so a live client can ride along a flow
//! message without handing out the raw handle.

pub mod client;
pub mod correlation;
pub mod credential;
pub mod error;
pub mod grant;
pub mod registry;
pub mod snapshot;
pub mod timers;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;

pub use client::{ChatClient, Connector};
pub use correlation::{Correlated, CorrelationCache, DEFAULT_TTL};
pub use credential::Credential;
pub use error::{ConnectionError, CorrelationMiss, GrantError, SerializationError};
pub use grant::{ClientGrant, GrantIssuer};
pub use registry::{ConnectionHandle, ConnectionRegistry, DEFAULT_IDLE_TEARDOWN};
pub use snapshot::{Graph, clone_graph, restore, snapshot};
pub use timers::{ManualTimers, TimerHandle, Timers, TokioTimers};
