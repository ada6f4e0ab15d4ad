//! Discord nodes for flows.
//!
//! The heavy lifting (shared sessions, correlation, snapshots, grants) lives
//! in `discord_core`; this crate wires those services into flow nodes and
//! carries configuration and logging.

pub mod config;
pub mod formatter;
pub mod logger;
pub mod message;
pub mod node;
pub mod nodes;
pub mod schema;
pub mod sdk;
pub mod services;

pub use discord_core;
