//! AgentMesh Node - The single owning value behind one mesh node
//!
//! `Node` wires every subsystem together: the event store, the telemetry
//! emitter, the router, the skill registry, the dispatchers, both channel
//! engines, and the peer transport. No shared-mutable globals: every
//! subsystem receives a reference to exactly what it needs at
//! construction.

pub mod config;
pub mod node;
pub mod skills;

pub use config::{AiConfig, EvmConfig, NodeConfig, XrplConfig};
pub use node::{Node, NodeError, NodeStatus};
