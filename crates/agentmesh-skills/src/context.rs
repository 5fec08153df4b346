//! Dispatch context and handler results

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentmesh_eventdb::EventStore;
use agentmesh_types::{AgentKeypair, Event, WireCode, WireError};

/// The node's identity as seen by skills and the prompt builder.
#[derive(Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    /// Dotted-prefix routing address
    pub address: String,
    pub keypair: Arc<AgentKeypair>,
}

impl AgentIdentity {
    pub fn pubkey(&self) -> String {
        self.keypair.public_key_hex()
    }
}

impl std::fmt::Debug for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("agent_id", &self.agent_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Everything a handler may need about the packet being dispatched.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub event: Event,
    /// Peer the prepare arrived from
    pub peer_id: String,
    /// Inbound packet amount
    pub amount: u64,
    pub destination: String,
    pub expires_at: DateTime<Utc>,
    pub db: EventStore,
    pub identity: AgentIdentity,
}

/// Outcome of a skill invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    /// Events to attach to the fulfill packet's payload
    #[serde(
        rename = "responseEvents",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub response_events: Vec<Event>,
}

impl HandlerResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            response_events: Vec::new(),
        }
    }

    pub fn ok_with_events(events: Vec<Event>) -> Self {
        Self {
            success: true,
            error: None,
            response_events: events,
        }
    }

    pub fn fail(code: WireCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(WireError::new(code, message)),
            response_events: Vec::new(),
        }
    }

    pub fn unhandled_kind(kind: u32) -> Self {
        Self::fail(WireCode::F99, format!("unhandled kind {kind}"))
    }
}
