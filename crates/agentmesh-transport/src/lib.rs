//! AgentMesh Transport - Bidirectional peer links
//!
//! Every peer link is message-oriented: one JSON text frame carries one
//! packet. Outbound links dial the peer's URL and reconnect with
//! exponential backoff; inbound links arrive on the node's listener. Both
//! feed the same frame loop.
//!
//! Correlation: outgoing prepares register a pending record keyed by
//! `(peer id, event id)`; the responder echoes the event id in the
//! response payload. Responses with no echo fall back to the peer's single
//! pending entry (peers are RPC-serial in this core). A sweeper task
//! rejects expired pendings with `R02`.

pub mod link;
pub mod pending;
pub mod transport;

pub use link::PeerLink;
pub use pending::PendingTable;
pub use transport::{InboundHandler, PeerTransport, TransportConfig};

use thiserror::Error;

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to peer {peer_id}")]
    NotConnected { peer_id: String },

    #[error("link to peer {peer_id} is shutting down")]
    LinkClosed { peer_id: String },

    #[error("a prepare for event {event_id} is already in flight to {peer_id}")]
    DuplicatePending { peer_id: String, event_id: String },

    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),

    #[error("connect failed: {message}")]
    Connect { message: String },

    #[error(transparent)]
    Codec(#[from] agentmesh_codec::CodecError),
}
