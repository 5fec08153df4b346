//! Peer, follow, and pending-packet records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// A known peer in the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Unique peer id
    pub peer_id: String,
    /// Dotted-prefix routing address
    pub address: String,
    /// Transport URL for outbound links
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// EVM account for channel settlement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<String>,
    /// Ledger account for channel settlement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xrp_address: Option<String>,
    /// Whether a live link is currently attached
    pub connected: bool,
}

impl PeerRecord {
    pub fn new(peer_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            address: address.into(),
            url: None,
            evm_address: None,
            xrp_address: None,
            connected: false,
        }
    }
}

/// A follow-directory entry mapping a public key to a routing address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEntry {
    pub pubkey: String,
    /// Dotted-prefix routing address
    pub ilp_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub btp_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xrp_address: Option<String>,
}

/// Outstanding outbound prepare awaiting its fulfill or reject.
///
/// Created before the frame is written, deleted when the response arrives
/// or the timeout sweeper fires. Deletion is the idempotency token for
/// channel mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPacket {
    pub peer_id: String,
    /// Correlation id: the embedded event's id
    pub event_id: String,
    pub destination: String,
    pub amount: u64,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
