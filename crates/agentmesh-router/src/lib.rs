//! AgentMesh Router - Peer directory and follow-graph routing
//!
//! The router owns two registries:
//!
//! - **Peers**: transport-level neighbors with dotted-prefix addresses
//! - **Follows**: the social directory mapping public keys to addresses
//!
//! Next-hop derivation is longest-prefix match over dotted addresses.
//! Follow entries are mutated only by applying a follow-list event or
//! through the control surface.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use agentmesh_types::{Event, FollowEntry, PeerRecord, WireCode, WireError};

/// Routing failures
#[derive(Debug, Error)]
pub enum RouterError {
    /// Maps to wire code `F02`
    #[error("no route to {destination}")]
    NoRoute { destination: String },

    #[error("unknown peer: {peer_id}")]
    UnknownPeer { peer_id: String },
}

impl From<RouterError> for WireError {
    fn from(error: RouterError) -> Self {
        match &error {
            RouterError::NoRoute { .. } => WireError::new(WireCode::F02, error.to_string()),
            RouterError::UnknownPeer { .. } => WireError::new(WireCode::F02, error.to_string()),
        }
    }
}

/// Where a destination address resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// The destination is this node
    Local,
    /// Forward to this peer
    Peer(PeerRecord),
}

/// Peer directory and follow graph.
pub struct Router {
    own_address: String,
    peers: RwLock<HashMap<String, PeerRecord>>,
    follows: RwLock<Vec<FollowEntry>>,
}

fn address_matches(prefix: &str, destination: &str) -> bool {
    destination == prefix || destination.starts_with(&format!("{prefix}."))
}

impl Router {
    pub fn new(own_address: impl Into<String>) -> Self {
        Self {
            own_address: own_address.into(),
            peers: RwLock::new(HashMap::new()),
            follows: RwLock::new(Vec::new()),
        }
    }

    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    /// Insert or replace a peer record
    pub async fn upsert_peer(&self, peer: PeerRecord) {
        info!(peer_id = %peer.peer_id, address = %peer.address, "peer registered");
        self.peers.write().await.insert(peer.peer_id.clone(), peer);
    }

    pub async fn remove_peer(&self, peer_id: &str) -> bool {
        self.peers.write().await.remove(peer_id).is_some()
    }

    pub async fn peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Snapshot of the peer directory
    pub async fn peers(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self.peers.read().await.values().cloned().collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Flip a peer's live flag
    pub async fn set_connected(&self, peer_id: &str, connected: bool) -> Result<(), RouterError> {
        let mut peers = self.peers.write().await;
        let peer = peers.get_mut(peer_id).ok_or_else(|| RouterError::UnknownPeer {
            peer_id: peer_id.to_string(),
        })?;
        peer.connected = connected;
        Ok(())
    }

    /// Longest-prefix next-hop for a dotted destination address.
    pub async fn resolve(&self, destination: &str) -> Result<Route, RouterError> {
        if address_matches(&self.own_address, destination) {
            return Ok(Route::Local);
        }
        let peers = self.peers.read().await;
        let best = peers
            .values()
            .filter(|peer| address_matches(&peer.address, destination))
            .max_by_key(|peer| peer.address.len());
        match best {
            Some(peer) => {
                debug!(destination, next_hop = %peer.peer_id, "route resolved");
                Ok(Route::Peer(peer.clone()))
            }
            None => Err(RouterError::NoRoute {
                destination: destination.to_string(),
            }),
        }
    }

    /// Insert or replace a follow entry (keyed by public key)
    pub async fn upsert_follow(&self, entry: FollowEntry) {
        let mut follows = self.follows.write().await;
        if let Some(existing) = follows.iter_mut().find(|f| f.pubkey == entry.pubkey) {
            *existing = entry;
        } else {
            follows.push(entry);
        }
    }

    pub async fn remove_follow(&self, pubkey: &str) -> bool {
        let mut follows = self.follows.write().await;
        let before = follows.len();
        follows.retain(|f| f.pubkey != pubkey);
        follows.len() != before
    }

    /// Snapshot of the follow directory
    pub async fn follows(&self) -> Vec<FollowEntry> {
        self.follows.read().await.clone()
    }

    pub async fn follow(&self, pubkey: &str) -> Option<FollowEntry> {
        self.follows
            .read()
            .await
            .iter()
            .find(|f| f.pubkey == pubkey)
            .cloned()
    }

    /// Replace the follow list from a follow-list event.
    ///
    /// Tags: `["p", <pubkey>, <address>, <petname>]`; entries with no
    /// pubkey are skipped. Returns the number of entries applied.
    pub async fn apply_follow_list(&self, event: &Event) -> usize {
        let entries: Vec<FollowEntry> = event
            .tags_named("p")
            .filter_map(|tag| {
                let pubkey = tag.get(1)?.clone();
                if pubkey.is_empty() {
                    return None;
                }
                Some(FollowEntry {
                    pubkey,
                    ilp_address: tag.get(2).cloned().unwrap_or_default(),
                    petname: tag.get(3).filter(|p| !p.is_empty()).cloned(),
                    btp_url: None,
                    evm_address: None,
                    xrp_address: None,
                })
            })
            .collect();
        let applied = entries.len();
        *self.follows.write().await = entries;
        info!(count = applied, "follow list applied");
        applied
    }
}
