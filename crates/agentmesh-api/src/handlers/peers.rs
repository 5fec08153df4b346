//! Peer directory and follow endpoints

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;

use agentmesh_types::{FollowEntry, PeerRecord};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /peers`
pub async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerRecord>> {
    Json(state.node.router.peers().await)
}

/// `GET /follows`
pub async fn list_follows(State(state): State<AppState>) -> Json<Vec<FollowEntry>> {
    Json(state.node.router.follows().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFollowRequest {
    pub pubkey: String,
    pub ilp_address: String,
    #[serde(default)]
    pub petname: Option<String>,
    #[serde(default)]
    pub btp_url: Option<String>,
    #[serde(default)]
    pub evm_address: Option<String>,
    #[serde(default)]
    pub xrp_address: Option<String>,
}

/// `POST /follows`
pub async fn add_follow(
    State(state): State<AppState>,
    Json(request): Json<AddFollowRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.pubkey.is_empty() {
        return Err(ApiError::bad_request("pubkey is required"));
    }
    if request.ilp_address.is_empty() {
        return Err(ApiError::bad_request("ilpAddress is required"));
    }
    state
        .node
        .router
        .upsert_follow(FollowEntry {
            pubkey: request.pubkey,
            ilp_address: request.ilp_address,
            petname: request.petname,
            btp_url: request.btp_url,
            evm_address: request.evm_address,
            xrp_address: request.xrp_address,
        })
        .await;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub peer_id: String,
    pub url: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub evm_address: Option<String>,
    #[serde(default)]
    pub xrp_address: Option<String>,
}

/// `POST /connect`
pub async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.peer_id.is_empty() {
        return Err(ApiError::bad_request("peerId is required"));
    }
    if !request.url.starts_with("ws://") && !request.url.starts_with("wss://") {
        return Err(ApiError::bad_request("url must be a ws:// or wss:// URL"));
    }
    state
        .node
        .connect_peer(
            &request.peer_id,
            &request.url,
            request.address,
            request.evm_address,
            request.xrp_address,
        )
        .await?;
    Ok(Json(json!({ "success": true, "peerId": request.peer_id })))
}
