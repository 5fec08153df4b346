//! Channel endpoints for both settlement substrates

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;

use agentmesh_channels::{ClaimResult, CooperativeSettleParams, SignedBalanceProof};
use agentmesh_types::{EvmChannel, XrplChannel};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /channels`
pub async fn list_evm_channels(State(state): State<AppState>) -> Json<Vec<EvmChannel>> {
    Json(state.node.evm.channels().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEvmChannelRequest {
    pub peer_evm_address: String,
    pub deposit_amount: u64,
}

/// `POST /channels/open`
pub async fn open_evm_channel(
    State(state): State<AppState>,
    Json(request): Json<OpenEvmChannelRequest>,
) -> Result<Json<EvmChannel>, ApiError> {
    if request.peer_evm_address.is_empty() {
        return Err(ApiError::bad_request("peerEvmAddress is required"));
    }
    if request.deposit_amount == 0 {
        return Err(ApiError::bad_request("depositAmount must be positive"));
    }
    let channel = state
        .node
        .evm
        .open_channel(&request.peer_evm_address, request.deposit_amount)
        .await?;
    Ok(Json(channel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignProofRequest {
    pub channel_id: String,
    pub nonce: u64,
    pub transferred_amount: u64,
}

/// `POST /channels/sign-proof`
pub async fn sign_proof(
    State(state): State<AppState>,
    Json(request): Json<SignProofRequest>,
) -> Result<Json<SignedBalanceProof>, ApiError> {
    if request.channel_id.is_empty() {
        return Err(ApiError::bad_request("channelId is required"));
    }
    let signed = state
        .node
        .evm
        .sign_balance_proof(&request.channel_id, request.nonce, request.transferred_amount)
        .await?;
    Ok(Json(signed))
}

/// `POST /channels/cooperative-settle`
pub async fn cooperative_settle(
    State(state): State<AppState>,
    Json(params): Json<CooperativeSettleParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if params.channel_id.is_empty() {
        return Err(ApiError::bad_request("channelId is required"));
    }
    let tx_hash = state.node.evm.cooperative_settle(params).await?;
    Ok(Json(json!({ "success": true, "txHash": tx_hash })))
}

/// `GET /xrp-channels`
pub async fn list_xrp_channels(State(state): State<AppState>) -> Json<Vec<XrplChannel>> {
    Json(state.node.xrpl.channels().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenXrpChannelRequest {
    pub destination: String,
    /// Drops, decimal string
    pub amount: String,
    #[serde(default)]
    pub settle_delay: Option<u64>,
}

/// `POST /xrp-channels/open`
pub async fn open_xrp_channel(
    State(state): State<AppState>,
    Json(request): Json<OpenXrpChannelRequest>,
) -> Result<Json<XrplChannel>, ApiError> {
    if request.destination.is_empty() {
        return Err(ApiError::bad_request("destination is required"));
    }
    if request.amount.parse::<u64>().is_err() {
        return Err(ApiError::bad_request("amount must be a drops string"));
    }
    let channel = state
        .node
        .xrpl
        .open_channel(&request.destination, &request.amount, request.settle_delay)
        .await?;
    Ok(Json(channel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub channel_id: String,
}

/// `POST /xrp-channels/claim`
pub async fn claim_xrp_channel(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResult>, ApiError> {
    if request.channel_id.is_empty() {
        return Err(ApiError::bad_request("channelId is required"));
    }
    let result = state.node.xrpl.claim(&request.channel_id).await?;
    Ok(Json(result))
}

/// `POST /configure-evm`: late-bind the chain client through the factory
/// the binary wired in.
pub async fn configure_evm(
    State(state): State<AppState>,
    Json(request): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let factory = state
        .evm_factory
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("no chain adapter available in this build"))?;
    let client = factory(&request).map_err(ApiError::bad_request)?;
    state.node.configure_evm(client).await;
    Ok(Json(json!({ "success": true })))
}

/// `POST /configure-xrp`
pub async fn configure_xrp(
    State(state): State<AppState>,
    Json(request): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let factory = state
        .xrp_factory
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("no ledger adapter available in this build"))?;
    let client = factory(&request).map_err(ApiError::bad_request)?;
    state.node.configure_xrp(client).await;
    Ok(Json(json!({ "success": true })))
}
