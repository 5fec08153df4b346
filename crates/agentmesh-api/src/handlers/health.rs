//! Node-level reads: health, status, balances

use axum::{extract::State, Json};
use serde_json::json;

use agentmesh_node::NodeStatus;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "initialized": true,
        "agentId": state.node.identity.agent_id,
        "pubkey": state.node.identity.pubkey(),
    }))
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<NodeStatus> {
    Json(state.node.status().await)
}

/// `GET /balances`: wallet balances plus per-channel snapshots.
pub async fn balances(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let node = &state.node;

    let evm_wallet = match node.evm.wallet_balances().await {
        Ok((token, native)) => json!({
            "account": node.evm.account().await,
            "token": token.to_string(),
            "native": native,
        }),
        Err(_) => json!({ "configured": false }),
    };
    let xrp_wallet = match node.xrpl.wallet_balance().await {
        Ok(balance) => json!({
            "account": node.xrpl.account().await,
            "drops": balance,
        }),
        Err(_) => json!({ "configured": false }),
    };

    Ok(Json(json!({
        "evm": evm_wallet,
        "xrp": xrp_wallet,
        "channels": {
            "evm": node.evm.channels().await,
            "xrp": node.xrpl.channels().await,
        },
    })))
}
