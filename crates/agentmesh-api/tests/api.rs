//! Handler-level tests for the control surface

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;

use agentmesh_api::handlers;
use agentmesh_api::{ApiError, AppState};
use agentmesh_channels::mock::{MockChainClient, MockLedgerClient};
use agentmesh_node::{Node, NodeConfig};

async fn test_state() -> AppState {
    let node = Node::new(NodeConfig {
        agent_id: "test".into(),
        ..Default::default()
    })
    .await
    .unwrap();
    AppState::new(node)
}

#[tokio::test]
async fn test_health_shape() {
    let state = test_state().await;
    let Json(body) = handlers::health::health(State(state.clone())).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["initialized"], true);
    assert_eq!(body["agentId"], "test");
    assert!(body["pubkey"].as_str().unwrap().len() == 64);
}

#[tokio::test]
async fn test_follow_validation() {
    let state = test_state().await;
    let missing = handlers::peers::add_follow(
        State(state.clone()),
        Json(serde_json::from_value(serde_json::json!({"pubkey": "", "ilpAddress": "g.agent.x"})).unwrap()),
    )
    .await;
    assert!(missing.is_err());

    let ok = handlers::peers::add_follow(
        State(state.clone()),
        Json(
            serde_json::from_value(serde_json::json!({
                "pubkey": "abc",
                "ilpAddress": "g.agent.x",
                "petname": "xavier"
            }))
            .unwrap(),
        ),
    )
    .await;
    assert!(ok.is_ok());

    let Json(follows) = handlers::peers::list_follows(State(state)).await;
    assert_eq!(follows.len(), 1);
    assert_eq!(follows[0].petname.as_deref(), Some("xavier"));
}

#[tokio::test]
async fn test_channel_open_validates_inputs() {
    let state = test_state().await;
    let zero_deposit = handlers::channels::open_evm_channel(
        State(state.clone()),
        Json(
            serde_json::from_value(serde_json::json!({
                "peerEvmAddress": "0xpeer",
                "depositAmount": 0
            }))
            .unwrap(),
        ),
    )
    .await;
    assert!(zero_deposit.is_err());

    // unconfigured engine maps to a 400, not a 500
    let unconfigured = handlers::channels::open_evm_channel(
        State(state.clone()),
        Json(
            serde_json::from_value(serde_json::json!({
                "peerEvmAddress": "0xpeer",
                "depositAmount": 100
            }))
            .unwrap(),
        ),
    )
    .await;
    match unconfigured {
        Err(ApiError { status, .. }) => assert_eq!(status.as_u16(), 400),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_channel_flow_end_to_end() {
    let state = test_state().await;
    state
        .node
        .configure_evm(Arc::new(MockChainClient::new("0xme")))
        .await;

    let Json(channel) = handlers::channels::open_evm_channel(
        State(state.clone()),
        Json(
            serde_json::from_value(serde_json::json!({
                "peerEvmAddress": "0xpeer",
                "depositAmount": 1000
            }))
            .unwrap(),
        ),
    )
    .await
    .unwrap();

    let Json(signed) = handlers::channels::sign_proof(
        State(state.clone()),
        Json(
            serde_json::from_value(serde_json::json!({
                "channelId": channel.channel_id,
                "nonce": 1,
                "transferredAmount": 10
            }))
            .unwrap(),
        ),
    )
    .await
    .unwrap();
    assert_eq!(signed.proof.nonce, 1);
    assert!(!signed.signature.is_empty());

    let Json(channels) = handlers::channels::list_evm_channels(State(state)).await;
    assert_eq!(channels.len(), 1);
}

#[tokio::test]
async fn test_xrp_channel_flow() {
    let state = test_state().await;
    state
        .node
        .configure_xrp(Arc::new(MockLedgerClient::new("rMe")))
        .await;

    let Json(channel) = handlers::channels::open_xrp_channel(
        State(state.clone()),
        Json(
            serde_json::from_value(serde_json::json!({
                "destination": "rPeer",
                "amount": "1000000"
            }))
            .unwrap(),
        ),
    )
    .await
    .unwrap();
    assert_eq!(channel.balance, "0");

    // claiming an empty channel is an input error
    let empty = handlers::channels::claim_xrp_channel(
        State(state.clone()),
        Json(serde_json::from_value(serde_json::json!({"channelId": channel.channel_id})).unwrap()),
    )
    .await;
    assert!(empty.is_err());
}

#[tokio::test]
async fn test_events_query_rejects_bad_kinds() {
    let state = test_state().await;
    let result = handlers::events::query_events(
        State(state),
        Query(serde_json::from_value(serde_json::json!({"kinds": "1,abc"})).unwrap()),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_telemetry_reads_from_ring_without_store() {
    let state = test_state().await;
    state
        .node
        .telemetry
        .emit(agentmesh_telemetry::TelemetryEvent::AiTokenUsage {
            prompt: 1,
            completion: 1,
            total: 2,
            used_in_window: 2,
            remaining: 98,
        });
    let Json(records) = handlers::events::query_telemetry(
        State(state),
        Query(serde_json::from_value(serde_json::json!({"types": "AI_TOKEN_USAGE"})).unwrap()),
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 1);
}
