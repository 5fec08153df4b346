//! Event-database reads and outbound sends

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use agentmesh_telemetry::{TelemetryQuery, TelemetryRecord};
use agentmesh_types::{Event, EventBuilder, EventFilter};

use crate::error::ApiError;
use crate::state::AppState;

fn parse_csv_u32(value: &str) -> Result<Vec<u32>, ApiError> {
    value
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| ApiError::bad_request(format!("invalid kind: {part}")))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated kind list
    pub kinds: Option<String>,
    /// Comma-separated author list
    pub authors: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `GET /events`
pub async fn query_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let filter = EventFilter {
        kinds: query.kinds.as_deref().map(parse_csv_u32).transpose()?,
        authors: query.authors.map(|authors| {
            authors
                .split(',')
                .filter(|part| !part.is_empty())
                .map(|part| part.trim().to_string())
                .collect()
        }),
        since: query.since,
        until: query.until,
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };
    let events = state
        .node
        .db
        .query(&filter)
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    Ok(Json(events))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryParams {
    /// Comma-separated telemetry type list
    pub types: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub peer_id: Option<String>,
    pub packet_id: Option<String>,
    pub direction: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `GET /telemetry`: the explorer's read of the telemetry stream.
pub async fn query_telemetry(
    State(state): State<AppState>,
    Query(params): Query<TelemetryParams>,
) -> Result<Json<Vec<TelemetryRecord>>, ApiError> {
    let types = params.types.map(|types| {
        types
            .split(',')
            .filter(|part| !part.is_empty())
            .map(|part| part.trim().to_string())
            .collect::<Vec<_>>()
    });
    if let Some(store) = &state.node.telemetry_store {
        let records = store
            .query(&TelemetryQuery {
                types,
                since: params.since,
                until: params.until,
                peer_id: params.peer_id,
                packet_id: params.packet_id,
                direction: params.direction,
                limit: params.limit,
                offset: params.offset,
            })
            .await
            .map_err(|error| ApiError::internal(error.to_string()))?;
        return Ok(Json(records));
    }
    // no persistent store: serve from the in-memory ring
    let limit = params.limit.unwrap_or(100) as usize;
    let records = state
        .node
        .telemetry
        .recent(1_000)
        .into_iter()
        .filter(|record| {
            types
                .as_ref()
                .map(|t| t.iter().any(|ty| ty == record.event.event_type()))
                .unwrap_or(true)
        })
        .filter(|record| params.since.map(|s| record.timestamp >= s).unwrap_or(true))
        .filter(|record| params.until.map(|u| record.timestamp <= u).unwrap_or(true))
        .rev()
        .take(limit)
        .collect();
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEventRequest {
    pub peer_id: String,
    pub kind: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub amount: u64,
}

/// `POST /send-event`
pub async fn send_event(
    State(state): State<AppState>,
    Json(request): Json<SendEventRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.peer_id.is_empty() {
        return Err(ApiError::bad_request("peerId is required"));
    }
    let mut builder = EventBuilder::new(request.kind).content(request.content);
    for tag in request.tags {
        builder = builder.tag(tag);
    }
    let event = builder
        .sign(&state.node.identity.keypair)
        .map_err(|error| ApiError::internal(error.to_string()))?;

    let response = state
        .node
        .send_event(&request.peer_id, &event, request.amount)
        .await?;
    Ok(Json(json!({
        "success": true,
        "eventId": event.id,
        "response": response,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub kind: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub amount: u64,
}

/// `POST /broadcast`
pub async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut builder = EventBuilder::new(request.kind).content(request.content);
    for tag in request.tags {
        builder = builder.tag(tag);
    }
    let event = builder
        .sign(&state.node.identity.keypair)
        .map_err(|error| ApiError::internal(error.to_string()))?;

    let results = state.node.broadcast(&event, request.amount).await;
    let outcomes: Vec<serde_json::Value> = results
        .into_iter()
        .map(|(pubkey, outcome)| match outcome {
            Ok(packet) => json!({ "pubkey": pubkey, "response": packet }),
            Err(error) => json!({ "pubkey": pubkey, "error": error.to_string() }),
        })
        .collect();
    Ok(Json(json!({
        "success": true,
        "eventId": event.id,
        "results": outcomes,
    })))
}
