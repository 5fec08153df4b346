//! Route definitions for the control surface

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use agentmesh_telemetry::TelemetryEvent;

use crate::error::ApiError;
use crate::handlers;
use crate::state::AppState;

/// Build the control-surface router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // node
        .route("/health", get(handlers::health::health))
        .route("/status", get(handlers::health::status))
        .route("/balances", get(handlers::health::balances))
        // directory
        .route("/peers", get(handlers::peers::list_peers))
        .route(
            "/follows",
            get(handlers::peers::list_follows).post(handlers::peers::add_follow),
        )
        .route("/connect", post(handlers::peers::connect))
        // events
        .route("/events", get(handlers::events::query_events))
        .route("/telemetry", get(handlers::events::query_telemetry))
        .route("/send-event", post(handlers::events::send_event))
        .route("/broadcast", post(handlers::events::broadcast))
        // EVM channels
        .route("/channels", get(handlers::channels::list_evm_channels))
        .route("/channels/open", post(handlers::channels::open_evm_channel))
        .route("/channels/sign-proof", post(handlers::channels::sign_proof))
        .route(
            "/channels/cooperative-settle",
            post(handlers::channels::cooperative_settle),
        )
        // XRPL channels
        .route("/xrp-channels", get(handlers::channels::list_xrp_channels))
        .route("/xrp-channels/open", post(handlers::channels::open_xrp_channel))
        .route("/xrp-channels/claim", post(handlers::channels::claim_xrp_channel))
        // late binding
        .route("/configure-evm", post(handlers::channels::configure_evm))
        .route("/configure-xrp", post(handlers::channels::configure_xrp))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Per-IP fixed-window rate limit; overruns are recorded as telemetry.
async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "local".to_string());
    let path = request.uri().path().to_string();
    let now_ms = chrono::Utc::now().timestamp_millis();
    if !state.rate.check(&remote, now_ms) {
        state.node.telemetry.emit(TelemetryEvent::RateLimitExceeded {
            remote_addr: remote,
            path,
        });
        return ApiError {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "rate limit exceeded".into(),
        }
        .into_response();
    }
    next.run(request).await
}
