//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// API error: status plus message, rendered as the failure envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<agentmesh_node::NodeError> for ApiError {
    fn from(error: agentmesh_node::NodeError) -> Self {
        use agentmesh_node::NodeError;
        match &error {
            NodeError::UnknownPeer { .. } | NodeError::Router(_) | NodeError::Codec(_) => {
                Self::bad_request(error.to_string())
            }
            _ => Self::internal(error.to_string()),
        }
    }
}

impl From<agentmesh_channels::EvmEngineError> for ApiError {
    fn from(error: agentmesh_channels::EvmEngineError) -> Self {
        use agentmesh_channels::EvmEngineError;
        match &error {
            EvmEngineError::NotConfigured
            | EvmEngineError::UnknownChannel { .. }
            | EvmEngineError::NotOpen { .. }
            | EvmEngineError::InvalidProof { .. } => Self::bad_request(error.to_string()),
            _ => Self::internal(error.to_string()),
        }
    }
}

impl From<agentmesh_channels::XrplEngineError> for ApiError {
    fn from(error: agentmesh_channels::XrplEngineError) -> Self {
        use agentmesh_channels::XrplEngineError;
        match &error {
            XrplEngineError::NotConfigured
            | XrplEngineError::UnknownChannel { .. }
            | XrplEngineError::NotOpen { .. }
            | XrplEngineError::InvalidSettleDelay { .. }
            | XrplEngineError::NothingToClaim { .. }
            | XrplEngineError::BalanceExceedsDeposit => Self::bad_request(error.to_string()),
            _ => Self::internal(error.to_string()),
        }
    }
}
