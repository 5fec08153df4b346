//! AgentMesh Codec - Envelope and frame codecs
//!
//! Two layers share this crate:
//!
//! - **Envelope**: an event serialized to JSON and base64-encoded into a
//!   prepare packet's `data` field
//! - **Frame**: a packet serialized to one JSON text frame (one frame
//!   carries one packet)
//!
//! Decode failures map to wire code `F01` at the packet handler.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentmesh_types::{Event, Packet};

/// Codec failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode an event into prepare payload bytes (base64 JSON)
pub fn encode_envelope(event: &Event) -> CodecResult<String> {
    Ok(BASE64.encode(serde_json::to_vec(event)?))
}

/// Decode an event from prepare payload bytes
pub fn decode_envelope(data: &str) -> CodecResult<Event> {
    let bytes = BASE64.decode(data)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encode a packet into a text frame
pub fn encode_frame(packet: &Packet) -> CodecResult<String> {
    Ok(serde_json::to_string(packet)?)
}

/// Decode a text frame into a packet
pub fn decode_frame(text: &str) -> CodecResult<Packet> {
    Ok(serde_json::from_str(text)?)
}

/// Response payload attached to fulfill and reject packets.
///
/// Echoes the correlating event id so telemetry can stitch the two sides,
/// and carries any response events a skill produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

/// Encode a response payload into fulfill/reject `data` bytes
pub fn encode_response_payload(payload: &ResponsePayload) -> CodecResult<String> {
    Ok(BASE64.encode(serde_json::to_vec(payload)?))
}

/// Decode fulfill/reject `data` bytes into a response payload
pub fn decode_response_payload(data: &str) -> CodecResult<ResponsePayload> {
    let bytes = BASE64.decode(data)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Base64-encode opaque bytes (conditions, fulfillments)
pub fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 field that must hold exactly 32 bytes
pub fn decode_hash32(data: &str) -> CodecResult<[u8; 32]> {
    let bytes = BASE64.decode(data)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| CodecError::Length {
        expected: 32,
        actual,
    })
}
