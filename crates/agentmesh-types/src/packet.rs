//! The three-variant packet union carried over peer links
//!
//! Wire shape (one JSON document per frame):
//!
//! ```json
//! {"type":"PREPARE","amount":"100","destination":"g.agent.alice",
//!  "executionCondition":"<base64>","expiresAt":"<ISO-8601>","data":"<base64>"}
//! {"type":"FULFILL","fulfillment":"<base64>","data":"<base64>"}
//! {"type":"REJECT","code":"F99","message":"unhandled kind"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WireCode, WireError};

/// Serialize packet amounts as decimal strings on the wire.
mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount: {s}")))
    }
}

/// A conditional payment offer carrying an encoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prepare {
    /// Non-negative amount in the channel's smallest unit
    #[serde(with = "amount_string")]
    pub amount: u64,
    /// Dotted-prefix destination address, e.g. `g.agent.alice`
    pub destination: String,
    /// Base64 32-byte condition the fulfillment must hash to
    pub execution_condition: String,
    pub expires_at: DateTime<Utc>,
    /// Base64 payload bytes (the encoded event envelope)
    pub data: String,
}

impl Prepare {
    /// Whether the prepare has already expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Acceptance of a prepare: the condition's preimage plus optional payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfill {
    /// Base64 32-byte preimage of the prepare's condition
    pub fulfillment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Rejection of a prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reject {
    /// Short error code; locally produced rejects use [`WireCode`]
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A single peer-link frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "PREPARE")]
    Prepare(Prepare),
    #[serde(rename = "FULFILL")]
    Fulfill(Fulfill),
    #[serde(rename = "REJECT")]
    Reject(Reject),
}

impl Packet {
    pub fn is_prepare(&self) -> bool {
        matches!(self, Packet::Prepare(_))
    }

    /// Build a reject from a typed wire error
    pub fn reject(error: WireError) -> Self {
        Packet::Reject(Reject {
            code: error.code.as_str().to_string(),
            message: error.message,
            data: None,
        })
    }

    /// Build a reject from a bare code with its default message
    pub fn reject_code(code: WireCode) -> Self {
        Packet::reject(WireError::from_code(code))
    }

    /// Short label for telemetry (`prepare` / `fulfill` / `reject`)
    pub fn type_label(&self) -> &'static str {
        match self {
            Packet::Prepare(_) => "prepare",
            Packet::Fulfill(_) => "fulfill",
            Packet::Reject(_) => "reject",
        }
    }
}
