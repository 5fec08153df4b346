//! Signed social-graph events
//!
//! An event is immutable after creation: its id is a deterministic hash of
//! the other fields and the signature is made over the id bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, AgentKeypair, CryptoError};

/// Well-known event kinds handled by the built-in skills
pub mod kinds {
    /// Agent metadata / profile
    pub const METADATA: u32 = 0;
    /// Short text note
    pub const NOTE: u32 = 1;
    /// Follow list
    pub const FOLLOW_LIST: u32 = 3;
    /// Deletion request
    pub const DELETE: u32 = 5;
    /// Long-form content
    pub const LONG_FORM: u32 = 30023;
    /// First DVM job-request kind
    pub const DVM_REQUEST_MIN: u32 = 5000;
    /// Last DVM job-request kind
    pub const DVM_REQUEST_MAX: u32 = 5999;
    /// Task delegation request
    pub const TASK_DELEGATION: u32 = 5900;
    /// First DVM job-result kind
    pub const DVM_RESULT_MIN: u32 = 6000;
    /// Last DVM job-result kind
    pub const DVM_RESULT_MAX: u32 = 6999;
    /// DVM feedback
    pub const DVM_FEEDBACK: u32 = 7000;
}

/// Errors raised while building or validating events
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The unit wrapped inside a prepare packet's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte identifier, hex encoded
    pub id: String,
    /// 32-byte author public key, hex encoded
    pub pubkey: String,
    /// Creation timestamp in seconds
    pub created_at: i64,
    /// Protocol-assigned kind family
    pub kind: u32,
    /// Ordered tag lists; the first element of each tag is its name
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// Signature over the id bytes, hex encoded
    pub sig: String,
}

impl Event {
    /// Deterministic id: SHA-256 over the canonical serialization
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        // serde_json emits maps in insertion order; arrays are already canonical
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(crypto::sha256(&bytes))
    }

    /// Whether the stored id matches the canonical hash
    pub fn verify_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// Whether the signature verifies against the author key
    pub fn verify_signature(&self) -> Result<bool, CryptoError> {
        let id_bytes = hex::decode(&self.id)
            .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
        crypto::verify_signature_hex(&self.pubkey, &id_bytes, &self.sig)
    }

    /// Full validity check: id hash plus signature
    pub fn verify(&self) -> bool {
        self.verify_id() && self.verify_signature().unwrap_or(false)
    }

    /// Value at index 1 of the first tag with the given name
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All tags with the given name
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
    }
}

/// Builder for locally produced events; signing fills in id and sig.
#[derive(Debug, Clone, Default)]
pub struct EventBuilder {
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub created_at: Option<i64>,
}

impl EventBuilder {
    pub fn new(kind: u32) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn created_at(mut self, seconds: i64) -> Self {
        self.created_at = Some(seconds);
        self
    }

    /// Produce an unsigned event (empty id and sig), e.g. a DVM result
    /// awaiting the caller's signing step.
    pub fn build_unsigned(self, pubkey: impl Into<String>) -> Event {
        let created_at = self
            .created_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let mut event = Event {
            id: String::new(),
            pubkey: pubkey.into(),
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: String::new(),
        };
        event.id = event.compute_id();
        event
    }

    /// Produce a signed event
    pub fn sign(self, keypair: &AgentKeypair) -> Result<Event, EventError> {
        let mut event = self.build_unsigned(keypair.public_key_hex());
        let id_bytes = hex::decode(&event.id)
            .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
        event.sig = keypair.sign_hex(&id_bytes);
        Ok(event)
    }
}

/// Query filter over the event database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// Tag name/value pair, e.g. `("e", "<event id>")`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<(String, String)>,
    /// Inclusive lower bound on created_at (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    /// Inclusive upper bound on created_at (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_deterministic() {
        let keypair = AgentKeypair::generate();
        let event = EventBuilder::new(kinds::NOTE)
            .content("hello")
            .created_at(1_700_000_000)
            .sign(&keypair)
            .unwrap();
        assert_eq!(event.id, event.compute_id());
        assert!(event.verify());
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let keypair = AgentKeypair::generate();
        let mut event = EventBuilder::new(kinds::NOTE)
            .content("original")
            .sign(&keypair)
            .unwrap();
        event.content = "forged".to_string();
        assert!(!event.verify_id());
        assert!(!event.verify());
    }

    #[test]
    fn test_tag_lookup() {
        let keypair = AgentKeypair::generate();
        let event = EventBuilder::new(kinds::DVM_FEEDBACK)
            .tag(vec!["e".into(), "abc".into()])
            .tag(vec!["status".into(), "processing".into()])
            .tag(vec!["e".into(), "def".into()])
            .sign(&keypair)
            .unwrap();
        assert_eq!(event.first_tag_value("status"), Some("processing"));
        assert_eq!(event.tags_named("e").count(), 2);
        assert_eq!(event.first_tag_value("missing"), None);
    }
}
