//! Cryptographic primitives for agent identity
//!
//! Ed25519 keys for event signatures, SHA-256 for event ids and the
//! execution-condition commitment. The rest of the system treats these as
//! opaque values of fixed size.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in bytes of public keys, event ids, conditions, and fulfillments
pub const HASH_LEN: usize = 32;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// SHA-256 digest
pub fn sha256(bytes: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn decode_32(hex_str: &str) -> CryptoResult<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyFormat(format!("expected 32 bytes, got {hex_str}")))
}

/// An agent's signing identity.
///
/// Wraps an Ed25519 keypair; the secret never leaves this struct.
pub struct AgentKeypair {
    signing: SigningKey,
}

impl AgentKeypair {
    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Restore a keypair from a 32-byte hex-encoded secret
    pub fn from_secret_hex(secret_hex: &str) -> CryptoResult<Self> {
        let secret = decode_32(secret_hex)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    /// Hex-encoded public key (the event author key)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    /// Sign a message, returning the hex-encoded signature
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }

    /// The node's fixed 32-byte fulfillment, derived from the secret.
    ///
    /// Opaque to peers; only its SHA-256 (the execution condition) is
    /// advertised.
    pub fn fulfillment(&self) -> [u8; HASH_LEN] {
        let mut input = Vec::with_capacity(HASH_LEN + 12);
        input.extend_from_slice(&self.signing.to_bytes());
        input.extend_from_slice(b"fulfillment");
        sha256(&input)
    }

    /// The execution condition peers attach to prepares addressed to us
    pub fn condition(&self) -> [u8; HASH_LEN] {
        sha256(&self.fulfillment())
    }
}

impl std::fmt::Debug for AgentKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentKeypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a hex-encoded Ed25519 signature against a hex-encoded public key
pub fn verify_signature_hex(
    pubkey_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> CryptoResult<bool> {
    let key_bytes = decode_32(pubkey_hex)?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureFormat("expected 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);
    Ok(key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = AgentKeypair::generate();
        let sig = keypair.sign_hex(b"hello mesh");
        assert!(verify_signature_hex(&keypair.public_key_hex(), b"hello mesh", &sig).unwrap());
        assert!(!verify_signature_hex(&keypair.public_key_hex(), b"tampered", &sig).unwrap());
    }

    #[test]
    fn test_condition_is_hash_of_fulfillment() {
        let keypair = AgentKeypair::generate();
        assert_eq!(keypair.condition(), sha256(&keypair.fulfillment()));
    }

    #[test]
    fn test_secret_round_trip() {
        let keypair = AgentKeypair::generate();
        let secret_hex = hex::encode(keypair.signing.to_bytes());
        let restored = AgentKeypair::from_secret_hex(&secret_hex).unwrap();
        assert_eq!(keypair.public_key_hex(), restored.public_key_hex());
    }
}
