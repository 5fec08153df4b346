//! Payment-channel records for both settlement substrates

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::sha256;

/// Errors for channel-record arithmetic
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid drops amount: {0}")]
    InvalidDrops(String),

    #[error("drops amount overflow")]
    DropsOverflow,
}

/// State of a bilateral EVM-style channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvmChannelStatus {
    Opened,
    Closing,
    Settled,
}

/// One participant's side of an EVM channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmChannelSide {
    pub deposit: u64,
    /// Monotonically increasing balance-proof nonce
    pub nonce: u64,
    /// Cumulative amount transferred to the counterpart
    pub transferred: u64,
}

/// A bilateral channel escrowed in an EVM token-network contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChannel {
    /// 32-byte channel id from the ChannelOpened log, hex encoded
    pub channel_id: String,
    /// The two participant accounts, ordered (self first)
    pub participants: [String; 2],
    pub token_address: String,
    pub settlement_timeout: u64,
    /// Per-participant deposit / nonce / transferred counters
    pub sides: BTreeMap<String, EvmChannelSide>,
    pub status: EvmChannelStatus,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl EvmChannel {
    /// The counterpart of `account`, if `account` is a participant
    pub fn partner_of(&self, account: &str) -> Option<&str> {
        if self.participants[0] == account {
            Some(&self.participants[1])
        } else if self.participants[1] == account {
            Some(&self.participants[0])
        } else {
            None
        }
    }

    /// This participant's counters, creating a zero side if absent
    pub fn side_mut(&mut self, account: &str) -> &mut EvmChannelSide {
        self.sides.entry(account.to_string()).or_default()
    }

    pub fn side(&self, account: &str) -> EvmChannelSide {
        self.sides.get(account).cloned().unwrap_or_default()
    }
}

/// State of a ledger-hosted unidirectional channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XrplChannelStatus {
    Open,
    Closing,
    Closed,
}

/// A unidirectional claim-signed channel hosted on the ledger.
///
/// Ledger amounts are 64-bit unsigned decimal strings (drops); arithmetic
/// goes through [`add_drops`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrplChannel {
    pub channel_id: String,
    /// Source account (the payer)
    pub account: String,
    pub destination: String,
    /// Total deposited amount in drops
    pub amount: String,
    /// Cumulative off-chain balance owed to the destination, in drops
    pub balance: String,
    pub settle_delay: u64,
    pub public_key: String,
    pub status: XrplChannelStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_claim_at: Option<DateTime<Utc>>,
}

/// Add two drops amounts expressed as decimal strings.
pub fn add_drops(a: &str, b: &str) -> Result<String, ChannelError> {
    let lhs: u128 = a
        .parse()
        .map_err(|_| ChannelError::InvalidDrops(a.to_string()))?;
    let rhs: u128 = b
        .parse()
        .map_err(|_| ChannelError::InvalidDrops(b.to_string()))?;
    let sum = lhs.checked_add(rhs).ok_or(ChannelError::DropsOverflow)?;
    if sum > u64::MAX as u128 {
        return Err(ChannelError::DropsOverflow);
    }
    Ok(sum.to_string())
}

/// Compare two drops amounts expressed as decimal strings.
pub fn drops_gt(a: &str, b: &str) -> Result<bool, ChannelError> {
    let lhs: u128 = a
        .parse()
        .map_err(|_| ChannelError::InvalidDrops(a.to_string()))?;
    let rhs: u128 = b
        .parse()
        .map_err(|_| ChannelError::InvalidDrops(b.to_string()))?;
    Ok(lhs > rhs)
}

/// An off-chain balance proof over an EVM channel.
///
/// Locked amount and locks root are fixed at zero in this core; they stay
/// in the canonical layout so the on-chain contract accepts the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceProof {
    pub channel_id: String,
    pub nonce: u64,
    pub transferred_amount: u64,
    #[serde(default)]
    pub locked_amount: u64,
    #[serde(default = "BalanceProof::zero_locks_root")]
    pub locks_root: String,
}

impl BalanceProof {
    pub fn new(channel_id: impl Into<String>, nonce: u64, transferred_amount: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            nonce,
            transferred_amount,
            locked_amount: 0,
            locks_root: Self::zero_locks_root(),
        }
    }

    fn zero_locks_root() -> String {
        hex::encode([0u8; 32])
    }

    /// Canonical message bytes signed by both participants.
    ///
    /// Layout: domain separator, channel id, then nonce, transferred,
    /// locked as big-endian u64s, then the locks root.
    pub fn canonical_message(&self, domain_separator: &str) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice(domain_separator.as_bytes());
        message.extend_from_slice(self.channel_id.as_bytes());
        message.extend_from_slice(&self.nonce.to_be_bytes());
        message.extend_from_slice(&self.transferred_amount.to_be_bytes());
        message.extend_from_slice(&self.locked_amount.to_be_bytes());
        message.extend_from_slice(self.locks_root.as_bytes());
        sha256(&message).to_vec()
    }
}
