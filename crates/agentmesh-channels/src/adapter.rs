//! Settlement adapter traits
//!
//! The concrete blockchain libraries live behind these capability traits;
//! production wires RPC-backed implementations, tests wire the mocks in
//! [`crate::mock`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentmesh_types::BalanceProof;

/// Chain/ledger submission failures
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("transaction reverted: {message}")]
    Revert { message: String },

    #[error("nonce error: {message}")]
    Nonce { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },
}

impl ChainError {
    /// Whether the cooperative-settle retry path should escalate the
    /// sequence and try again
    pub fn is_nonce_error(&self) -> bool {
        match self {
            ChainError::Nonce { .. } => true,
            ChainError::Revert { message } | ChainError::Transport { message } => {
                message.to_lowercase().contains("nonce")
            }
            _ => false,
        }
    }
}

/// One decoded log from a transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainLog {
    pub name: String,
    pub data: serde_json::Value,
}

/// A mined transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub logs: Vec<ChainLog>,
}

impl TxReceipt {
    /// Extract a field from the first log with the given name
    pub fn log_field(&self, log_name: &str, field: &str) -> Option<String> {
        self.logs
            .iter()
            .find(|log| log.name == log_name)
            .and_then(|log| log.data.get(field))
            .and_then(|value| value.as_str())
            .map(str::to_string)
    }
}

/// Cooperative-settle submission: both proofs plus both signatures.
#[derive(Debug, Clone)]
pub struct CooperativeSettleRequest {
    pub channel_id: String,
    pub proof1: BalanceProof,
    pub signature1: String,
    pub proof2: BalanceProof,
    pub signature2: String,
}

/// EVM-side settlement capability.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The node's own chain account
    fn account(&self) -> String;

    /// Next transaction sequence (nonce) for our account
    async fn next_sequence(&self) -> Result<u64, ChainError>;

    /// Approve the token network to move `amount` of the token
    async fn approve(
        &self,
        token: &str,
        spender: &str,
        amount: u64,
        sequence: u64,
    ) -> Result<String, ChainError>;

    /// Submit `openChannel` and wait for the receipt
    async fn open_channel(
        &self,
        token_network: &str,
        partner: &str,
        settlement_timeout: u64,
        sequence: u64,
    ) -> Result<TxReceipt, ChainError>;

    /// Submit `setTotalDeposit` for a participant
    async fn set_total_deposit(
        &self,
        channel_id: &str,
        participant: &str,
        total_deposit: u64,
        sequence: u64,
    ) -> Result<String, ChainError>;

    /// Submit the cooperative-settle transaction; the contract performs
    /// the deep proof check
    async fn cooperative_settle(
        &self,
        request: &CooperativeSettleRequest,
        sequence: u64,
    ) -> Result<String, ChainError>;

    async fn token_balance(&self, account: &str) -> Result<u64, ChainError>;

    async fn native_balance(&self, account: &str) -> Result<String, ChainError>;
}

/// Ledger network mode: standalone test ledgers need explicit advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerNetworkMode {
    Standalone,
    Live,
}

/// Channel-create transaction payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCreate {
    pub account: String,
    pub destination: String,
    /// Drops, decimal string
    pub amount: String,
    pub settle_delay: u64,
    pub public_key: String,
}

/// Claim transaction payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelClaim {
    pub channel_id: String,
    /// Cumulative claimed balance in drops
    pub balance: String,
    pub signature: String,
    pub public_key: String,
}

/// A validated ledger transaction with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTx {
    pub tx_hash: String,
    /// The created channel's ledger entry id, when applicable
    pub channel_id: Option<String>,
}

/// XRPL-side settlement capability.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The node's own ledger account
    fn account(&self) -> String;

    /// Submit a channel-create without waiting for validation
    async fn submit_channel_create(&self, create: &ChannelCreate) -> Result<String, ChainError>;

    /// Submit a channel-create and wait for validation
    async fn submit_and_wait_channel_create(
        &self,
        create: &ChannelCreate,
    ) -> Result<LedgerTx, ChainError>;

    /// Submit a claim without waiting for validation
    async fn submit_claim(&self, claim: &ChannelClaim) -> Result<String, ChainError>;

    /// Explicitly advance a standalone ledger
    async fn advance_ledger(&self) -> Result<(), ChainError>;

    /// Fetch a validated transaction's metadata
    async fn fetch_transaction(&self, tx_hash: &str) -> Result<LedgerTx, ChainError>;

    /// Account balance in drops
    async fn balance(&self, account: &str) -> Result<String, ChainError>;
}
