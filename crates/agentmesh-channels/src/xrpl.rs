//! Ledger-hosted unidirectional channel engine

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use agentmesh_retry::{with_timeout, TimeoutError};
use agentmesh_telemetry::{TelemetryEmitter, TelemetryEvent};
use agentmesh_types::{add_drops, drops_gt, AgentKeypair, ChannelError, XrplChannel, XrplChannelStatus};

use crate::adapter::{ChainError, ChannelClaim, ChannelCreate, LedgerClient, LedgerNetworkMode};

/// Default settle delay in seconds
pub const DEFAULT_SETTLE_DELAY: u64 = 3_600;
/// Default bound on ledger submissions
pub const DEFAULT_TX_TIMEOUT_MS: i64 = 30_000;

#[derive(Debug, Error)]
pub enum XrplEngineError {
    #[error("ledger client not configured")]
    NotConfigured,

    #[error("unknown channel: {channel_id}")]
    UnknownChannel { channel_id: String },

    #[error("channel {channel_id} is not open")]
    NotOpen { channel_id: String },

    #[error("invalid settle delay: {settle_delay}")]
    InvalidSettleDelay { settle_delay: u64 },

    #[error("nothing to claim on channel {channel_id}")]
    NothingToClaim { channel_id: String },

    #[error("channel balance would exceed the deposit")]
    BalanceExceedsDeposit,

    #[error("malformed transaction metadata: {message}")]
    MalformedMetadata { message: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Amount(#[from] ChannelError),

    #[error("ledger call timed out after {0} ms")]
    Timeout(u64),
}

impl From<TimeoutError> for XrplEngineError {
    fn from(error: TimeoutError) -> Self {
        match error {
            TimeoutError::Timeout(ms) => XrplEngineError::Timeout(ms),
            TimeoutError::InvalidArgument(_) => XrplEngineError::Timeout(0),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct XrplEngineConfig {
    pub network_mode: LedgerNetworkMode,
    pub tx_timeout_ms: i64,
}

impl Default for XrplEngineConfig {
    fn default() -> Self {
        Self {
            network_mode: LedgerNetworkMode::Live,
            tx_timeout_ms: DEFAULT_TX_TIMEOUT_MS,
        }
    }
}

/// Outcome of a claim submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub claimed_amount: String,
    pub tx_hash: String,
}

/// Unidirectional claim-signed channel engine.
pub struct XrplChannelEngine {
    client: RwLock<Option<Arc<dyn LedgerClient>>>,
    channels: RwLock<HashMap<String, XrplChannel>>,
    keypair: Arc<AgentKeypair>,
    telemetry: Arc<TelemetryEmitter>,
    config: XrplEngineConfig,
}

impl XrplChannelEngine {
    pub fn new(
        config: XrplEngineConfig,
        keypair: Arc<AgentKeypair>,
        telemetry: Arc<TelemetryEmitter>,
    ) -> Self {
        Self {
            client: RwLock::new(None),
            channels: RwLock::new(HashMap::new()),
            keypair,
            telemetry,
            config,
        }
    }

    /// Late-bind the ledger client
    pub async fn configure(&self, client: Arc<dyn LedgerClient>) {
        info!(account = %client.account(), "XRPL ledger client configured");
        *self.client.write().await = Some(client);
    }

    pub async fn is_configured(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn client(&self) -> Result<Arc<dyn LedgerClient>, XrplEngineError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(XrplEngineError::NotConfigured)
    }

    pub async fn channels(&self) -> Vec<XrplChannel> {
        let mut channels: Vec<_> = self.channels.read().await.values().cloned().collect();
        channels.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        channels
    }

    pub async fn channel(&self, channel_id: &str) -> Option<XrplChannel> {
        self.channels.read().await.get(channel_id).cloned()
    }

    /// Open a channel to `destination` with `amount` drops escrowed.
    pub async fn open_channel(
        &self,
        destination: &str,
        amount: &str,
        settle_delay: Option<u64>,
    ) -> Result<XrplChannel, XrplEngineError> {
        let client = self.client().await?;
        let settle_delay = settle_delay.unwrap_or(DEFAULT_SETTLE_DELAY);
        if settle_delay < 1 {
            return Err(XrplEngineError::InvalidSettleDelay { settle_delay });
        }
        // validate the drops string up front
        add_drops(amount, "0")?;

        let create = ChannelCreate {
            account: client.account(),
            destination: destination.to_string(),
            amount: amount.to_string(),
            settle_delay,
            public_key: self.keypair.public_key_hex(),
        };
        let timeout = self.config.tx_timeout_ms;
        let tx = match self.config.network_mode {
            LedgerNetworkMode::Standalone => {
                let hash = with_timeout(timeout, client.submit_channel_create(&create)).await??;
                client.advance_ledger().await?;
                client.fetch_transaction(&hash).await?
            }
            LedgerNetworkMode::Live => {
                with_timeout(timeout, client.submit_and_wait_channel_create(&create)).await??
            }
        };
        let channel_id = tx
            .channel_id
            .ok_or_else(|| XrplEngineError::MalformedMetadata {
                message: format!("transaction {} created no channel", tx.tx_hash),
            })?;

        let channel = XrplChannel {
            channel_id: channel_id.clone(),
            account: create.account.clone(),
            destination: destination.to_string(),
            amount: amount.to_string(),
            balance: "0".to_string(),
            settle_delay,
            public_key: create.public_key.clone(),
            status: XrplChannelStatus::Open,
            opened_at: Utc::now(),
            last_claim_at: None,
        };
        self.channels
            .write()
            .await
            .insert(channel_id.clone(), channel.clone());
        info!(channel_id = %channel_id, destination, amount, "ledger channel opened");

        self.telemetry.emit(TelemetryEvent::AgentChannelOpened {
            chain: "xrp".into(),
            channel_id: channel_id.clone(),
            amount: amount.to_string(),
        });
        self.telemetry.emit(TelemetryEvent::XrpChannelOpened {
            channel_id,
            destination: destination.to_string(),
            amount: amount.to_string(),
        });

        Ok(channel)
    }

    /// Off-chain balance accrual for an outgoing prepare.
    ///
    /// No counter-sign is needed off-path: the channel is unidirectional.
    pub async fn record_payment(
        &self,
        destination: &str,
        amount: u64,
    ) -> Result<Option<String>, XrplEngineError> {
        let mut channels = self.channels.write().await;
        let Some(channel) = channels
            .values_mut()
            .find(|c| c.status == XrplChannelStatus::Open && c.destination == destination)
        else {
            return Ok(None);
        };

        let previous = channel.balance.clone();
        let updated = add_drops(&previous, &amount.to_string())?;
        if drops_gt(&updated, &channel.amount)? {
            return Err(XrplEngineError::BalanceExceedsDeposit);
        }
        channel.balance = updated.clone();
        let channel_id = channel.channel_id.clone();
        drop(channels);

        self.telemetry
            .emit(TelemetryEvent::AgentChannelBalanceUpdate {
                chain: "xrp".into(),
                channel_id: channel_id.clone(),
                previous_balance: previous,
                new_balance: updated.clone(),
            });
        self.telemetry.emit(TelemetryEvent::AgentChannelPaymentSent {
            chain: "xrp".into(),
            channel_id: channel_id.clone(),
            amount: amount.to_string(),
        });

        Ok(Some(channel_id))
    }

    /// Claim signature bytes: the `CLM\0` prefix, the channel id, and the
    /// balance in native units.
    fn claim_message(channel_id: &str, balance: &str) -> Vec<u8> {
        let mut message = Vec::with_capacity(4 + channel_id.len() + balance.len());
        message.extend_from_slice(b"CLM\0");
        message.extend_from_slice(channel_id.as_bytes());
        message.extend_from_slice(balance.as_bytes());
        message
    }

    /// Submit a claim for the channel's accumulated balance.
    pub async fn claim(&self, channel_id: &str) -> Result<ClaimResult, XrplEngineError> {
        let client = self.client().await?;
        let (balance, public_key) = {
            let channels = self.channels.read().await;
            let channel =
                channels
                    .get(channel_id)
                    .ok_or_else(|| XrplEngineError::UnknownChannel {
                        channel_id: channel_id.to_string(),
                    })?;
            if channel.status != XrplChannelStatus::Open {
                return Err(XrplEngineError::NotOpen {
                    channel_id: channel_id.to_string(),
                });
            }
            if channel.balance == "0" {
                return Err(XrplEngineError::NothingToClaim {
                    channel_id: channel_id.to_string(),
                });
            }
            (channel.balance.clone(), channel.public_key.clone())
        };

        let signature = self
            .keypair
            .sign_hex(&Self::claim_message(channel_id, &balance));
        let claim = ChannelClaim {
            channel_id: channel_id.to_string(),
            balance: balance.clone(),
            signature,
            public_key,
        };
        let timeout = self.config.tx_timeout_ms;
        let tx_hash = with_timeout(timeout, client.submit_claim(&claim)).await??;
        if self.config.network_mode == LedgerNetworkMode::Standalone {
            client.advance_ledger().await?;
        }

        {
            let mut channels = self.channels.write().await;
            if let Some(channel) = channels.get_mut(channel_id) {
                channel.last_claim_at = Some(Utc::now());
            }
        }
        info!(channel_id, claimed = %balance, tx_hash = %tx_hash, "channel claim submitted");

        self.telemetry.emit(TelemetryEvent::XrpChannelClaimed {
            channel_id: channel_id.to_string(),
            claimed_amount: balance.clone(),
            tx_hash: tx_hash.clone(),
        });

        Ok(ClaimResult {
            claimed_amount: balance,
            tx_hash,
        })
    }

    /// Our ledger account, when configured
    pub async fn account(&self) -> Option<String> {
        self.client.read().await.as_ref().map(|c| c.account())
    }

    /// Wallet balance in drops as seen by the ledger client
    pub async fn wallet_balance(&self) -> Result<String, XrplEngineError> {
        let client = self.client().await?;
        let account = client.account();
        Ok(client.balance(&account).await?)
    }

    /// Settle: advance the channel to `closed`.
    pub async fn close(&self, channel_id: &str) -> Result<(), XrplEngineError> {
        {
            let mut channels = self.channels.write().await;
            let channel =
                channels
                    .get_mut(channel_id)
                    .ok_or_else(|| XrplEngineError::UnknownChannel {
                        channel_id: channel_id.to_string(),
                    })?;
            channel.status = XrplChannelStatus::Closed;
        }
        info!(channel_id, "ledger channel closed");
        self.telemetry.emit(TelemetryEvent::AgentChannelClosed {
            chain: "xrp".into(),
            channel_id: channel_id.to_string(),
        });
        self.telemetry.emit(TelemetryEvent::XrpChannelClosed {
            channel_id: channel_id.to_string(),
        });
        Ok(())
    }
}
