//! EVM-style bilateral channel engine

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use agentmesh_retry::{with_timeout, execute_with_retry, RetryPolicy, TimeoutError};
use agentmesh_telemetry::{TelemetryEmitter, TelemetryEvent};
use agentmesh_types::{
    crypto::verify_signature_hex, AgentKeypair, BalanceProof, EvmChannel, EvmChannelSide,
    EvmChannelStatus,
};

use crate::adapter::{ChainClient, ChainError, CooperativeSettleRequest};

/// Default on-chain settlement timeout in seconds
pub const DEFAULT_SETTLEMENT_TIMEOUT: u64 = 3_600;
/// Default bound on waiting for a transaction receipt
pub const DEFAULT_TX_TIMEOUT_MS: i64 = 30_000;
/// Nonce-error retries during cooperative settle
const SETTLE_NONCE_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum EvmEngineError {
    #[error("chain client not configured")]
    NotConfigured,

    #[error("unknown channel: {channel_id}")]
    UnknownChannel { channel_id: String },

    #[error("channel {channel_id} is not open")]
    NotOpen { channel_id: String },

    #[error("invalid balance proof: {message}")]
    InvalidProof { message: String },

    #[error("malformed receipt: {message}")]
    MalformedReceipt { message: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("chain call timed out after {0} ms")]
    Timeout(u64),
}

impl From<TimeoutError> for EvmEngineError {
    fn from(error: TimeoutError) -> Self {
        match error {
            TimeoutError::Timeout(ms) => EvmEngineError::Timeout(ms),
            TimeoutError::InvalidArgument(_) => EvmEngineError::Timeout(0),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EvmEngineConfig {
    pub token_network_address: String,
    pub token_address: String,
    pub settlement_timeout: u64,
    /// Domain separator baked into every balance-proof encoding
    pub domain_separator: String,
    pub tx_timeout_ms: i64,
}

impl EvmEngineConfig {
    pub fn new(token_network_address: impl Into<String>, token_address: impl Into<String>) -> Self {
        Self {
            token_network_address: token_network_address.into(),
            token_address: token_address.into(),
            settlement_timeout: DEFAULT_SETTLEMENT_TIMEOUT,
            domain_separator: "agentmesh-evm-channel-v1".to_string(),
            tx_timeout_ms: DEFAULT_TX_TIMEOUT_MS,
        }
    }
}

/// A signed balance proof ready for the counterpart or the contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedBalanceProof {
    pub proof: BalanceProof,
    pub signature: String,
    /// The signing chain account
    pub signer: String,
}

/// Cooperative settle inputs: matching counter-signed proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooperativeSettleParams {
    pub channel_id: String,
    pub proof1: BalanceProof,
    pub signature1: String,
    /// Public key that produced `signature1`
    pub signer1_pubkey: String,
    pub proof2: BalanceProof,
    pub signature2: String,
    pub signer2_pubkey: String,
}

/// Bilateral channel engine over the EVM settlement adapter.
///
/// The chain client is late-bound; every operation fails with
/// `NotConfigured` until `configure` runs. Per-channel mutation acquires,
/// mutates, releases; no lock is held across a chain submission.
pub struct EvmChannelEngine {
    client: RwLock<Option<Arc<dyn ChainClient>>>,
    channels: RwLock<HashMap<String, EvmChannel>>,
    keypair: Arc<AgentKeypair>,
    telemetry: Arc<TelemetryEmitter>,
    config: EvmEngineConfig,
}

impl EvmChannelEngine {
    pub fn new(
        config: EvmEngineConfig,
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

    /// Late-bind the chain client
    pub async fn configure(&self, client: Arc<dyn ChainClient>) {
        info!(account = %client.account(), "EVM chain client configured");
        *self.client.write().await = Some(client);
    }

    pub async fn is_configured(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn client(&self) -> Result<Arc<dyn ChainClient>, EvmEngineError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(EvmEngineError::NotConfigured)
    }

    /// Snapshot of every channel record
    pub async fn channels(&self) -> Vec<EvmChannel> {
        let mut channels: Vec<_> = self.channels.read().await.values().cloned().collect();
        channels.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        channels
    }

    pub async fn channel(&self, channel_id: &str) -> Option<EvmChannel> {
        self.channels.read().await.get(channel_id).cloned()
    }

    /// Open a channel with `peer_account` and deposit into it.
    pub async fn open_channel(
        &self,
        peer_account: &str,
        deposit: u64,
    ) -> Result<EvmChannel, EvmEngineError> {
        let client = self.client().await?;
        let own_account = client.account();
        let timeout = self.config.tx_timeout_ms;

        let balance_before = client.token_balance(&own_account).await.ok();

        let sequence = client.next_sequence().await?;
        with_timeout(
            timeout,
            client.approve(
                &self.config.token_address,
                &self.config.token_network_address,
                deposit,
                sequence,
            ),
        )
        .await??;

        let sequence = client.next_sequence().await?;
        let receipt = with_timeout(
            timeout,
            client.open_channel(
                &self.config.token_network_address,
                peer_account,
                self.config.settlement_timeout,
                sequence,
            ),
        )
        .await??;
        let channel_id = receipt
            .log_field("ChannelOpened", "channelId")
            .ok_or_else(|| EvmEngineError::MalformedReceipt {
                message: "no ChannelOpened log in receipt".into(),
            })?;

        let sequence = client.next_sequence().await?;
        with_timeout(
            timeout,
            client.set_total_deposit(&channel_id, &own_account, deposit, sequence),
        )
        .await??;

        let now = Utc::now();
        let mut sides = BTreeMap::new();
        sides.insert(
            own_account.clone(),
            EvmChannelSide {
                deposit,
                nonce: 0,
                transferred: 0,
            },
        );
        let channel = EvmChannel {
            channel_id: channel_id.clone(),
            participants: [own_account.clone(), peer_account.to_string()],
            token_address: self.config.token_address.clone(),
            settlement_timeout: self.config.settlement_timeout,
            sides,
            status: EvmChannelStatus::Opened,
            opened_at: now,
            last_activity_at: now,
            settled_at: None,
        };
        self.channels
            .write()
            .await
            .insert(channel_id.clone(), channel.clone());
        info!(channel_id = %channel_id, peer = peer_account, deposit, "EVM channel opened");

        self.telemetry.emit(TelemetryEvent::AgentChannelOpened {
            chain: "evm".into(),
            channel_id: channel_id.clone(),
            amount: deposit.to_string(),
        });
        self.telemetry.emit(TelemetryEvent::PaymentChannelOpened {
            channel_id: channel_id.clone(),
            partner: peer_account.to_string(),
            deposit,
        });

        // deposit reconciliation against the wallet
        if let (Some(before), Ok(after)) =
            (balance_before, client.token_balance(&own_account).await)
        {
            let expected = before.saturating_sub(deposit);
            if after != expected {
                warn!(expected, actual = after, "token balance mismatch after deposit");
                self.telemetry.emit(TelemetryEvent::WalletBalanceMismatch {
                    account: own_account,
                    chain: "evm".into(),
                    expected: expected.to_string(),
                    actual: after.to_string(),
                });
            }
        }

        Ok(channel)
    }

    /// Off-chain balance mutation for an outgoing prepare.
    ///
    /// Increments our nonce and cumulative transferred amount; both are
    /// strictly monotonic and never rolled back.
    pub async fn record_payment(
        &self,
        peer_account: &str,
        amount: u64,
    ) -> Result<Option<BalanceProof>, EvmEngineError> {
        let mut channels = self.channels.write().await;
        let Some(channel) = channels.values_mut().find(|c| {
            c.status == EvmChannelStatus::Opened
                && c.partner_of(&c.participants[0]) == Some(peer_account)
        }) else {
            return Ok(None);
        };

        let own_account = channel.participants[0].clone();
        let channel_id = channel.channel_id.clone();
        let side = channel.side_mut(&own_account);
        let previous = side.transferred;
        side.nonce += 1;
        side.transferred += amount;
        let nonce = side.nonce;
        let transferred = side.transferred;
        channel.last_activity_at = Utc::now();
        drop(channels);

        self.telemetry
            .emit(TelemetryEvent::AgentChannelBalanceUpdate {
                chain: "evm".into(),
                channel_id: channel_id.clone(),
                previous_balance: previous.to_string(),
                new_balance: transferred.to_string(),
            });
        self.telemetry
            .emit(TelemetryEvent::PaymentChannelBalanceUpdate {
                channel_id: channel_id.clone(),
                nonce,
                previous_transferred: previous,
                transferred,
            });
        self.telemetry.emit(TelemetryEvent::AgentChannelPaymentSent {
            chain: "evm".into(),
            channel_id: channel_id.clone(),
            amount: amount.to_string(),
        });

        Ok(Some(BalanceProof::new(channel_id, nonce, transferred)))
    }

    /// Sign a balance proof with the agent key.
    pub async fn sign_balance_proof(
        &self,
        channel_id: &str,
        nonce: u64,
        transferred_amount: u64,
    ) -> Result<SignedBalanceProof, EvmEngineError> {
        let client = self.client().await?;
        if self.channel(channel_id).await.is_none() {
            return Err(EvmEngineError::UnknownChannel {
                channel_id: channel_id.to_string(),
            });
        }
        let proof = BalanceProof::new(channel_id, nonce, transferred_amount);
        let message = proof.canonical_message(&self.config.domain_separator);
        let signature = self.keypair.sign_hex(&message);
        Ok(SignedBalanceProof {
            proof,
            signature,
            signer: client.account(),
        })
    }

    /// Cooperative settle: verify both counter-signed proofs, then submit
    /// with nonce-escalating retries.
    pub async fn cooperative_settle(
        &self,
        params: CooperativeSettleParams,
    ) -> Result<String, EvmEngineError> {
        let client = self.client().await?;
        let channel =
            self.channel(&params.channel_id)
                .await
                .ok_or_else(|| EvmEngineError::UnknownChannel {
                    channel_id: params.channel_id.clone(),
                })?;
        if channel.status == EvmChannelStatus::Settled {
            return Err(EvmEngineError::NotOpen {
                channel_id: params.channel_id.clone(),
            });
        }

        for proof in [&params.proof1, &params.proof2] {
            if proof.channel_id != params.channel_id {
                return Err(EvmEngineError::InvalidProof {
                    message: format!(
                        "proof references channel {}, expected {}",
                        proof.channel_id, params.channel_id
                    ),
                });
            }
        }
        for (proof, signature, pubkey, label) in [
            (&params.proof1, &params.signature1, &params.signer1_pubkey, "proof1"),
            (&params.proof2, &params.signature2, &params.signer2_pubkey, "proof2"),
        ] {
            let message = proof.canonical_message(&self.config.domain_separator);
            let valid = verify_signature_hex(pubkey, &message, signature).map_err(|e| {
                EvmEngineError::InvalidProof {
                    message: format!("{label}: {e}"),
                }
            })?;
            if !valid {
                return Err(EvmEngineError::InvalidProof {
                    message: format!("{label}: signature does not verify"),
                });
            }
        }

        self.telemetry.emit(TelemetryEvent::SettlementTriggered {
            peer_id: channel.participants[1].clone(),
            chain: "evm".into(),
            amount: (params.proof1.transferred_amount + params.proof2.transferred_amount)
                .to_string(),
        });

        let request = CooperativeSettleRequest {
            channel_id: params.channel_id.clone(),
            proof1: params.proof1,
            signature1: params.signature1,
            proof2: params.proof2,
            signature2: params.signature2,
        };
        let base_sequence = client.next_sequence().await?;
        let attempt = AtomicU64::new(0);
        let timeout = self.config.tx_timeout_ms;

        // on nonce errors the sequence escalates by the attempt index
        let policy = RetryPolicy::with_max_retries(SETTLE_NONCE_RETRIES)
            .delays(1_000, 30_000)
            .retry_if(|error: &EvmEngineError| match error {
                EvmEngineError::Chain(chain) => chain.is_nonce_error(),
                _ => false,
            });
        let tx_hash = execute_with_retry(
            || {
                let client = client.clone();
                let request = request.clone();
                let sequence = base_sequence + attempt.fetch_add(1, Ordering::SeqCst);
                async move {
                    with_timeout(timeout, client.cooperative_settle(&request, sequence))
                        .await
                        .map_err(EvmEngineError::from)?
                        .map_err(EvmEngineError::from)
                }
            },
            &policy,
        )
        .await?;

        {
            let mut channels = self.channels.write().await;
            if let Some(channel) = channels.get_mut(&params.channel_id) {
                channel.status = EvmChannelStatus::Settled;
                channel.settled_at = Some(Utc::now());
            }
        }
        info!(channel_id = %params.channel_id, tx_hash = %tx_hash, "channel settled");

        self.telemetry.emit(TelemetryEvent::PaymentChannelSettled {
            channel_id: params.channel_id.clone(),
            tx_hash: tx_hash.clone(),
        });
        self.telemetry.emit(TelemetryEvent::SettlementCompleted {
            peer_id: channel.participants[1].clone(),
            chain: "evm".into(),
            amount: request.proof1.transferred_amount.to_string(),
            tx_hash: tx_hash.clone(),
        });

        Ok(tx_hash)
    }

    /// Domain separator used for proof encodings
    pub fn domain_separator(&self) -> &str {
        &self.config.domain_separator
    }

    /// Our chain account, when configured
    pub async fn account(&self) -> Option<String> {
        self.client.read().await.as_ref().map(|c| c.account())
    }

    /// Token and native wallet balances as seen by the chain client
    pub async fn wallet_balances(&self) -> Result<(u64, String), EvmEngineError> {
        let client = self.client().await?;
        let account = client.account();
        let token = client.token_balance(&account).await?;
        let native = client.native_balance(&account).await?;
        Ok((token, native))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChainClient;

    fn engine() -> EvmChannelEngine {
        EvmChannelEngine::new(
            EvmEngineConfig::new("0xnetwork", "0xtoken"),
            Arc::new(AgentKeypair::generate()),
            Arc::new(TelemetryEmitter::new("node-a")),
        )
    }

    #[tokio::test]
    async fn test_unconfigured_engine_refuses() {
        let engine = engine();
        let result = engine.open_channel("0xpeer", 1_000).await;
        assert!(matches!(result, Err(EvmEngineError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_open_channel_records_state() {
        let engine = engine();
        engine.configure(Arc::new(MockChainClient::new("0xme"))).await;
        let channel = engine.open_channel("0xpeer", 1_000).await.unwrap();
        assert_eq!(channel.status, EvmChannelStatus::Opened);
        assert_eq!(channel.participants, ["0xme".to_string(), "0xpeer".to_string()]);
        assert_eq!(channel.side("0xme").deposit, 1_000);
        assert!(engine.channel(&channel.channel_id).await.is_some());
    }

    #[tokio::test]
    async fn test_payments_are_monotonic() {
        let engine = engine();
        engine.configure(Arc::new(MockChainClient::new("0xme"))).await;
        engine.open_channel("0xpeer", 1_000).await.unwrap();

        let mut last_nonce = 0;
        let mut last_transferred = 0;
        for _ in 0..5 {
            let proof = engine.record_payment("0xpeer", 10).await.unwrap().unwrap();
            assert!(proof.nonce > last_nonce);
            assert!(proof.transferred_amount >= last_transferred);
            last_nonce = proof.nonce;
            last_transferred = proof.transferred_amount;
        }
        assert_eq!(last_nonce, 5);
        assert_eq!(last_transferred, 50);
    }

    #[tokio::test]
    async fn test_payment_without_channel_is_none() {
        let engine = engine();
        engine.configure(Arc::new(MockChainClient::new("0xme"))).await;
        assert!(engine.record_payment("0xpeer", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cooperative_settle_happy_path() {
        let engine = engine();
        let client = Arc::new(MockChainClient::new("0xme"));
        engine.configure(client.clone()).await;
        let channel = engine.open_channel("0xpeer", 1_000).await.unwrap();
        for _ in 0..5 {
            engine.record_payment("0xpeer", 10).await.unwrap();
        }

        let ours = engine
            .sign_balance_proof(&channel.channel_id, 5, 50)
            .await
            .unwrap();
        // the counterpart signs its own zero proof with its own key
        let peer_keypair = AgentKeypair::generate();
        let peer_proof = BalanceProof::new(channel.channel_id.clone(), 5, 50);
        let peer_signature =
            peer_keypair.sign_hex(&peer_proof.canonical_message(engine.domain_separator()));

        let tx_hash = engine
            .cooperative_settle(CooperativeSettleParams {
                channel_id: channel.channel_id.clone(),
                proof1: ours.proof,
                signature1: ours.signature,
                signer1_pubkey: engine.keypair.public_key_hex(),
                proof2: peer_proof,
                signature2: peer_signature,
                signer2_pubkey: peer_keypair.public_key_hex(),
            })
            .await
            .unwrap();
        assert!(!tx_hash.is_empty());
        let settled = engine.channel(&channel.channel_id).await.unwrap();
        assert_eq!(settled.status, EvmChannelStatus::Settled);
        assert!(settled.settled_at.is_some());
    }

    #[tokio::test]
    async fn test_cooperative_settle_rejects_bad_signature() {
        let engine = engine();
        engine.configure(Arc::new(MockChainClient::new("0xme"))).await;
        let channel = engine.open_channel("0xpeer", 1_000).await.unwrap();

        let proof = BalanceProof::new(channel.channel_id.clone(), 1, 10);
        let other = AgentKeypair::generate();
        let forged = other.sign_hex(b"unrelated bytes");
        let result = engine
            .cooperative_settle(CooperativeSettleParams {
                channel_id: channel.channel_id.clone(),
                proof1: proof.clone(),
                signature1: forged.clone(),
                signer1_pubkey: other.public_key_hex(),
                proof2: proof,
                signature2: forged,
                signer2_pubkey: other.public_key_hex(),
            })
            .await;
        assert!(matches!(result, Err(EvmEngineError::InvalidProof { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_retries_nonce_errors_with_escalated_sequence() {
        let engine = engine();
        let client = Arc::new(MockChainClient::new("0xme").failing_nonce_times(2));
        engine.configure(client.clone()).await;
        let channel = engine.open_channel("0xpeer", 1_000).await.unwrap();

        let ours = engine
            .sign_balance_proof(&channel.channel_id, 1, 10)
            .await
            .unwrap();
        let peer_keypair = AgentKeypair::generate();
        let peer_proof = BalanceProof::new(channel.channel_id.clone(), 1, 10);
        let peer_signature =
            peer_keypair.sign_hex(&peer_proof.canonical_message(engine.domain_separator()));

        let tx_hash = engine
            .cooperative_settle(CooperativeSettleParams {
                channel_id: channel.channel_id.clone(),
                proof1: ours.proof,
                signature1: ours.signature,
                signer1_pubkey: engine.keypair.public_key_hex(),
                proof2: peer_proof,
                signature2: peer_signature,
                signer2_pubkey: peer_keypair.public_key_hex(),
            })
            .await
            .unwrap();
        assert!(!tx_hash.is_empty());
        // two failures plus the success
        assert_eq!(client.settle_attempts(), 3);
        let sequences = client.settle_sequences();
        assert_eq!(sequences[1], sequences[0] + 1);
        assert_eq!(sequences[2], sequences[0] + 2);
    }
}
