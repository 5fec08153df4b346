//! Deterministic in-memory settlement adapters for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapter::{
    ChainClient, ChainError, ChainLog, ChannelClaim, ChannelCreate, CooperativeSettleRequest,
    LedgerClient, LedgerTx, TxReceipt,
};

/// Starting token balance the mock credits every account
pub const MOCK_TOKEN_SUPPLY: u64 = 1_000_000;

/// In-memory EVM adapter.
pub struct MockChainClient {
    account: String,
    sequence: AtomicU64,
    channel_counter: AtomicU64,
    nonce_failures_remaining: AtomicU32,
    settle_attempts: AtomicU32,
    settle_sequences: Mutex<Vec<u64>>,
    token_balances: Mutex<HashMap<String, u64>>,
}

impl MockChainClient {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            sequence: AtomicU64::new(1),
            channel_counter: AtomicU64::new(0),
            nonce_failures_remaining: AtomicU32::new(0),
            settle_attempts: AtomicU32::new(0),
            settle_sequences: Mutex::new(Vec::new()),
            token_balances: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `n` cooperative-settle submissions fail with a nonce
    /// error.
    pub fn failing_nonce_times(self, n: u32) -> Self {
        self.nonce_failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn settle_attempts(&self) -> u32 {
        self.settle_attempts.load(Ordering::SeqCst)
    }

    pub fn settle_sequences(&self) -> Vec<u64> {
        self.settle_sequences.lock().clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn account(&self) -> String {
        self.account.clone()
    }

    async fn next_sequence(&self) -> Result<u64, ChainError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    async fn approve(
        &self,
        _token: &str,
        _spender: &str,
        _amount: u64,
        sequence: u64,
    ) -> Result<String, ChainError> {
        Ok(format!("0xapprove{sequence}"))
    }

    async fn open_channel(
        &self,
        _token_network: &str,
        _partner: &str,
        _settlement_timeout: u64,
        _sequence: u64,
    ) -> Result<TxReceipt, ChainError> {
        let n = self.channel_counter.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_hash: format!("0xopen{n}"),
            logs: vec![ChainLog {
                name: "ChannelOpened".into(),
                data: serde_json::json!({ "channelId": format!("{n:064x}") }),
            }],
        })
    }

    async fn set_total_deposit(
        &self,
        channel_id: &str,
        participant: &str,
        total_deposit: u64,
        _sequence: u64,
    ) -> Result<String, ChainError> {
        let mut balances = self.token_balances.lock();
        let balance = balances
            .entry(participant.to_string())
            .or_insert(MOCK_TOKEN_SUPPLY);
        *balance = balance.saturating_sub(total_deposit);
        Ok(format!("0xdeposit-{channel_id}"))
    }

    async fn cooperative_settle(
        &self,
        request: &CooperativeSettleRequest,
        sequence: u64,
    ) -> Result<String, ChainError> {
        self.settle_attempts.fetch_add(1, Ordering::SeqCst);
        self.settle_sequences.lock().push(sequence);
        if self
            .nonce_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChainError::Nonce {
                message: format!("nonce too low at sequence {sequence}"),
            });
        }
        Ok(format!("0xsettle-{}", request.channel_id))
    }

    async fn token_balance(&self, account: &str) -> Result<u64, ChainError> {
        Ok(*self
            .token_balances
            .lock()
            .entry(account.to_string())
            .or_insert(MOCK_TOKEN_SUPPLY))
    }

    async fn native_balance(&self, _account: &str) -> Result<String, ChainError> {
        Ok("0".into())
    }
}

struct PendingLedgerTx {
    tx: LedgerTx,
    validated: bool,
}

/// In-memory XRPL adapter.
///
/// Mimics a standalone ledger: submissions stay unvalidated until
/// `advance_ledger` runs.
pub struct MockLedgerClient {
    account: String,
    tx_counter: AtomicU64,
    advances: AtomicU32,
    transactions: Mutex<HashMap<String, PendingLedgerTx>>,
    claims: Mutex<Vec<ChannelClaim>>,
}

impl MockLedgerClient {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            tx_counter: AtomicU64::new(0),
            advances: AtomicU32::new(0),
            transactions: Mutex::new(HashMap::new()),
            claims: Mutex::new(Vec::new()),
        }
    }

    pub fn advances(&self) -> u32 {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn submitted_claims(&self) -> Vec<ChannelClaim> {
        self.claims.lock().clone()
    }

    fn record(&self, channel_id: Option<String>) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let hash = format!("xrptx{n}");
        self.transactions.lock().insert(
            hash.clone(),
            PendingLedgerTx {
                tx: LedgerTx {
                    tx_hash: hash.clone(),
                    channel_id,
                },
                validated: false,
            },
        );
        hash
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    fn account(&self) -> String {
        self.account.clone()
    }

    async fn submit_channel_create(&self, _create: &ChannelCreate) -> Result<String, ChainError> {
        let n = self.tx_counter.load(Ordering::SeqCst);
        Ok(self.record(Some(format!("ledgerchan{n}"))))
    }

    async fn submit_and_wait_channel_create(
        &self,
        create: &ChannelCreate,
    ) -> Result<LedgerTx, ChainError> {
        let hash = self.submit_channel_create(create).await?;
        self.advance_ledger().await?;
        self.fetch_transaction(&hash).await
    }

    async fn submit_claim(&self, claim: &ChannelClaim) -> Result<String, ChainError> {
        self.claims.lock().push(claim.clone());
        Ok(self.record(None))
    }

    async fn advance_ledger(&self) -> Result<(), ChainError> {
        self.advances.fetch_add(1, Ordering::SeqCst);
        for pending in self.transactions.lock().values_mut() {
            pending.validated = true;
        }
        Ok(())
    }

    async fn fetch_transaction(&self, tx_hash: &str) -> Result<LedgerTx, ChainError> {
        let transactions = self.transactions.lock();
        match transactions.get(tx_hash) {
            Some(pending) if pending.validated => Ok(pending.tx.clone()),
            Some(_) => Err(ChainError::NotFound {
                what: format!("transaction {tx_hash} not yet validated"),
            }),
            None => Err(ChainError::NotFound {
                what: format!("transaction {tx_hash}"),
            }),
        }
    }

    async fn balance(&self, _account: &str) -> Result<String, ChainError> {
        Ok("100000000".into())
    }
}
