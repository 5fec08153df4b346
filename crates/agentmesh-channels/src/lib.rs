//! AgentMesh Channels - Off-chain payment channels on two substrates
//!
//! Two engines share one shape: a late-bound settlement adapter, an
//! in-memory channel map mutated only by the engine, and telemetry on
//! every transition.
//!
//! - [`EvmChannelEngine`]: bilateral deposits with counter-signed balance
//!   proofs and a cooperative-settle protocol
//! - [`XrplChannelEngine`]: ledger-hosted unidirectional channels drained
//!   by claim signatures
//!
//! The on-chain libraries are out of scope; engines talk to the
//! [`ChainClient`] / [`LedgerClient`] capability traits.

pub mod adapter;
pub mod evm;
pub mod mock;
pub mod xrpl;

pub use adapter::{
    ChainClient, ChainError, ChainLog, ChannelClaim, ChannelCreate, CooperativeSettleRequest,
    LedgerClient, LedgerNetworkMode, LedgerTx, TxReceipt,
};
pub use evm::{
    CooperativeSettleParams, EvmChannelEngine, EvmEngineConfig, EvmEngineError, SignedBalanceProof,
};
pub use xrpl::{ClaimResult, XrplChannelEngine, XrplEngineConfig, XrplEngineError};
