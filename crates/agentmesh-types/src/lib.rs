//! AgentMesh Types - Canonical domain types for the agent mesh
//!
//! This crate contains the foundational types shared across the node, with
//! zero dependencies on other agentmesh crates:
//!
//! - Signed social-graph events and their id/signature rules
//! - The three-variant packet union (prepare / fulfill / reject)
//! - Peer, follow, and pending-packet records
//! - Payment-channel records for both settlement substrates
//! - The wire error taxonomy (F01 .. T04)
//!
//! # Invariants
//!
//! 1. An event id is the SHA-256 of its canonical serialization
//! 2. A fulfillment hashes to the prepare's execution condition
//! 3. Channel nonces only ever increase

pub mod channel;
pub mod crypto;
pub mod error;
pub mod event;
pub mod packet;
pub mod peer;

pub use channel::*;
pub use crypto::*;
pub use error::*;
pub use event::*;
pub use packet::*;
pub use peer::*;

/// Version of the agentmesh wire schema
pub const WIRE_VERSION: &str = "0.1.0";
