//! AgentMesh API - HTTP control surface
//!
//! Synchronous JSON over HTTP/1.1. Write endpoints validate inputs before
//! mutating state; reads are consistent snapshots. Failures use the
//! `{success: false, error}` envelope with 400 on input errors and 500 on
//! internal faults.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, ChainClientFactory, LedgerClientFactory};
