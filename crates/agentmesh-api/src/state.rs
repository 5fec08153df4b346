//! Application state shared across handlers

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use agentmesh_channels::{ChainClient, LedgerClient};
use agentmesh_node::Node;

/// Builds a chain client from a configure request; wired by the binary,
/// absent in deployments without chain tooling.
pub type ChainClientFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn ChainClient>, String> + Send + Sync>;

/// Builds a ledger client from a configure request.
pub type LedgerClientFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn LedgerClient>, String> + Send + Sync>;

/// Fixed-window per-IP request limiter.
pub struct RateLimiter {
    limit_per_window: u32,
    window_ms: i64,
    hits: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    pub fn new(limit_per_window: u32, window_ms: i64) -> Self {
        Self {
            limit_per_window,
            window_ms,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record one hit; returns false when the caller is over budget.
    pub fn check(&self, key: &str, now_ms: i64) -> bool {
        let mut hits = self.hits.lock();
        let window_start = now_ms - (now_ms % self.window_ms);
        let entry = hits.entry(key.to_string()).or_insert((window_start, 0));
        if entry.0 != window_start {
            *entry = (window_start, 0);
        }
        entry.1 += 1;
        entry.1 <= self.limit_per_window
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub evm_factory: Option<ChainClientFactory>,
    pub xrp_factory: Option<LedgerClientFactory>,
    pub rate: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            evm_factory: None,
            xrp_factory: None,
            rate: Arc::new(RateLimiter::new(300, 60_000)),
        }
    }

    pub fn with_evm_factory(mut self, factory: ChainClientFactory) -> Self {
        self.evm_factory = Some(factory);
        self
    }

    pub fn with_xrp_factory(mut self, factory: LedgerClientFactory) -> Self {
        self.xrp_factory = Some(factory);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_windows() {
        let limiter = RateLimiter::new(2, 1_000);
        assert!(limiter.check("1.2.3.4", 0));
        assert!(limiter.check("1.2.3.4", 10));
        assert!(!limiter.check("1.2.3.4", 20));
        // other callers are unaffected
        assert!(limiter.check("5.6.7.8", 30));
        // a new window resets the count
        assert!(limiter.check("1.2.3.4", 1_500));
    }
}
