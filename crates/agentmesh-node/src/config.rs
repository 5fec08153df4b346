//! Node configuration from environment variables
//!
//! The variable names are part of the deployment contract and must not be
//! renamed.

use std::env;

use serde::{Deserialize, Serialize};

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// AI dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// `AI_AGENT_ENABLED`
    pub enabled: bool,
    /// `AI_AGENT_MODEL`
    pub model: Option<String>,
    /// `AI_MAX_TOKENS_PER_REQUEST`
    pub max_tokens_per_request: u32,
    /// `AI_MAX_TOKENS_PER_HOUR`
    pub max_tokens_per_hour: u64,
    /// `AI_API_KEY`
    pub api_key: Option<String>,
    /// `AI_API_BASE_URL`
    pub api_base_url: String,
    pub fallback_on_exhaustion: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            max_tokens_per_request: 1_000,
            max_tokens_per_hour: 100_000,
            api_key: None,
            api_base_url: "https://api.openai.com/v1".to_string(),
            fallback_on_exhaustion: true,
        }
    }
}

/// EVM settlement settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvmConfig {
    /// `ANVIL_RPC_URL`
    pub rpc_url: Option<String>,
    /// `TOKEN_NETWORK_ADDRESS`
    pub token_network_address: Option<String>,
    /// `AGENT_TOKEN_ADDRESS`
    pub token_address: Option<String>,
}

/// XRPL settlement settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XrplConfig {
    /// `XRP_ENABLED`
    pub enabled: bool,
    /// `XRPL_WSS_URL`
    pub wss_url: Option<String>,
    /// `XRPL_NETWORK`: `standalone` needs explicit ledger advancing
    pub network: Option<String>,
    /// `XRPL_ACCOUNT_SECRET`
    pub account_secret: Option<String>,
    /// `XRPL_ACCOUNT_ADDRESS`
    pub account_address: Option<String>,
}

impl XrplConfig {
    pub fn is_standalone(&self) -> bool {
        self.network.as_deref() == Some("standalone")
    }
}

/// Full node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `AGENT_ID`
    pub agent_id: String,
    /// `AGENT_HTTP_PORT`
    pub http_port: u16,
    /// `AGENT_BTP_PORT`
    pub btp_port: u16,
    /// `AGENT_EXPLORER_PORT` (served by the external UI)
    pub explorer_port: u16,
    /// `AGENT_PUBKEY` (informational; derived from the secret when unset)
    pub pubkey: Option<String>,
    /// `AGENT_PRIVKEY`: 32-byte hex secret; a fresh key is generated when
    /// unset
    pub privkey: Option<String>,
    /// `AGENT_DATABASE_PATH`; in-memory when unset
    pub database_path: Option<String>,
    /// `AGENT_EXPLORER_DB_PATH`; telemetry is memory-only when unset
    pub explorer_db_path: Option<String>,
    /// Cap on stored events; breach surfaces `T00`
    pub max_events: Option<u64>,
    /// Expiry horizon for outgoing prepares, seconds
    pub prepare_ttl_secs: i64,
    /// Minimum prepare amount for DVM jobs; breach surfaces `T04`
    pub dvm_required_payment: u64,
    pub ai: AiConfig,
    pub evm: EvmConfig,
    pub xrpl: XrplConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent".to_string(),
            http_port: 3000,
            btp_port: 3001,
            explorer_port: 3002,
            pubkey: None,
            privkey: None,
            database_path: None,
            explorer_db_path: None,
            max_events: None,
            prepare_ttl_secs: 30,
            dvm_required_payment: 0,
            ai: AiConfig::default(),
            evm: EvmConfig::default(),
            xrpl: XrplConfig::default(),
        }
    }
}

impl NodeConfig {
    /// The node's dotted-prefix routing address
    pub fn address(&self) -> String {
        format!("g.agent.{}", self.agent_id)
    }

    /// Load from the environment, falling back to defaults field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            agent_id: env_var("AGENT_ID").unwrap_or(defaults.agent_id),
            http_port: env_parse("AGENT_HTTP_PORT").unwrap_or(defaults.http_port),
            btp_port: env_parse("AGENT_BTP_PORT").unwrap_or(defaults.btp_port),
            explorer_port: env_parse("AGENT_EXPLORER_PORT").unwrap_or(defaults.explorer_port),
            pubkey: env_var("AGENT_PUBKEY"),
            privkey: env_var("AGENT_PRIVKEY"),
            database_path: env_var("AGENT_DATABASE_PATH"),
            explorer_db_path: env_var("AGENT_EXPLORER_DB_PATH"),
            max_events: env_parse("AGENT_MAX_EVENTS"),
            prepare_ttl_secs: defaults.prepare_ttl_secs,
            dvm_required_payment: env_parse("AGENT_DVM_REQUIRED_PAYMENT")
                .unwrap_or(defaults.dvm_required_payment),
            ai: AiConfig {
                enabled: env_flag("AI_AGENT_ENABLED").unwrap_or(false),
                model: env_var("AI_AGENT_MODEL"),
                max_tokens_per_request: env_parse("AI_MAX_TOKENS_PER_REQUEST")
                    .unwrap_or(defaults.ai.max_tokens_per_request),
                max_tokens_per_hour: env_parse("AI_MAX_TOKENS_PER_HOUR")
                    .unwrap_or(defaults.ai.max_tokens_per_hour),
                api_key: env_var("AI_API_KEY"),
                api_base_url: env_var("AI_API_BASE_URL").unwrap_or(defaults.ai.api_base_url),
                fallback_on_exhaustion: env_flag("AI_FALLBACK_ON_EXHAUSTION").unwrap_or(true),
            },
            evm: EvmConfig {
                rpc_url: env_var("ANVIL_RPC_URL"),
                token_network_address: env_var("TOKEN_NETWORK_ADDRESS"),
                token_address: env_var("AGENT_TOKEN_ADDRESS"),
            },
            xrpl: XrplConfig {
                enabled: env_flag("XRP_ENABLED").unwrap_or(false),
                wss_url: env_var("XRPL_WSS_URL"),
                network: env_var("XRPL_NETWORK"),
                account_secret: env_var("XRPL_ACCOUNT_SECRET"),
                account_address: env_var("XRPL_ACCOUNT_ADDRESS"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_derivation() {
        let config = NodeConfig {
            agent_id: "alice".into(),
            ..Default::default()
        };
        assert_eq!(config.address(), "g.agent.alice");
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.btp_port, 3001);
        assert!(!config.ai.enabled);
        assert!(config.ai.fallback_on_exhaustion);
        assert_eq!(config.prepare_ttl_secs, 30);
    }
}
