//! Telemetry event types
//!
//! The `type` strings are part of the contract with the external event/UI
//! consumer and must not be renamed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    #[serde(rename = "PACKET_RECEIVED")]
    PacketReceived {
        #[serde(rename = "peerId")]
        peer_id: String,
        /// Correlation id: the embedded event's id
        #[serde(rename = "packetId")]
        packet_id: String,
        /// Outcome frame type: `fulfill` or `reject`
        #[serde(rename = "packetType")]
        packet_type: String,
        amount: u64,
        #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },

    #[serde(rename = "PACKET_FORWARDED")]
    PacketForwarded {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "packetId")]
        packet_id: String,
        destination: String,
        amount: u64,
    },

    #[serde(rename = "ACCOUNT_BALANCE")]
    AccountBalance {
        account: String,
        chain: String,
        balance: String,
    },

    #[serde(rename = "SETTLEMENT_TRIGGERED")]
    SettlementTriggered {
        #[serde(rename = "peerId")]
        peer_id: String,
        chain: String,
        amount: String,
    },

    #[serde(rename = "SETTLEMENT_COMPLETED")]
    SettlementCompleted {
        #[serde(rename = "peerId")]
        peer_id: String,
        chain: String,
        amount: String,
        #[serde(rename = "txHash")]
        tx_hash: String,
    },

    #[serde(rename = "AGENT_CHANNEL_OPENED")]
    AgentChannelOpened {
        chain: String,
        #[serde(rename = "channelId")]
        channel_id: String,
        amount: String,
    },

    #[serde(rename = "AGENT_CHANNEL_BALANCE_UPDATE")]
    AgentChannelBalanceUpdate {
        chain: String,
        #[serde(rename = "channelId")]
        channel_id: String,
        #[serde(rename = "previousBalance")]
        previous_balance: String,
        #[serde(rename = "newBalance")]
        new_balance: String,
    },

    #[serde(rename = "AGENT_CHANNEL_PAYMENT_SENT")]
    AgentChannelPaymentSent {
        chain: String,
        #[serde(rename = "channelId")]
        channel_id: String,
        amount: String,
    },

    #[serde(rename = "AGENT_CHANNEL_CLOSED")]
    AgentChannelClosed {
        chain: String,
        #[serde(rename = "channelId")]
        channel_id: String,
    },

    #[serde(rename = "PAYMENT_CHANNEL_OPENED")]
    PaymentChannelOpened {
        #[serde(rename = "channelId")]
        channel_id: String,
        partner: String,
        deposit: u64,
    },

    #[serde(rename = "PAYMENT_CHANNEL_BALANCE_UPDATE")]
    PaymentChannelBalanceUpdate {
        #[serde(rename = "channelId")]
        channel_id: String,
        nonce: u64,
        #[serde(rename = "previousTransferred")]
        previous_transferred: u64,
        transferred: u64,
    },

    #[serde(rename = "PAYMENT_CHANNEL_SETTLED")]
    PaymentChannelSettled {
        #[serde(rename = "channelId")]
        channel_id: String,
        #[serde(rename = "txHash")]
        tx_hash: String,
    },

    #[serde(rename = "XRP_CHANNEL_OPENED")]
    XrpChannelOpened {
        #[serde(rename = "channelId")]
        channel_id: String,
        destination: String,
        amount: String,
    },

    #[serde(rename = "XRP_CHANNEL_CLAIMED")]
    XrpChannelClaimed {
        #[serde(rename = "channelId")]
        channel_id: String,
        #[serde(rename = "claimedAmount")]
        claimed_amount: String,
        #[serde(rename = "txHash")]
        tx_hash: String,
    },

    #[serde(rename = "XRP_CHANNEL_CLOSED")]
    XrpChannelClosed {
        #[serde(rename = "channelId")]
        channel_id: String,
    },

    #[serde(rename = "AI_TOKEN_USAGE")]
    AiTokenUsage {
        prompt: u64,
        completion: u64,
        total: u64,
        #[serde(rename = "usedInWindow")]
        used_in_window: u64,
        remaining: u64,
    },

    #[serde(rename = "AI_BUDGET_WARNING")]
    AiBudgetWarning {
        /// 80 or 95
        #[serde(rename = "thresholdPct")]
        threshold_pct: u8,
        used: u64,
        cap: u64,
    },

    #[serde(rename = "AI_BUDGET_EXHAUSTED")]
    AiBudgetExhausted { used: u64, cap: u64 },

    #[serde(rename = "WALLET_BALANCE_MISMATCH")]
    WalletBalanceMismatch {
        account: String,
        chain: String,
        expected: String,
        actual: String,
    },

    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded {
        #[serde(rename = "remoteAddr")]
        remote_addr: String,
        path: String,
    },
}

impl TelemetryEvent {
    /// The wire `type` string
    pub fn event_type(&self) -> &'static str {
        match self {
            TelemetryEvent::PacketReceived { .. } => "PACKET_RECEIVED",
            TelemetryEvent::PacketForwarded { .. } => "PACKET_FORWARDED",
            TelemetryEvent::AccountBalance { .. } => "ACCOUNT_BALANCE",
            TelemetryEvent::SettlementTriggered { .. } => "SETTLEMENT_TRIGGERED",
            TelemetryEvent::SettlementCompleted { .. } => "SETTLEMENT_COMPLETED",
            TelemetryEvent::AgentChannelOpened { .. } => "AGENT_CHANNEL_OPENED",
            TelemetryEvent::AgentChannelBalanceUpdate { .. } => "AGENT_CHANNEL_BALANCE_UPDATE",
            TelemetryEvent::AgentChannelPaymentSent { .. } => "AGENT_CHANNEL_PAYMENT_SENT",
            TelemetryEvent::AgentChannelClosed { .. } => "AGENT_CHANNEL_CLOSED",
            TelemetryEvent::PaymentChannelOpened { .. } => "PAYMENT_CHANNEL_OPENED",
            TelemetryEvent::PaymentChannelBalanceUpdate { .. } => {
                "PAYMENT_CHANNEL_BALANCE_UPDATE"
            }
            TelemetryEvent::PaymentChannelSettled { .. } => "PAYMENT_CHANNEL_SETTLED",
            TelemetryEvent::XrpChannelOpened { .. } => "XRP_CHANNEL_OPENED",
            TelemetryEvent::XrpChannelClaimed { .. } => "XRP_CHANNEL_CLAIMED",
            TelemetryEvent::XrpChannelClosed { .. } => "XRP_CHANNEL_CLOSED",
            TelemetryEvent::AiTokenUsage { .. } => "AI_TOKEN_USAGE",
            TelemetryEvent::AiBudgetWarning { .. } => "AI_BUDGET_WARNING",
            TelemetryEvent::AiBudgetExhausted { .. } => "AI_BUDGET_EXHAUSTED",
            TelemetryEvent::WalletBalanceMismatch { .. } => "WALLET_BALANCE_MISMATCH",
            TelemetryEvent::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
        }
    }

    /// Terminal records survive back-pressure shedding.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TelemetryEvent::SettlementCompleted { .. }
                | TelemetryEvent::AgentChannelClosed { .. }
                | TelemetryEvent::PaymentChannelSettled { .. }
                | TelemetryEvent::XrpChannelClosed { .. }
        )
    }

    /// Peer associated with the record, for store filtering
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            TelemetryEvent::PacketReceived { peer_id, .. }
            | TelemetryEvent::PacketForwarded { peer_id, .. }
            | TelemetryEvent::SettlementTriggered { peer_id, .. }
            | TelemetryEvent::SettlementCompleted { peer_id, .. } => Some(peer_id),
            _ => None,
        }
    }

    /// Packet correlation id, for store filtering
    pub fn packet_id(&self) -> Option<&str> {
        match self {
            TelemetryEvent::PacketReceived { packet_id, .. }
            | TelemetryEvent::PacketForwarded { packet_id, .. } => Some(packet_id),
            _ => None,
        }
    }

    /// Packet direction relative to this node
    pub fn direction(&self) -> Option<&'static str> {
        match self {
            TelemetryEvent::PacketReceived { .. } => Some("incoming"),
            TelemetryEvent::PacketForwarded { .. } => Some("outgoing"),
            _ => None,
        }
    }
}

/// A telemetry event stamped with id, node, and time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

impl TelemetryRecord {
    pub fn new(node_id: impl Into<String>, event: TelemetryEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            event,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_type_tags() {
        let record = TelemetryRecord::new(
            "node-a",
            TelemetryEvent::PacketReceived {
                peer_id: "peer-b".into(),
                packet_id: "ev1".into(),
                packet_type: "fulfill".into(),
                amount: 100,
                error_code: None,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "PACKET_RECEIVED");
        assert_eq!(json["nodeId"], "node-a");
        assert_eq!(json["packetType"], "fulfill");
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn test_terminal_classification() {
        let settled = TelemetryEvent::PaymentChannelSettled {
            channel_id: "c1".into(),
            tx_hash: "0xabc".into(),
        };
        assert!(settled.is_terminal());
        let usage = TelemetryEvent::AiTokenUsage {
            prompt: 1,
            completion: 2,
            total: 3,
            used_in_window: 3,
            remaining: 97,
        };
        assert!(!usage.is_terminal());
    }
}
