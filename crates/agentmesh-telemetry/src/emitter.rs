//! Telemetry emitter: bounded buffer plus broadcast fan-out

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::{TelemetryEvent, TelemetryRecord};
use crate::store::TelemetryStore;

/// Default in-memory ring capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 1_000;

/// Fan-out point for telemetry records.
///
/// `emit` is synchronous and infallible from the caller's point of view:
/// subscriber lag and store failures are logged and dropped.
pub struct TelemetryEmitter {
    node_id: String,
    sender: broadcast::Sender<TelemetryRecord>,
    buffer: RwLock<VecDeque<TelemetryRecord>>,
    capacity: usize,
    store: Option<Arc<TelemetryStore>>,
}

impl TelemetryEmitter {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_capacity(node_id, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(node_id: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            node_id: node_id.into(),
            sender,
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            store: None,
        }
    }

    /// Attach a persistent store; appends happen off the emit path.
    pub fn with_store(mut self, store: Arc<TelemetryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Record a state transition.
    pub fn emit(&self, event: TelemetryEvent) -> TelemetryRecord {
        let record = TelemetryRecord::new(self.node_id.clone(), event);
        debug!(event_type = record.event.event_type(), "telemetry");

        {
            let mut buffer = self.buffer.write();
            buffer.push_back(record.clone());
            while buffer.len() > self.capacity {
                // shed oldest non-terminal; terminal records survive
                match buffer.iter().position(|r| !r.is_terminal()) {
                    Some(index) => {
                        buffer.remove(index);
                    }
                    None => break,
                }
            }
        }

        // no subscribers is fine
        let _ = self.sender.send(record.clone());

        if let Some(store) = &self.store {
            let store = store.clone();
            let persisted = record.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(error) = store.append(&persisted).await {
                        warn!(%error, "failed to persist telemetry record");
                    }
                });
            }
        }

        record
    }

    /// Live stream of records
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.sender.subscribe()
    }

    /// Most recent buffered records, newest last
    pub fn recent(&self, limit: usize) -> Vec<TelemetryRecord> {
        let buffer = self.buffer.read();
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Buffered record count
    pub fn buffered(&self) -> usize {
        self.buffer.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_event(total: u64) -> TelemetryEvent {
        TelemetryEvent::AiTokenUsage {
            prompt: 0,
            completion: 0,
            total,
            used_in_window: total,
            remaining: 0,
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_records() {
        let emitter = TelemetryEmitter::new("node-a");
        let mut rx = emitter.subscribe();
        emitter.emit(usage_event(10));
        let record = rx.recv().await.unwrap();
        assert_eq!(record.event.event_type(), "AI_TOKEN_USAGE");
        assert_eq!(record.node_id, "node-a");
    }

    #[tokio::test]
    async fn test_shedding_keeps_terminal_records() {
        let emitter = TelemetryEmitter::with_capacity("node-a", 2);
        emitter.emit(TelemetryEvent::PaymentChannelSettled {
            channel_id: "c1".into(),
            tx_hash: "0x1".into(),
        });
        emitter.emit(usage_event(1));
        emitter.emit(usage_event(2));
        emitter.emit(usage_event(3));
        let recent = emitter.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event.event_type(), "PAYMENT_CHANNEL_SETTLED");
        assert_eq!(recent[1].event.event_type(), "AI_TOKEN_USAGE");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let emitter = TelemetryEmitter::new("node-a");
        emitter.emit(usage_event(1));
        assert_eq!(emitter.buffered(), 1);
    }
}
