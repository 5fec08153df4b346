//! Pending-packet correlation table

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use agentmesh_types::{Packet, PendingPacket, WireCode};

/// One in-flight prepare awaiting its response.
pub struct PendingEntry {
    pub record: PendingPacket,
    /// Resolves the sender's await; consumed exactly once
    pub responder: oneshot::Sender<Packet>,
}

/// Outstanding outbound prepares keyed by `(peer id, event id)`.
///
/// Deletion is the idempotency token: whoever removes the entry (response
/// arrival or timeout sweep) owns the completion.
#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<(String, String), PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight prepare; returns the receiver the sender
    /// awaits, or `None` if the same correlation is already in flight.
    pub fn insert(&self, record: PendingPacket) -> Option<oneshot::Receiver<Packet>> {
        let key = (record.peer_id.clone(), record.event_id.clone());
        if self.entries.contains_key(&key) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            key,
            PendingEntry {
                record,
                responder: tx,
            },
        );
        Some(rx)
    }

    /// Complete the pending identified by the echoed event id, or the
    /// peer's single pending when no id was echoed.
    pub fn complete(
        &self,
        peer_id: &str,
        event_id: Option<&str>,
        response: Packet,
    ) -> Option<PendingPacket> {
        let key = match event_id {
            Some(event_id) => (peer_id.to_string(), event_id.to_string()),
            None => {
                let mut keys = self
                    .entries
                    .iter()
                    .filter(|entry| entry.key().0 == peer_id)
                    .map(|entry| entry.key().clone());
                let key = keys.next()?;
                if keys.next().is_some() {
                    debug!(peer_id, "ambiguous un-echoed response dropped");
                    return None;
                }
                key
            }
        };
        let (_, entry) = self.entries.remove(&key)?;
        let record = entry.record.clone();
        // receiver may have gone away; the removal already settled the race
        let _ = entry.responder.send(response);
        Some(record)
    }

    /// Reject every pending whose expiry has passed with `R02`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<PendingPacket> {
        let expired: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.value().record.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        let mut swept = Vec::new();
        for key in expired {
            if let Some((_, entry)) = self.entries.remove(&key) {
                debug!(peer_id = %key.0, event_id = %key.1, "pending prepare expired");
                let record = entry.record.clone();
                let _ = entry.responder.send(Packet::reject_code(WireCode::R02));
                swept.push(record);
            }
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_types::{Fulfill, Reject};
    use chrono::Duration;

    fn pending(peer: &str, event: &str, expires_in_secs: i64) -> PendingPacket {
        let now = Utc::now();
        PendingPacket {
            peer_id: peer.into(),
            event_id: event.into(),
            destination: "g.agent.peer".into(),
            amount: 10,
            sent_at: now,
            expires_at: now + Duration::seconds(expires_in_secs),
        }
    }

    fn fulfill() -> Packet {
        Packet::Fulfill(Fulfill {
            fulfillment: "ZnVsZmlsbG1lbnQ=".into(),
            data: None,
        })
    }

    #[tokio::test]
    async fn test_complete_by_event_id() {
        let table = PendingTable::new();
        let rx = table.insert(pending("peer-b", "ev1", 30)).unwrap();
        let record = table.complete("peer-b", Some("ev1"), fulfill()).unwrap();
        assert_eq!(record.event_id, "ev1");
        assert!(matches!(rx.await.unwrap(), Packet::Fulfill(_)));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_correlation_is_refused() {
        let table = PendingTable::new();
        let _rx = table.insert(pending("peer-b", "ev1", 30)).unwrap();
        assert!(table.insert(pending("peer-b", "ev1", 30)).is_none());
    }

    #[tokio::test]
    async fn test_unechoed_response_uses_sole_pending() {
        let table = PendingTable::new();
        let rx = table.insert(pending("peer-b", "ev1", 30)).unwrap();
        assert!(table.complete("peer-b", None, fulfill()).is_some());
        assert!(matches!(rx.await.unwrap(), Packet::Fulfill(_)));
    }

    #[tokio::test]
    async fn test_unechoed_response_with_two_pendings_is_dropped() {
        let table = PendingTable::new();
        let _rx1 = table.insert(pending("peer-b", "ev1", 30)).unwrap();
        let _rx2 = table.insert(pending("peer-b", "ev2", 30)).unwrap();
        assert!(table.complete("peer-b", None, fulfill()).is_none());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_rejects_expired_with_r02() {
        let table = PendingTable::new();
        let rx_old = table.insert(pending("peer-b", "ev1", -1)).unwrap();
        let _rx_new = table.insert(pending("peer-b", "ev2", 60)).unwrap();

        let swept = table.sweep_expired(Utc::now());
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].event_id, "ev1");
        assert_eq!(table.len(), 1);

        match rx_old.await.unwrap() {
            Packet::Reject(Reject { code, .. }) => assert_eq!(code, "R02"),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_completion_is_idempotent() {
        let table = PendingTable::new();
        let _rx = table.insert(pending("peer-b", "ev1", 30)).unwrap();
        assert!(table.complete("peer-b", Some("ev1"), fulfill()).is_some());
        // a duplicate response finds nothing to complete
        assert!(table.complete("peer-b", Some("ev1"), fulfill()).is_none());
    }
}
