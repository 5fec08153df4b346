//! SQLite persistence for telemetry records

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::events::TelemetryRecord;

/// Default cap on rows returned by a query
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum TelemetryStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Filter over the persisted telemetry stream.
///
/// Matches the explorer's query parameters: `types`, `since`, `until`,
/// `peerId`, `packetId`, `direction`, `limit`, `offset`.
#[derive(Debug, Clone, Default)]
pub struct TelemetryQuery {
    pub types: Option<Vec<String>>,
    /// Inclusive lower bound, milliseconds
    pub since: Option<i64>,
    /// Inclusive upper bound, milliseconds
    pub until: Option<i64>,
    pub peer_id: Option<String>,
    pub packet_id: Option<String>,
    pub direction: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Append-only SQLite store behind the emitter.
pub struct TelemetryStore {
    pool: SqlitePool,
}

impl TelemetryStore {
    pub async fn connect(path: &str) -> Result<Self, TelemetryStoreError> {
        info!(path, "opening telemetry database");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, TelemetryStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), TelemetryStoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS telemetry (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                peer_id TEXT,
                packet_id TEXT,
                direction TEXT,
                payload TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        for index in [
            "CREATE INDEX IF NOT EXISTS idx_telemetry_type ON telemetry(event_type)",
            "CREATE INDEX IF NOT EXISTS idx_telemetry_time ON telemetry(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_telemetry_peer ON telemetry(peer_id)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn append(&self, record: &TelemetryRecord) -> Result<(), TelemetryStoreError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| TelemetryStoreError::CorruptRecord(e.to_string()))?;
        sqlx::query(
            "INSERT OR IGNORE INTO telemetry
                 (id, event_type, timestamp, node_id, peer_id, packet_id, direction, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.event.event_type())
        .bind(record.timestamp)
        .bind(&record.node_id)
        .bind(record.event.peer_id())
        .bind(record.event.packet_id())
        .bind(record.event.direction())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Query persisted records, newest first.
    pub async fn query(
        &self,
        query: &TelemetryQuery,
    ) -> Result<Vec<TelemetryRecord>, TelemetryStoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT payload FROM telemetry WHERE 1 = 1");
        if let Some(types) = &query.types {
            qb.push(" AND event_type IN (");
            let mut sep = qb.separated(", ");
            for event_type in types {
                sep.push_bind(event_type.clone());
            }
            qb.push(")");
        }
        if let Some(since) = query.since {
            qb.push(" AND timestamp >= ");
            qb.push_bind(since);
        }
        if let Some(until) = query.until {
            qb.push(" AND timestamp <= ");
            qb.push_bind(until);
        }
        if let Some(peer_id) = &query.peer_id {
            qb.push(" AND peer_id = ");
            qb.push_bind(peer_id.clone());
        }
        if let Some(packet_id) = &query.packet_id {
            qb.push(" AND packet_id = ");
            qb.push_bind(packet_id.clone());
        }
        if let Some(direction) = &query.direction {
            qb.push(" AND direction = ");
            qb.push_bind(direction.clone());
        }
        qb.push(" ORDER BY timestamp DESC, id ASC LIMIT ");
        qb.push_bind(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64);
        qb.push(" OFFSET ");
        qb.push_bind(query.offset.unwrap_or(0) as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                serde_json::from_str(&payload)
                    .map_err(|e| TelemetryStoreError::CorruptRecord(e.to_string()))
            })
            .collect()
    }

    pub async fn count(&self) -> Result<u64, TelemetryStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM telemetry")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TelemetryEvent;

    fn packet_received(peer: &str, packet: &str) -> TelemetryRecord {
        TelemetryRecord::new(
            "node-a",
            TelemetryEvent::PacketReceived {
                peer_id: peer.into(),
                packet_id: packet.into(),
                packet_type: "fulfill".into(),
                amount: 10,
                error_code: None,
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_query_by_type() {
        let store = TelemetryStore::in_memory().await.unwrap();
        store.append(&packet_received("peer-b", "ev1")).await.unwrap();
        store
            .append(&TelemetryRecord::new(
                "node-a",
                TelemetryEvent::AiBudgetExhausted { used: 100, cap: 100 },
            ))
            .await
            .unwrap();

        let records = store
            .query(&TelemetryQuery {
                types: Some(vec!["PACKET_RECEIVED".into()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.packet_id(), Some("ev1"));
    }

    #[tokio::test]
    async fn test_query_by_peer_and_direction() {
        let store = TelemetryStore::in_memory().await.unwrap();
        store.append(&packet_received("peer-b", "ev1")).await.unwrap();
        store.append(&packet_received("peer-c", "ev2")).await.unwrap();

        let records = store
            .query(&TelemetryQuery {
                peer_id: Some("peer-c".into()),
                direction: Some("incoming".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.peer_id(), Some("peer-c"));
    }
}
