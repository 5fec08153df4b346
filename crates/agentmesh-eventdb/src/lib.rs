//! AgentMesh Event Database
//!
//! SQLite-backed store for social-graph events. The store is single-writer
//! (the packet handler), multi-reader; queries run against a consistent
//! snapshot of the pool.
//!
//! Tags are kept both inline (JSON on the event row) and in a side table
//! so tag filters stay indexed.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

use agentmesh_types::{Event, EventFilter};

/// Default cap on rows returned by a query
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Event-store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Maps to wire code `T00`
    #[error("storage limit exceeded: {limit} events")]
    StorageLimit { limit: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// SQLite event store.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: SqlitePool,
    max_events: Option<u64>,
}

impl EventStore {
    /// Open (or create) the store at `path`
    pub async fn connect(path: &str, max_events: Option<u64>) -> StoreResult<Self> {
        info!(path, "opening event database");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool, max_events };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let store = Self {
            pool,
            max_events: None,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store with a storage cap, for limit tests
    pub async fn in_memory_with_limit(max_events: u64) -> StoreResult<Self> {
        let mut store = Self::in_memory().await?;
        store.max_events = Some(max_events);
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                tags TEXT NOT NULL,
                content TEXT NOT NULL,
                sig TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_tags (
                event_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        for index in [
            "CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind)",
            "CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey)",
            "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_event_tags_nv ON event_tags(name, value)",
            "CREATE INDEX IF NOT EXISTS idx_event_tags_event ON event_tags(event_id)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert an event; returns false when the id is already present.
    pub async fn insert(&self, event: &Event) -> StoreResult<bool> {
        if let Some(limit) = self.max_events {
            if self.count().await? >= limit {
                return Err(StoreError::StorageLimit { limit });
            }
        }
        let tags_json = serde_json::to_string(&event.tags)
            .map_err(|e| StoreError::CorruptRow(e.to_string()))?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, tags, content, sig)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.pubkey)
        .bind(event.created_at)
        .bind(event.kind as i64)
        .bind(&tags_json)
        .bind(&event.content)
        .bind(&event.sig)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted == 0 {
            debug!(id = %event.id, "event already stored");
            return Ok(false);
        }
        for tag in &event.tags {
            if tag.len() >= 2 {
                sqlx::query("INSERT INTO event_tags (event_id, name, value) VALUES (?, ?, ?)")
                    .bind(&event.id)
                    .bind(&tag[0])
                    .bind(&tag[1])
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Fetch one event by id
    pub async fn get(&self, id: &str) -> StoreResult<Option<Event>> {
        let row = sqlx::query(
            "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_event).transpose()
    }

    /// Query events matching the filter, newest first.
    pub async fn query(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT e.id, e.pubkey, e.created_at, e.kind, e.tags, e.content, e.sig \
             FROM events e",
        );
        if filter.tag.is_some() {
            qb.push(" JOIN event_tags t ON t.event_id = e.id");
        }
        qb.push(" WHERE 1 = 1");
        if let Some(ids) = &filter.ids {
            qb.push(" AND e.id IN (");
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(id.clone());
            }
            qb.push(")");
        }
        if let Some(kinds) = &filter.kinds {
            qb.push(" AND e.kind IN (");
            let mut sep = qb.separated(", ");
            for kind in kinds {
                sep.push_bind(*kind as i64);
            }
            qb.push(")");
        }
        if let Some(authors) = &filter.authors {
            qb.push(" AND e.pubkey IN (");
            let mut sep = qb.separated(", ");
            for author in authors {
                sep.push_bind(author.clone());
            }
            qb.push(")");
        }
        if let Some((name, value)) = &filter.tag {
            qb.push(" AND t.name = ");
            qb.push_bind(name.clone());
            qb.push(" AND t.value = ");
            qb.push_bind(value.clone());
        }
        if let Some(since) = filter.since {
            qb.push(" AND e.created_at >= ");
            qb.push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND e.created_at <= ");
            qb.push_bind(until);
        }
        qb.push(" ORDER BY e.created_at DESC, e.id ASC LIMIT ");
        qb.push_bind(filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset.unwrap_or(0) as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_event).collect()
    }

    /// Delete one event by id; returns whether a row was removed
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        sqlx::query("DELETE FROM event_tags WHERE event_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let removed = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    /// Total stored events
    pub async fn count(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> StoreResult<Event> {
    let tags_json: String = row.try_get("tags")?;
    let tags = serde_json::from_str(&tags_json)
        .map_err(|e| StoreError::CorruptRow(format!("tags column: {e}")))?;
    let kind: i64 = row.try_get("kind")?;
    Ok(Event {
        id: row.try_get("id")?,
        pubkey: row.try_get("pubkey")?,
        created_at: row.try_get("created_at")?,
        kind: kind as u32,
        tags,
        content: row.try_get("content")?,
        sig: row.try_get("sig")?,
    })
}
