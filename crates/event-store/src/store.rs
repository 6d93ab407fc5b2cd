use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::model::{composite_key, TraitEvent};

/// Durable keyed storage for trait events.
///
/// `upsert` must be idempotent per `(event_id, trait)`: writing the same key
/// again replaces `event_time` and `data` instead of adding a row.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create the backing table and time index if they do not exist yet.
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace the row for `(event.event_id, event.trait_name)`.
    async fn upsert(&self, event: &TraitEvent) -> Result<()>;
}

const CREATE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS trait_events (
        composite_key TEXT PRIMARY KEY,
        event_id      TEXT NOT NULL,
        trait         TEXT NOT NULL,
        event_time    TEXT NOT NULL,
        data_json     TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_trait_events_time ON trait_events(event_time);
"#;

const UPSERT: &str = r#"
    INSERT INTO trait_events (composite_key, event_id, trait, event_time, data_json)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(composite_key) DO UPDATE SET
        event_time = excluded.event_time,
        data_json  = excluded.data_json
"#;

/// SQLite-backed [`EventStore`].
///
/// A single connection is shared behind a mutex, so writes are serialized and
/// each upsert is one atomic statement. Statements run on tokio's blocking pool.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteEventStore {
    /// Opens (or creates) a SQLite database at the given file path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        debug!("Opened event store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: path.display().to_string(),
        })
    }

    /// Opens an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        debug!("Opened in-memory event store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: ":memory:".to_string(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await?
    }

    /// Fetch the row stored for `(event_id, trait_name)`.
    pub async fn get(&self, event_id: &str, trait_name: &str) -> Result<Option<TraitEvent>> {
        let key = composite_key(event_id, trait_name);
        let row = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT event_id, trait, event_time, data_json
                         FROM trait_events WHERE composite_key = ?1",
                        params![key],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        row.map(|(event_id, trait_name, event_time, data_json)| {
            Ok(TraitEvent {
                event_id,
                trait_name,
                event_time,
                data: serde_json::from_str(&data_json)?,
            })
        })
        .transpose()
    }

    /// Rows whose `event_time` lies within the inclusive bounds, oldest first.
    ///
    /// Bounds compare lexically, which orders ISO-8601 timestamps correctly as
    /// long as they share one format and offset. `None` leaves a side open.
    pub async fn events_between(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<TraitEvent>> {
        let from = from.map(str::to_string);
        let to = to.map(str::to_string);
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT event_id, trait, event_time, data_json
                     FROM trait_events
                     WHERE (?1 IS NULL OR event_time >= ?1)
                       AND (?2 IS NULL OR event_time <= ?2)
                     ORDER BY event_time, composite_key",
                )?;
                let rows = stmt
                    .query_map(params![from, to], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(event_id, trait_name, event_time, data_json)| {
                Ok(TraitEvent {
                    event_id,
                    trait_name,
                    event_time,
                    data: serde_json::from_str(&data_json)?,
                })
            })
            .collect()
    }

    /// Number of stored rows.
    pub async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM trait_events", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;
        debug!("Event store initialized at {}", self.location);
        Ok(())
    }

    async fn upsert(&self, event: &TraitEvent) -> Result<()> {
        let data_json = serde_json::to_string(&event.data)?;
        let key = event.composite_key();
        let event_id = event.event_id.clone();
        let trait_name = event.trait_name.clone();
        let event_time = event.event_time.clone();

        self.with_conn(move |conn| {
            conn.execute(UPSERT, params![key, event_id, trait_name, event_time, data_json])?;
            Ok(())
        })
        .await
    }
}
