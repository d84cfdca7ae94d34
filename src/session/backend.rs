//! Where session records live: a concurrent map for tests and single-process
//! runs, or the `sessions` table next to the business entities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension};

use crate::session::{SessionError, SessionKey};
use crate::storage::db::{from_unix, to_unix, Database};

/// Raw row as persisted: state name, JSON payload, last write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub state: String,
    pub payload: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, SessionError>;
    async fn save(&self, key: &SessionKey, record: SessionRecord) -> Result<(), SessionError>;
    /// Removing an absent key is not an error.
    async fn remove(&self, key: &SessionKey) -> Result<(), SessionError>;
    /// Drops every record last written before `cutoff`; returns how many.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, SessionError>;
}

#[derive(Default)]
pub struct MemorySessionBackend {
    entries: DashMap<SessionKey, SessionRecord>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes a record as-is, bypassing encoding. Used to simulate damaged rows.
    pub fn insert_raw(&self, key: SessionKey, record: SessionRecord) {
        self.entries.insert(key, record);
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn save(&self, key: &SessionKey, record: SessionRecord) -> Result<(), SessionError> {
        self.entries.insert(key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<(), SessionError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, SessionError> {
        let before = self.entries.len();
        self.entries.retain(|_, record| record.updated_at >= cutoff);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Sessions in the `sessions` table, keyed by (scope, user_id).
#[derive(Clone)]
pub struct SqliteSessionBackend {
    db: Database,
}

impl SqliteSessionBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionBackend {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, SessionError> {
        let conn = self.db.conn().map_err(SessionError::backend)?;
        let record = conn
            .query_row(
                "SELECT state, payload, updated_at FROM sessions WHERE scope = ?1 AND user_id = ?2",
                params![key.scope.to_string(), key.user_id],
                |row| {
                    Ok(SessionRecord {
                        state: row.get(0)?,
                        payload: row.get(1)?,
                        updated_at: from_unix(row.get(2)?),
                    })
                },
            )
            .optional()
            .map_err(SessionError::backend)?;
        Ok(record)
    }

    async fn save(&self, key: &SessionKey, record: SessionRecord) -> Result<(), SessionError> {
        let conn = self.db.conn().map_err(SessionError::backend)?;
        conn.execute(
            "INSERT INTO sessions (scope, user_id, state, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(scope, user_id) DO UPDATE SET
                 state = excluded.state,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
            params![
                key.scope.to_string(),
                key.user_id,
                record.state,
                record.payload,
                to_unix(record.updated_at)
            ],
        )
        .map_err(SessionError::backend)?;
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<(), SessionError> {
        let conn = self.db.conn().map_err(SessionError::backend)?;
        conn.execute(
            "DELETE FROM sessions WHERE scope = ?1 AND user_id = ?2",
            params![key.scope.to_string(), key.user_id],
        )
        .map_err(SessionError::backend)?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, SessionError> {
        let conn = self.db.conn().map_err(SessionError::backend)?;
        let removed = conn
            .execute("DELETE FROM sessions WHERE updated_at < ?1", [to_unix(cutoff)])
            .map_err(SessionError::backend)?;
        Ok(removed)
    }
}
