//! Per-user conversation state.
//!
//! One session exists per user per bot credential. It records which flow
//! step the user is on and the input gathered so far. Ordering of reads and
//! writes for one key is provided by the event lanes, so the store itself
//! needs no locking beyond what the backend does.

pub mod backend;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::types::StoreId;
pub use backend::{MemorySessionBackend, SessionBackend, SessionRecord, SqliteSessionBackend};
pub use state::FlowStep;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Stored state could not be decoded into a known flow step.
    #[error("session is corrupt: {0}")]
    Corrupt(String),

    #[error("session backend failure: {0}")]
    Backend(String),
}

impl SessionError {
    pub(crate) fn backend(err: impl fmt::Display) -> Self {
        SessionError::Backend(err.to_string())
    }
}

/// Which bot a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotScope {
    Mother,
    Store(StoreId),
}

impl fmt::Display for BotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotScope::Mother => write!(f, "mother"),
            BotScope::Store(id) => write!(f, "store:{}", id),
        }
    }
}

impl BotScope {
    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BotScope::Mother => "mother",
            BotScope::Store(_) => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub scope: BotScope,
    pub user_id: i64,
}

impl SessionKey {
    pub fn new(scope: BotScope, user_id: i64) -> Self {
        Self { scope, user_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub step: FlowStep,
    pub updated_at: DateTime<Utc>,
}

/// Typed access to session records with a staleness cutoff.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemorySessionBackend::new()), ttl)
    }

    /// Current session, or `None` if the user is idle.
    ///
    /// A session older than the TTL is removed and reported as absent. A row
    /// that fails to decode yields `SessionError::Corrupt`; the caller clears it.
    pub async fn get(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        let Some(record) = self.backend.load(key).await? else {
            return Ok(None);
        };

        if Utc::now() - record.updated_at > self.ttl {
            log::debug!("Session {} expired in state {}", key, record.state);
            self.backend.remove(key).await?;
            return Ok(None);
        }

        let step = FlowStep::decode(&record.state, record.payload.as_deref())?;
        Ok(Some(Session {
            step,
            updated_at: record.updated_at,
        }))
    }

    /// Replaces the session with `step` and bumps `updated_at`.
    pub async fn set(&self, key: &SessionKey, step: &FlowStep) -> Result<(), SessionError> {
        let (state, payload) = step.encode()?;
        self.backend
            .save(
                key,
                SessionRecord {
                    state,
                    payload,
                    updated_at: Utc::now(),
                },
            )
            .await
    }

    pub async fn clear(&self, key: &SessionKey) -> Result<(), SessionError> {
        self.backend.remove(key).await
    }

    /// Removes every session past the TTL.
    pub async fn purge_stale(&self) -> Result<usize, SessionError> {
        self.backend.purge_older_than(Utc::now() - self.ttl).await
    }

    /// Runs `purge_stale` every `interval` until `cancel` fires.
    pub fn spawn_purge_task(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match store.purge_stale().await {
                    Ok(0) => {}
                    Ok(n) => log::info!("Purged {} stale sessions", n),
                    Err(e) => log::warn!("Session purge failed: {}", e),
                }
            }
        })
    }
}
