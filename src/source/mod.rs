//! Inbound event feeds, one per bot credential.
//!
//! A `Connector` turns a credential into a `Connection`: the event feed plus
//! the outbound channel replies go through. The Telegram implementation lives
//! in `crate::telegram::polling`; tests use the in-process doubles in
//! `crate::testing`.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use crate::core::types::InboundEvent;
use crate::telegram::Outbound;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The platform rejected the credential; retrying will not help.
    #[error("credential rejected: {0}")]
    CredentialInvalid(String),

    /// Network or platform trouble; the same credential may work later.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The feed was closed and will not yield more events.
    #[error("update source closed")]
    Closed,
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::CredentialInvalid(_) | SourceError::Closed)
    }
}

/// A feed of inbound events for exactly one bot credential.
#[async_trait]
pub trait UpdateSource: Send {
    /// Waits for the next event.
    ///
    /// Returns `Ok(None)` when the internal poll timeout elapsed without
    /// traffic, so callers get a chance to observe cancellation.
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, SourceError>;

    /// Stops polling. Further calls to `next_event` return `SourceError::Closed`.
    async fn close(&mut self);
}

pub struct Connection {
    pub source: Box<dyn UpdateSource>,
    pub outbound: Arc<dyn Outbound>,
    /// Username the platform reported for this credential, if any.
    pub bot_username: Option<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Validates `credential` and opens its event feed.
    async fn open(&self, credential: &SecretString) -> Result<Connection, SourceError>;
}
