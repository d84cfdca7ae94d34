//! The supervisor's read/write-back view of the business-entity store.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::core::types::StoreId;
use crate::storage::{Database, Store};
use crate::supervisor::{SupervisorError, TenantStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredStatus {
    Active,
    Inactive,
}

/// One store's bot as the supervisor sees it.
#[derive(Debug, Clone)]
pub struct TenantHandle {
    pub store_id: StoreId,
    /// Where lifecycle notifications go
    pub owner_chat_id: i64,
    pub credential: Option<SecretString>,
    pub desired: DesiredStatus,
}

impl From<&Store> for TenantHandle {
    fn from(store: &Store) -> Self {
        Self {
            store_id: store.id,
            owner_chat_id: store.owner_id,
            credential: store.bot_token.clone().map(SecretString::from),
            desired: if store.is_active {
                DesiredStatus::Active
            } else {
                DesiredStatus::Inactive
            },
        }
    }
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Tenants that should be running: active and holding a credential.
    async fn active_tenants(&self) -> Result<Vec<TenantHandle>, SupervisorError>;

    async fn tenant(&self, store_id: StoreId) -> Result<Option<TenantHandle>, SupervisorError>;

    async fn record_status(
        &self,
        store_id: StoreId,
        status: TenantStatus,
        error: Option<&str>,
    ) -> Result<(), SupervisorError>;

    async fn record_username(&self, store_id: StoreId, username: &str) -> Result<(), SupervisorError>;
}

fn directory_error(err: impl std::fmt::Display) -> SupervisorError {
    SupervisorError::Directory(err.to_string())
}

#[async_trait]
impl TenantDirectory for Database {
    async fn active_tenants(&self) -> Result<Vec<TenantHandle>, SupervisorError> {
        let stores = self.active_stores_with_bot().map_err(directory_error)?;
        Ok(stores.iter().map(TenantHandle::from).collect())
    }

    async fn tenant(&self, store_id: StoreId) -> Result<Option<TenantHandle>, SupervisorError> {
        let store = self.store(store_id).map_err(directory_error)?;
        Ok(store.as_ref().map(TenantHandle::from))
    }

    async fn record_status(
        &self,
        store_id: StoreId,
        status: TenantStatus,
        error: Option<&str>,
    ) -> Result<(), SupervisorError> {
        self.record_bot_status(store_id, status, error).map_err(directory_error)
    }

    async fn record_username(&self, store_id: StoreId, username: &str) -> Result<(), SupervisorError> {
        self.set_bot_username(store_id, username).map_err(directory_error)
    }
}
