//! Store rows: plan, activation window and the tenant bot credential.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::core::error::{AppError, AppResult};
use crate::core::plan::{PlanLimits, PlanType};
use crate::core::types::StoreId;
use crate::storage::db::{from_unix, to_unix, Database};
use crate::supervisor::TenantStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    pub id: StoreId,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub plan: PlanType,
    /// None = unlimited
    pub product_limit: Option<u32>,
    pub commission_percent: u8,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub bot_token: Option<String>,
    pub bot_username: Option<String>,
    /// Last status written back by the supervisor
    pub bot_status: TenantStatus,
    pub bot_error: Option<String>,
    /// Cleared when the owner stops the bot; nothing restarts it until they start it again
    pub bot_enabled: bool,
    pub welcome_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn has_bot(&self) -> bool {
        self.bot_token.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct NewStore<'a> {
    pub owner_id: i64,
    pub name: &'a str,
    pub description: &'a str,
    pub limits: PlanLimits,
    /// Free stores go live immediately; paid ones wait for payment approval.
    pub active: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCreation {
    Created(Store),
    /// The owner already has a store; nothing was written.
    AlreadyOwned(Store),
}

const STORE_COLUMNS: &str = "id, owner_id, name, description, plan, product_limit, commission_percent, expires_at, \
                             is_active, bot_token, bot_username, bot_status, bot_error, welcome_message, created_at, \
                             bot_enabled";

fn store_from_row(row: &Row<'_>) -> rusqlite::Result<Store> {
    let plan: String = row.get(4)?;
    let product_limit: i64 = row.get(5)?;
    let commission: i64 = row.get(6)?;
    let expires_at: Option<i64> = row.get(7)?;
    let bot_status: String = row.get(11)?;
    Ok(Store {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        plan: plan.parse().unwrap_or(PlanType::Free),
        product_limit: u32::try_from(product_limit).ok(),
        commission_percent: u8::try_from(commission).unwrap_or(0),
        expires_at: expires_at.map(from_unix),
        is_active: row.get(8)?,
        bot_token: row.get(9)?,
        bot_username: row.get(10)?,
        bot_status: bot_status.parse().unwrap_or(TenantStatus::Stopped),
        bot_error: row.get(12)?,
        welcome_message: row.get(13)?,
        created_at: from_unix(row.get(14)?),
        bot_enabled: row.get(15)?,
    })
}

impl Database {
    /// Creates the owner's store unless they already have one.
    pub fn create_store(&self, new: &NewStore<'_>) -> AppResult<StoreCreation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!("SELECT {} FROM stores WHERE owner_id = ?1", STORE_COLUMNS),
                [new.owner_id],
                store_from_row,
            )
            .optional()?;
        if let Some(store) = existing {
            return Ok(StoreCreation::AlreadyOwned(store));
        }

        let now = to_unix(new.now);
        let expires_at = new.active.then(|| to_unix(new.limits.expiry_from(new.now)));
        tx.execute(
            "INSERT INTO stores (owner_id, name, description, plan, product_limit, commission_percent,
                                 expires_at, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                new.owner_id,
                new.name,
                new.description,
                new.limits.plan.as_ref(),
                new.limits.product_limit_column(),
                i64::from(new.limits.commission_percent),
                expires_at,
                new.active,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        let store = tx.query_row(
            &format!("SELECT {} FROM stores WHERE id = ?1", STORE_COLUMNS),
            [id],
            store_from_row,
        )?;
        tx.commit()?;
        Ok(StoreCreation::Created(store))
    }

    pub fn store(&self, id: StoreId) -> AppResult<Option<Store>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM stores WHERE id = ?1", STORE_COLUMNS),
                [id],
                store_from_row,
            )
            .optional()?)
    }

    pub fn store_by_owner(&self, owner_id: i64) -> AppResult<Option<Store>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM stores WHERE owner_id = ?1", STORE_COLUMNS),
                [owner_id],
                store_from_row,
            )
            .optional()?)
    }

    pub fn list_stores(&self) -> AppResult<Vec<Store>> {
        self.query_stores("SELECT {} FROM stores ORDER BY id", params![])
    }

    /// Active stores with a linked bot credential that the owner has not switched off.
    pub fn active_stores_with_bot(&self) -> AppResult<Vec<Store>> {
        self.query_stores(
            "SELECT {} FROM stores WHERE is_active = 1 AND bot_token IS NOT NULL AND bot_enabled = 1 ORDER BY id",
            params![],
        )
    }

    /// Active stores whose plan ran out at or before `now`.
    pub fn expired_stores(&self, now: DateTime<Utc>) -> AppResult<Vec<Store>> {
        self.query_stores(
            "SELECT {} FROM stores WHERE is_active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1 ORDER BY id",
            [to_unix(now)],
        )
    }

    /// Active stores whose plan runs out after `now` but no later than `until`.
    pub fn stores_expiring_between(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> AppResult<Vec<Store>> {
        self.query_stores(
            "SELECT {} FROM stores
             WHERE is_active = 1 AND expires_at IS NOT NULL AND expires_at > ?1 AND expires_at <= ?2
             ORDER BY id",
            params![to_unix(now), to_unix(until)],
        )
    }

    fn query_stores<P: rusqlite::Params>(&self, template: &str, params: P) -> AppResult<Vec<Store>> {
        let conn = self.conn()?;
        let sql = template.replacen("{}", STORE_COLUMNS, 1);
        let mut stmt = conn.prepare(&sql)?;
        let stores = stmt
            .query_map(params, store_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stores)
    }

    /// Puts the store on `limits` and extends its validity.
    ///
    /// Time left on a still-valid subscription carries over.
    pub fn activate_store(&self, id: StoreId, limits: &PlanLimits, now: DateTime<Utc>) -> AppResult<Store> {
        let store = self
            .store(id)?
            .ok_or_else(|| AppError::NotFound(format!("store {}", id)))?;
        let base = store.expires_at.filter(|at| *at > now).unwrap_or(now);
        let expires_at = limits.expiry_from(base);

        let conn = self.conn()?;
        conn.execute(
            "UPDATE stores SET plan = ?1, product_limit = ?2, commission_percent = ?3, expires_at = ?4,
                               is_active = 1, updated_at = ?5
             WHERE id = ?6",
            params![
                limits.plan.as_ref(),
                limits.product_limit_column(),
                i64::from(limits.commission_percent),
                to_unix(expires_at),
                to_unix(now),
                id
            ],
        )?;
        self.store(id)?
            .ok_or_else(|| AppError::NotFound(format!("store {}", id)))
    }

    pub fn deactivate_store(&self, id: StoreId) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stores SET is_active = 0, updated_at = ?1 WHERE id = ?2",
            params![to_unix(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Stores a new bot credential and switches the bot on; the username is
    /// learned on first start.
    pub fn set_bot_token(&self, id: StoreId, token: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stores SET bot_token = ?1, bot_username = NULL, bot_error = NULL, bot_enabled = 1, updated_at = ?2
             WHERE id = ?3",
            params![token, to_unix(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_bot_enabled(&self, id: StoreId, enabled: bool) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stores SET bot_enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, to_unix(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Claims the `days_before` reminder for the store's current validity window.
    ///
    /// Returns `false` if it was already claimed, so each reminder goes out once
    /// per window and a renewal starts a fresh set.
    pub fn claim_expiry_reminder(
        &self,
        id: StoreId,
        days_before: i64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO reminders (store_id, days_before, expires_at, sent_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, days_before, to_unix(expires_at), to_unix(now)],
        )?;
        Ok(inserted == 1)
    }

    pub fn set_bot_username(&self, id: StoreId, username: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stores SET bot_username = ?1 WHERE id = ?2",
            params![username, id],
        )?;
        Ok(())
    }

    pub fn record_bot_status(&self, id: StoreId, status: TenantStatus, error: Option<&str>) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stores SET bot_status = ?1, bot_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_ref(), error, to_unix(Utc::now()), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::PlanCatalog;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db.sqlite").to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn new_store(owner_id: i64, plan: PlanType, active: bool) -> NewStore<'static> {
        NewStore {
            owner_id,
            name: "My Shop",
            description: "Handmade ceramics and small gifts",
            limits: PlanCatalog::default().limits(plan),
            active,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_one_store_per_owner() {
        let (_dir, db) = open();
        let first = db.create_store(&new_store(1, PlanType::Free, true)).unwrap();
        let StoreCreation::Created(store) = first else {
            panic!("first store should be created");
        };
        assert_eq!(store.product_limit, Some(10));
        assert!(store.is_active);
        assert!(store.expires_at.is_some());

        let second = db.create_store(&new_store(1, PlanType::Vip, false)).unwrap();
        assert!(matches!(second, StoreCreation::AlreadyOwned(s) if s.id == store.id));
        assert_eq!(db.list_stores().unwrap().len(), 1);
    }

    #[test]
    fn test_paid_store_waits_for_activation() {
        let (_dir, db) = open();
        let StoreCreation::Created(store) = db.create_store(&new_store(2, PlanType::Vip, false)).unwrap() else {
            panic!("store should be created");
        };
        assert!(!store.is_active);
        assert_eq!(store.expires_at, None);
        assert_eq!(store.product_limit, None);

        let limits = PlanCatalog::default().limits(PlanType::Vip);
        let active = db.activate_store(store.id, &limits, Utc::now()).unwrap();
        assert!(active.is_active);
        assert!(active.expires_at.unwrap() > Utc::now() + Duration::days(27));
    }

    #[test]
    fn test_expired_and_bot_queries() {
        let (_dir, db) = open();
        let mut new = new_store(3, PlanType::Pro, true);
        new.now = Utc::now() - Duration::days(60);
        let StoreCreation::Created(store) = db.create_store(&new).unwrap() else {
            panic!("store should be created");
        };
        assert!(db.active_stores_with_bot().unwrap().is_empty());

        db.set_bot_token(store.id, "12345:abcdefghijklmnopqrstuvwxyz0123456789").unwrap();
        db.record_bot_status(store.id, TenantStatus::Error, Some("unauthorized")).unwrap();
        let reloaded = db.store(store.id).unwrap().unwrap();
        assert_eq!(reloaded.bot_status, TenantStatus::Error);
        assert_eq!(reloaded.bot_error.as_deref(), Some("unauthorized"));
        assert_eq!(db.active_stores_with_bot().unwrap().len(), 1);

        db.set_bot_enabled(store.id, false).unwrap();
        assert!(!db.store(store.id).unwrap().unwrap().bot_enabled);
        assert!(db.active_stores_with_bot().unwrap().is_empty());
        db.set_bot_token(store.id, "12345:abcdefghijklmnopqrstuvwxyz0123456789").unwrap();
        assert!(db.store(store.id).unwrap().unwrap().bot_enabled);

        let expired = db.expired_stores(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        db.deactivate_store(store.id).unwrap();
        assert!(db.expired_stores(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_expiry_reminder_is_claimed_once_per_window() {
        let (_dir, db) = open();
        let StoreCreation::Created(store) = db.create_store(&new_store(4, PlanType::Pro, true)).unwrap() else {
            panic!("store should be created");
        };
        let expires_at = store.expires_at.unwrap();
        let now = expires_at - Duration::days(2);

        let expiring = db.stores_expiring_between(now, now + Duration::days(7)).unwrap();
        assert_eq!(expiring.len(), 1);
        assert!(db.stores_expiring_between(now, now + Duration::days(1)).unwrap().is_empty());

        assert!(db.claim_expiry_reminder(store.id, 3, expires_at, now).unwrap());
        assert!(!db.claim_expiry_reminder(store.id, 3, expires_at, now).unwrap());
        // A renewed window is a different reminder
        let renewed = expires_at + Duration::days(30);
        assert!(db.claim_expiry_reminder(store.id, 3, renewed, now).unwrap());
    }
}
