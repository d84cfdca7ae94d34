use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use strum::{AsRefStr, Display, EnumString};

use crate::core::error::AppResult;
use crate::core::plan::PlanType;
use crate::core::types::StoreId;
use crate::storage::db::{from_unix, to_unix, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// A manual card-transfer payment backed by a receipt photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: i64,
    pub store_id: StoreId,
    pub user_id: i64,
    pub plan: PlanType,
    pub amount: i64,
    pub proof_file_id: String,
    pub status: PaymentStatus,
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewPayment<'a> {
    pub store_id: StoreId,
    pub user_id: i64,
    pub plan: PlanType,
    pub amount: i64,
    pub proof_file_id: &'a str,
}

const PAYMENT_COLUMNS: &str =
    "id, store_id, user_id, plan, amount, proof_file_id, status, verified_by, verified_at, created_at";

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let plan: String = row.get(3)?;
    let status: String = row.get(6)?;
    let verified_at: Option<i64> = row.get(8)?;
    Ok(Payment {
        id: row.get(0)?,
        store_id: row.get(1)?,
        user_id: row.get(2)?,
        plan: plan.parse().unwrap_or(PlanType::Free),
        amount: row.get(4)?,
        proof_file_id: row.get(5)?,
        status: status.parse().unwrap_or(PaymentStatus::Pending),
        verified_by: row.get(7)?,
        verified_at: verified_at.map(from_unix),
        created_at: from_unix(row.get(9)?),
    })
}

impl Database {
    /// Records a pending payment.
    ///
    /// Re-sending the same receipt for the same store returns the existing
    /// row instead of creating a second one.
    pub fn create_payment(&self, new: &NewPayment<'_>) -> AppResult<(Payment, bool)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM payments WHERE store_id = ?1 AND proof_file_id = ?2",
                    PAYMENT_COLUMNS
                ),
                params![new.store_id, new.proof_file_id],
                payment_from_row,
            )
            .optional()?;
        if let Some(payment) = existing {
            return Ok((payment, false));
        }

        tx.execute(
            "INSERT INTO payments (store_id, user_id, plan, amount, proof_file_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                new.store_id,
                new.user_id,
                new.plan.as_ref(),
                new.amount,
                new.proof_file_id,
                to_unix(Utc::now())
            ],
        )?;
        let id = tx.last_insert_rowid();
        let payment = tx.query_row(
            &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLUMNS),
            [id],
            payment_from_row,
        )?;
        tx.commit()?;
        Ok((payment, true))
    }

    pub fn payment(&self, id: i64) -> AppResult<Option<Payment>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLUMNS),
                [id],
                payment_from_row,
            )
            .optional()?)
    }

    /// Moves a pending payment to `status`.
    ///
    /// Returns `None` when the payment does not exist or was already decided,
    /// which makes a double-tapped approve button harmless.
    pub fn decide_payment(&self, id: i64, status: PaymentStatus, admin_id: i64) -> AppResult<Option<Payment>> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE payments SET status = ?1, verified_by = ?2, verified_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![status.as_ref(), admin_id, to_unix(Utc::now()), id],
        )?;
        drop(conn);
        if changed == 0 {
            return Ok(None);
        }
        self.payment(id)
    }

    pub fn pending_payments(&self) -> AppResult<Vec<Payment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE status = 'pending' ORDER BY id",
            PAYMENT_COLUMNS
        ))?;
        let payments = stmt
            .query_map([], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payments)
    }
}
