use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use strum::{AsRefStr, Display, EnumString};

use crate::core::error::AppResult;
use crate::core::types::StoreId;
use crate::storage::db::{from_unix, to_unix, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub store_id: StoreId,
    pub product_id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub amount: i64,
    pub commission: i64,
    pub phone: String,
    pub address: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

pub struct NewOrder<'a> {
    pub store_id: StoreId,
    pub product_id: i64,
    pub customer_id: i64,
    pub customer_name: &'a str,
    pub amount: i64,
    pub commission: i64,
    pub phone: &'a str,
    pub address: &'a str,
}

const ORDER_COLUMNS: &str =
    "id, store_id, product_id, customer_id, customer_name, amount, commission, phone, address, status, created_at";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let status: String = row.get(9)?;
    Ok(Order {
        id: row.get(0)?,
        store_id: row.get(1)?,
        product_id: row.get(2)?,
        customer_id: row.get(3)?,
        customer_name: row.get(4)?,
        amount: row.get(5)?,
        commission: row.get(6)?,
        phone: row.get(7)?,
        address: row.get(8)?,
        status: status.parse().unwrap_or(OrderStatus::Pending),
        created_at: from_unix(row.get(10)?),
    })
}

impl Database {
    pub fn create_order(&self, new: &NewOrder<'_>) -> AppResult<Order> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO orders (store_id, product_id, customer_id, customer_name, amount, commission,
                                 phone, address, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)",
            params![
                new.store_id,
                new.product_id,
                new.customer_id,
                new.customer_name,
                new.amount,
                new.commission,
                new.phone,
                new.address,
                to_unix(Utc::now())
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS),
            [id],
            order_from_row,
        )?)
    }

    /// Most recent orders a customer placed in one store.
    pub fn orders_for_customer(&self, store_id: StoreId, customer_id: i64, limit: u32) -> AppResult<Vec<Order>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM orders WHERE store_id = ?1 AND customer_id = ?2 ORDER BY id DESC LIMIT ?3",
            ORDER_COLUMNS
        ))?;
        let orders = stmt
            .query_map(params![store_id, customer_id, limit], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// Most recent orders of a store, for the owner's panel.
    pub fn orders_for_store(&self, store_id: StoreId, limit: u32) -> AppResult<Vec<Order>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM orders WHERE store_id = ?1 ORDER BY id DESC LIMIT ?2",
            ORDER_COLUMNS
        ))?;
        let orders = stmt
            .query_map(params![store_id, limit], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// Moves a pending order of `store_id` to `Confirmed`.
    ///
    /// `None` if the order belongs to another store or is no longer pending.
    pub fn confirm_order(&self, order_id: i64, store_id: StoreId) -> AppResult<Option<Order>> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE orders SET status = ?1 WHERE id = ?2 AND store_id = ?3 AND status = ?4",
            params![
                OrderStatus::Confirmed.as_ref(),
                order_id,
                store_id,
                OrderStatus::Pending.as_ref()
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS),
                [order_id],
                order_from_row,
            )
            .optional()?)
    }

    pub fn count_orders(&self, store_id: StoreId) -> AppResult<u32> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM orders WHERE store_id = ?1", [store_id], |row| {
            row.get(0)
        })?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

/// Platform-wide counters for the admin status command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub users: i64,
    pub stores: i64,
    pub active_stores: i64,
    pub products: i64,
    pub orders: i64,
    pub pending_payments: i64,
}

impl Database {
    pub fn hub_stats(&self) -> AppResult<HubStats> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM stores),
                    (SELECT COUNT(*) FROM stores WHERE is_active = 1),
                    (SELECT COUNT(*) FROM products),
                    (SELECT COUNT(*) FROM orders),
                    (SELECT COUNT(*) FROM payments WHERE status = 'pending')",
            [],
            |row| {
                Ok(HubStats {
                    users: row.get(0)?,
                    stores: row.get(1)?,
                    active_stores: row.get(2)?,
                    products: row.get(3)?,
                    orders: row.get(4)?,
                    pending_payments: row.get(5)?,
                })
            },
        )?)
    }
}
