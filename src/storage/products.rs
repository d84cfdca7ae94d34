use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::core::error::{AppError, AppResult};
use crate::core::plan::within_product_limit;
use crate::core::types::StoreId;
use crate::storage::db::{from_unix, to_unix, Database};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub store_id: StoreId,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub image_file_id: Option<String>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

pub struct NewProduct<'a> {
    pub store_id: StoreId,
    pub name: &'a str,
    pub description: &'a str,
    pub price: i64,
    pub image_file_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductCreation {
    Created(Product),
    /// The store's plan does not allow another product.
    LimitReached { limit: u32 },
}

const PRODUCT_COLUMNS: &str = "id, store_id, name, description, price, image_file_id, is_available, created_at";

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        store_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        image_file_id: row.get(5)?,
        is_available: row.get(6)?,
        created_at: from_unix(row.get(7)?),
    })
}

impl Database {
    /// Inserts a product if the store's product limit still has room.
    ///
    /// The count and the insert share one transaction so two concurrent
    /// submissions cannot both squeeze past the limit.
    pub fn create_product(&self, new: &NewProduct<'_>) -> AppResult<ProductCreation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let limit: Option<i64> = tx
            .query_row(
                "SELECT product_limit FROM stores WHERE id = ?1",
                [new.store_id],
                |row| row.get(0),
            )
            .optional()?;
        let limit = limit.ok_or_else(|| AppError::NotFound(format!("store {}", new.store_id)))?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM products WHERE store_id = ?1",
            [new.store_id],
            |row| row.get(0),
        )?;
        // A negative column value means unlimited
        if let Ok(limit) = u32::try_from(limit) {
            let count = u32::try_from(count).unwrap_or(u32::MAX);
            if !within_product_limit(Some(limit), count) {
                return Ok(ProductCreation::LimitReached { limit });
            }
        }

        tx.execute(
            "INSERT INTO products (store_id, name, description, price, image_file_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.store_id,
                new.name,
                new.description,
                new.price,
                new.image_file_id,
                to_unix(Utc::now())
            ],
        )?;
        let id = tx.last_insert_rowid();
        let product = tx.query_row(
            &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
            [id],
            product_from_row,
        )?;
        tx.commit()?;
        Ok(ProductCreation::Created(product))
    }

    pub fn product(&self, id: i64) -> AppResult<Option<Product>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
                [id],
                product_from_row,
            )
            .optional()?)
    }

    pub fn products_for_store(&self, store_id: StoreId) -> AppResult<Vec<Product>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM products WHERE store_id = ?1 ORDER BY id",
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([store_id], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    pub fn count_products(&self, store_id: StoreId) -> AppResult<u32> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM products WHERE store_id = ?1",
            [store_id],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
