use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::core::error::{AppError, AppResult};
use crate::storage::migrations::run_migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool and bring the schema up to date.
///
/// Every pooled connection gets foreign keys, WAL and a busy timeout so
/// concurrent handlers do not trip over `SQLITE_BUSY`.
///
/// # Example
///
/// ```no_run
/// use storehub::storage::db;
///
/// let pool = db::create_pool("storehub.sqlite")?;
/// # Ok::<(), storehub::core::error::AppError>(())
/// ```
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder().max_size(10).build(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn).map_err(|e| AppError::Migration(format!("{:#}", e)))?;

    Ok(pool)
}

/// Get a connection from the pool
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Handle to the business-entity store.
///
/// Cheap to clone; every method checks a connection out of the shared pool.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens (or creates) the database file and applies migrations.
    pub fn open(database_path: &str) -> AppResult<Self> {
        Ok(Self::new(create_pool(database_path)?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn conn(&self) -> AppResult<DbConnection> {
        Ok(get_connection(&self.pool)?)
    }
}

/// Unix seconds, the on-disk timestamp format.
pub(crate) fn to_unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_applies_migrations_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sqlite");
        let path = path.to_str().unwrap();

        let db = Database::open(path).unwrap();
        // Reopening must not try to re-apply V1
        let _again = Database::open(path).unwrap();

        let conn = db.conn().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('stores', 'sessions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_unix_round_trip() {
        let now = Utc::now();
        assert_eq!(to_unix(from_unix(to_unix(now))), now.timestamp());
    }
}
