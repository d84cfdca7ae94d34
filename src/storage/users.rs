use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::core::error::AppResult;
use crate::core::types::Sender;
use crate::storage::db::{from_unix, to_unix, Database};

/// Anyone who has talked to the mother bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Inserts the sender or refreshes their username and first name.
    pub fn upsert_user(&self, sender: &Sender) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (telegram_id, username, first_name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(telegram_id) DO UPDATE SET username = excluded.username, first_name = excluded.first_name",
            params![
                sender.user_id,
                sender.username,
                sender.first_name,
                to_unix(Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn user(&self, telegram_id: i64) -> AppResult<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT telegram_id, username, first_name, created_at FROM users WHERE telegram_id = ?1",
                [telegram_id],
                |row| {
                    Ok(User {
                        telegram_id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                        created_at: from_unix(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}
