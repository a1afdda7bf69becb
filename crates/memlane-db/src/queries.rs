use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::unique_violation;
use crate::models::UserRow;
use crate::{Database, StoreError, StoreResult};

impl Database {
    // -- Users --

    /// Insert a user and return its id. A username or email that is already
    /// taken yields [`StoreError::Conflict`].
    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> StoreResult<i64> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT INTO users (username, email, password) VALUES (?1, ?2, ?3)",
                (username, email, password_hash),
            );

            if let Err(e) = inserted {
                return Err(match unique_violation(&e) {
                    Some(msg) if msg.contains("users.email") => {
                        StoreError::Conflict("email is already registered".into())
                    }
                    Some(_) => StoreError::Conflict("username is already taken".into()),
                    None => e.into(),
                });
            }

            let id = tx.last_insert_rowid();
            info!("Created user {} ({})", id, username);
            Ok(id)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> StoreResult<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, email, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn.query_row(&sql, [value], map_user).optional()?;
    Ok(row)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        created_at: row.get(4)?,
    })
}
