use chrono::Utc;
use parley_types::models::{User, UserId};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::models::UserCredentials;
use crate::{Database, Result, StoreError};

impl Database {
    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        self.with_conn_mut(|conn, deadline| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![username, email, password_hash, Utc::now()],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict("username or email already taken".into())
                }
                other => other,
            })?;

            let id = tx.last_insert_rowid();
            deadline.commit(tx)?;
            info!("Registered user {} ({})", username, id);
            Ok(User {
                id,
                username: username.to_string(),
                email: email.to_string(),
            })
        })
    }

    pub fn get_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        self.with_conn(|conn| {
            let creds = conn
                .query_row(
                    "SELECT id, username, email, password_hash FROM users WHERE email = ?1",
                    [email],
                    |row| {
                        Ok(UserCredentials {
                            user: user_from_row(row)?,
                            password_hash: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(creds)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, username, email FROM users ORDER BY id")?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }
}

/// Maps `id, username, email` in the first three columns.
pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
    })
}

pub(crate) fn require_user(conn: &Connection, id: UserId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [id],
        |r| r.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("user {id}")))
    }
}
