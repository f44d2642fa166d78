use chrono::Utc;
use parley_types::models::{ChatId, MessageRecord, UserId};
use rusqlite::{OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::chats::require_chat;
use crate::{Database, Result, StoreError};

/// Hard cap on a single page of history.
pub const MAX_PAGE_SIZE: u32 = 500;

impl Database {
    /// Append a message to a chat and return the committed record.
    ///
    /// `seq` is assigned inside the same writer transaction as the insert,
    /// so it is gap-free and strictly increasing per chat.
    pub fn append_message(
        &self,
        chat_id: ChatId,
        author_id: UserId,
        content: &str,
    ) -> Result<MessageRecord> {
        if content.trim().is_empty() {
            return Err(StoreError::Validation("message content must not be empty".into()));
        }
        let max = self.options().max_content_len;
        if content.len() > max {
            return Err(StoreError::Validation(format!(
                "message content exceeds {max} bytes"
            )));
        }

        self.with_conn_mut(|conn, deadline| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_chat(&tx, chat_id)?;

            let username: Option<String> = tx
                .query_row(
                    "SELECT u.username FROM chat_participants cp
                     JOIN users u ON u.id = cp.user_id
                     WHERE cp.chat_id = ?1 AND cp.user_id = ?2",
                    [chat_id, author_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(username) = username else {
                return Err(StoreError::Validation(format!(
                    "user {author_id} is not a participant of chat {chat_id}"
                )));
            };

            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE chat_id = ?1",
                [chat_id],
                |r| r.get(0),
            )?;
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO messages (chat_id, user_id, content, seq, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat_id, author_id, content, seq, created_at],
            )?;
            let id = tx.last_insert_rowid();
            deadline.commit(tx)?;

            debug!("Stored message {} in chat {} (seq {})", id, chat_id, seq);
            Ok(MessageRecord {
                id,
                chat_id,
                author_id,
                username,
                content: content.to_string(),
                seq,
                created_at,
            })
        })
    }

    /// Committed messages of a chat in `seq` order.
    ///
    /// `after_seq` skips everything up to and including that position;
    /// `limit` caps the page at [`MAX_PAGE_SIZE`]. With neither, the whole
    /// history is returned.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        after_seq: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit: i64 = limit.map_or(-1, |l| i64::from(l.min(MAX_PAGE_SIZE)));
        let after_seq = after_seq.unwrap_or(0);

        self.with_conn(|conn| {
            require_chat(conn, chat_id)?;

            // JOIN users to fetch the author username in the same query
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.user_id, u.username, m.content, m.seq, m.created_at
                 FROM messages m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.chat_id = ?1 AND m.seq > ?2
                 ORDER BY m.seq ASC, m.id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map([chat_id, after_seq, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        author_id: row.get(2)?,
        username: row.get(3)?,
        content: row.get(4)?,
        seq: row.get(5)?,
        created_at: row.get(6)?,
    })
}
