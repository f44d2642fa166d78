use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parley_types::models::{Chat, ChatId, ChatPair, ChatSummary, LastMessage, User, UserId};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::users::{require_user, user_from_row};
use crate::{Database, Result, StoreError};

impl Database {
    /// Find the chat between two users, creating it if none exists.
    ///
    /// Concurrent calls for the same pair, in either order, return the same
    /// id: the lookup and the insert share one IMMEDIATE transaction on the
    /// writer, and `chats.pair_key` is UNIQUE so a second creator can never
    /// commit a duplicate. When several chats already match (legacy
    /// unconditional creates), the lowest id wins.
    pub fn resolve_or_create_chat(&self, a: UserId, b: UserId) -> Result<ChatId> {
        let pair = distinct_pair(a, b)?;

        self.with_conn_mut(|conn, deadline| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_user(&tx, pair.low())?;
            require_user(&tx, pair.high())?;

            if let Some(id) = find_pair_chat(&tx, pair)? {
                tx.commit()?;
                return Ok(id);
            }

            let inserted = tx.execute(
                "INSERT INTO chats (pair_key, created_at) VALUES (?1, ?2)
                 ON CONFLICT(pair_key) DO NOTHING",
                rusqlite::params![pair.key(), Utc::now()],
            )?;

            let chat_id = if inserted == 0 {
                debug!("Pair {} already claimed, reading back", pair.key());
                tx.query_row(
                    "SELECT id FROM chats WHERE pair_key = ?1",
                    [pair.key()],
                    |r| r.get(0),
                )?
            } else {
                let id = tx.last_insert_rowid();
                insert_participants(&tx, id, pair)?;
                info!("Created chat {} for users {} and {}", id, pair.low(), pair.high());
                id
            };

            deadline.commit(tx)?;
            Ok(chat_id)
        })
    }

    /// Unconditional create with no dedup. The chat gets no pair key, so it
    /// never blocks `resolve_or_create_chat`, which may still return it.
    pub fn create_chat(&self, a: UserId, b: UserId) -> Result<Chat> {
        let pair = distinct_pair(a, b)?;

        self.with_conn_mut(|conn, deadline| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_user(&tx, pair.low())?;
            require_user(&tx, pair.high())?;

            let created_at = Utc::now();
            tx.execute("INSERT INTO chats (created_at) VALUES (?1)", [created_at])?;
            let id = tx.last_insert_rowid();
            insert_participants(&tx, id, pair)?;
            deadline.commit(tx)?;

            info!("Created unkeyed chat {} for users {} and {}", id, pair.low(), pair.high());
            Ok(Chat { id, created_at })
        })
    }

    pub fn participants(&self, chat_id: ChatId) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            require_chat(conn, chat_id)?;
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email
                 FROM users u
                 JOIN chat_participants cp ON cp.user_id = u.id
                 WHERE cp.chat_id = ?1
                 ORDER BY u.id",
            )?;
            let users = stmt
                .query_map([chat_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    pub fn participant_ids(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        self.with_conn(|conn| {
            require_chat(conn, chat_id)?;
            let mut stmt = conn.prepare(
                "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([chat_id], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Every chat the user is in, most recently active first. Chats without
    /// messages come last, newest chat first.
    pub fn chats_for_user(&self, user_id: UserId) -> Result<Vec<ChatSummary>> {
        self.with_conn(|conn| {
            require_user(conn, user_id)?;

            let mut stmt = conn.prepare(
                "SELECT c.id, c.created_at, lm.content, lm.created_at, lm.user_id, lu.username
                 FROM chat_participants cp
                 JOIN chats c ON c.id = cp.chat_id
                 LEFT JOIN messages lm ON lm.id = (
                     SELECT m.id FROM messages m
                     WHERE m.chat_id = c.id
                     ORDER BY m.seq DESC
                     LIMIT 1
                 )
                 LEFT JOIN users lu ON lu.id = lm.user_id
                 WHERE cp.user_id = ?1
                 ORDER BY lm.id IS NULL, lm.id DESC, c.id DESC",
            )?;

            let mut summaries = stmt
                .query_map([user_id], |row| {
                    let content: Option<String> = row.get(2)?;
                    let last_message = match content {
                        Some(content) => Some(LastMessage {
                            content,
                            created_at: row.get::<_, DateTime<Utc>>(3)?,
                            user_id: row.get(4)?,
                            username: row.get(5)?,
                        }),
                        None => None,
                    };
                    Ok(ChatSummary {
                        chat_id: row.get(0)?,
                        chat_created_at: row.get(1)?,
                        last_message,
                        participants: Vec::new(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Participants for all of the user's chats in one query (no N+1)
            let mut stmt = conn.prepare(
                "SELECT cp.chat_id, u.id, u.username, u.email
                 FROM chat_participants cp
                 JOIN users u ON u.id = cp.user_id
                 WHERE cp.chat_id IN (SELECT chat_id FROM chat_participants WHERE user_id = ?1)
                 ORDER BY cp.chat_id, u.id",
            )?;
            let mut by_chat: HashMap<ChatId, Vec<User>> = HashMap::new();
            let rows = stmt.query_map([user_id], |row| {
                Ok((
                    row.get::<_, ChatId>(0)?,
                    User {
                        id: row.get(1)?,
                        username: row.get(2)?,
                        email: row.get(3)?,
                    },
                ))
            })?;
            for row in rows {
                let (chat_id, user) = row?;
                by_chat.entry(chat_id).or_default().push(user);
            }

            for summary in &mut summaries {
                summary.participants = by_chat.remove(&summary.chat_id).unwrap_or_default();
            }
            Ok(summaries)
        })
    }
}

fn distinct_pair(a: UserId, b: UserId) -> Result<ChatPair> {
    ChatPair::new(a, b)
        .ok_or_else(|| StoreError::Validation("a chat needs two distinct users".into()))
}

/// Lowest-id chat whose participant set is exactly the pair.
fn find_pair_chat(conn: &Connection, pair: ChatPair) -> Result<Option<ChatId>> {
    let id = conn
        .query_row(
            "SELECT c.id FROM chats c
             JOIN chat_participants p1 ON p1.chat_id = c.id AND p1.user_id = ?1
             JOIN chat_participants p2 ON p2.chat_id = c.id AND p2.user_id = ?2
             WHERE (SELECT COUNT(*) FROM chat_participants p WHERE p.chat_id = c.id) = 2
             ORDER BY c.id
             LIMIT 1",
            [pair.low(), pair.high()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

fn insert_participants(conn: &Connection, chat_id: ChatId, pair: ChatPair) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2), (?1, ?3)",
        [chat_id, pair.low(), pair.high()],
    )?;
    Ok(())
}

pub(crate) fn require_chat(conn: &Connection, id: ChatId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
        [id],
        |r| r.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("chat {id}")))
    }
}
