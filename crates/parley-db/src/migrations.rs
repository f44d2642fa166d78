use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        // Dropped without commit on error, which rolls the batch back
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            -- pair_key is '{low}:{high}' for resolved chats, NULL for chats
            -- created through the unconditional path.
            CREATE TABLE chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_key    TEXT UNIQUE,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE chat_participants (
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                user_id     INTEGER NOT NULL REFERENCES users(id),
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON chat_participants(user_id);

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                user_id     INTEGER NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL,
                seq         INTEGER NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(chat_id, seq)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}
