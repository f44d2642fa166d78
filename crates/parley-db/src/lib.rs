pub mod chats;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub use error::{Result, StoreError};

const READER_POOL_SIZE: usize = 4;

/// Upper bound on message content unless configured otherwise.
pub const DEFAULT_MAX_CONTENT_LEN: usize = 4096;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum message content length in bytes.
    pub max_content_len: usize,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Budget for a whole write call, lock waits included. A transaction
    /// that is still open when it runs out is rolled back, never committed.
    pub write_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
            busy_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite store with one writer and a small pool of read-only connections.
///
/// Every mutation (chat creation, message append, registration) goes
/// through the single writer, which makes it the serialization point for
/// resolve-or-create. WAL mode lets readers see committed rows only.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    options: StoreOptions,
}

impl Database {
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        let writer = Connection::open(path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(options.busy_timeout)?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(options.busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            options,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("reader lock poisoned: {e}")))?;
        f(&conn)
    }

    /// Run `f` on the writer. The deadline starts now, so time spent
    /// queued behind other writers counts against it.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, WriteDeadline) -> Result<T>,
    {
        let deadline = WriteDeadline(Instant::now() + self.options.write_timeout);
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("writer lock poisoned: {e}")))?;
        deadline.check()?;
        f(&mut conn, deadline)
    }
}

/// Instant after which a write must give up instead of committing.
#[derive(Debug, Clone, Copy)]
pub struct WriteDeadline(Instant);

impl WriteDeadline {
    fn check(&self) -> Result<()> {
        if Instant::now() > self.0 {
            warn!("Write deadline passed, abandoning transaction");
            return Err(StoreError::Unavailable("write timed out".into()));
        }
        Ok(())
    }

    /// Commit `tx` if the deadline still holds. Otherwise `tx` is dropped,
    /// which rolls it back.
    pub fn commit(self, tx: Transaction<'_>) -> Result<()> {
        self.check()?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parley_types::models::User;
    use tempfile::TempDir;

    /// The TempDir must outlive the Database.
    pub fn open_temp() -> (TempDir, Database) {
        open_temp_with(StoreOptions::default())
    }

    pub fn open_temp_with(options: StoreOptions) -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db"), options).unwrap();
        (dir, db)
    }

    pub fn seed_user(db: &Database, name: &str) -> User {
        db.create_user(name, &format!("{name}@example.com"), "hash")
            .unwrap()
    }
}
