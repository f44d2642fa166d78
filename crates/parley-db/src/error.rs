use rusqlite::ErrorCode;
use thiserror::Error;

/// Storage-level failure classification.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input rejected before touching storage (self-chat, empty content, ...)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown chat or user
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was hit
    #[error("conflict: {0}")]
    Conflict(String),

    /// SQLite failed, timed out or a lock was poisoned
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::Conflict(e.to_string()),
            _ => Self::Unavailable(e.to_string()),
        }
    }
}
