//! Common error types for Thera

use thiserror::Error;

/// Common result type for Thera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Thera services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored value could not be decoded
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite refused the operation because another connection holds the lock
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => is_sqlite_busy(db_err),
            _ => false,
        }
    }
}

/// Detect SQLITE_BUSY / SQLITE_LOCKED (including extended codes) on a sqlx error
pub fn is_sqlite_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let code_busy = db_err
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| matches!(c & 0xff, 5 | 6))
                .unwrap_or(false);
            code_busy || db_err.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
