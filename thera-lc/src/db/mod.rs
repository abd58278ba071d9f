//! Database helpers shared by the lifecycle managers

pub mod retry;

pub use retry::retry_on_lock;

/// True when a sqlx error is a UNIQUE constraint violation on the named index
///
/// SQLite reports partial unique index violations with the indexed columns,
/// so callers pass the column list they expect in the message.
pub fn is_unique_violation_on(err: &sqlx::Error, columns: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.message().contains(columns)
        }
        _ => false,
    }
}
