//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a UUID read back from a TEXT column
pub fn from_db(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidInput(format!("Bad id '{}': {}", value, e)))
}

/// Parse an optional UUID column
pub fn from_db_opt(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(from_db).transpose()
}
