use std::str::FromStr;

use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Parse an optional UUID column.
pub fn parse_optional_uuid(s: Option<String>) -> DbResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Parse a text enum column via its `FromStr` impl.
pub fn parse_enum<T: FromStr<Err = String>>(s: &str) -> DbResult<T> {
    s.parse()
        .map_err(|e: String| DbError::Internal(format!("Invalid value in database: {}", e)))
}

/// Parse a JSON text column.
pub fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> DbResult<T> {
    Ok(serde_json::from_str(s)?)
}

/// Map a unique-constraint violation to `Conflict` with the given message.
pub fn conflict_on_unique(e: sqlx::Error, message: impl FnOnce() -> String) -> DbError {
    match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::Conflict(message())
        }
        _ => DbError::from(e),
    }
}
