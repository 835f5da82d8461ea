pub mod sqlite;
pub mod repository;

pub use sqlite::*;
pub use repository::*;

use chrono::{NaiveDateTime, Timelike};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),
}

/// Timestamp layout used for every stored instant (UTC, millisecond
/// precision, fixed width so lexical order equals chronological order).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Truncate to the millisecond precision of [`TIMESTAMP_FORMAT`], so a
/// value reads back from the store unchanged.
pub fn to_stored_precision(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(ts.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(ts)
}

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("Invalid timestamp '{s}': {e}")))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<NaiveDateTime>, DatabaseError> {
    s.as_deref().map(parse_ts).transpose()
}

pub fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, DatabaseError> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Decode a JSON array of ids (member lists, acknowledger sets).
pub fn parse_uuid_list(json: &str) -> Result<Vec<Uuid>, DatabaseError> {
    serde_json::from_str(json)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("Invalid id list: {e}")))
}

pub fn uuid_list_json(ids: &[Uuid]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}
