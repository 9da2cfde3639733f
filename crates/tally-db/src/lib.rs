//! # tally-db
//!
//! SQLite ledger store: one table family per entity, schema migrations kept
//! as data, and an async [`Database`] facade that runs every statement on a
//! single worker thread.
//!
//! ## Schema
//!
//! - WAL mode, foreign keys enforced
//! - Timestamps are Unix epoch seconds (u64), bound as integers
//! - Status, step and type columns hold the `i32` value of a `tally-types` enum
//! - Schema version stored in `PRAGMA user_version`

pub mod database;
pub mod filter;
pub mod migrations;
pub mod tables;

use std::path::Path;

use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row};
use tally_types::{Timestamp, UnknownVariant};

pub use database::Database;
pub use filter::QueryFilter;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 38;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database worker stopped")]
    Closed,
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(column, _, inner) => {
                DbError::Serialization(format!("column {column}: {inner}"))
            }
            other => DbError::Sqlite(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the ledger database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

/// Decode an integer column into a `tally-types` enum.
pub(crate) fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: TryFrom<i32, Error = UnknownVariant>,
{
    let raw: i32 = row.get(idx)?;
    T::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// Read a timestamp column.
///
/// Rows written by old schema versions may hold NULL, a float or a decimal
/// string; all of these decode, anything unparseable reads as 0.
pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let value = match row.get::<_, Value>(idx)? {
        Value::Integer(i) => i,
        Value::Real(f) => f as i64,
        Value::Text(s) => s.trim().parse::<i64>().unwrap_or(0),
        Value::Null | Value::Blob(_) => 0,
    };
    Ok(value.max(0) as Timestamp)
}

/// Read a nullable text column, NULL as empty.
pub(crate) fn text_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

/// Reject an empty key before it reaches SQL.
pub(crate) fn require(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DbError::Constraint(format!("{what} is empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_open_file_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.db");
        drop(open(&path).expect("create"));
        let conn = open(&path).expect("reopen");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_timestamp_column_accepts_legacy_values() {
        let conn = Connection::open_in_memory().expect("open");
        let read = |sql: &str| -> Timestamp {
            conn.query_row(sql, [], |row| timestamp_column(row, 0))
                .expect("query")
        };
        assert_eq!(read("SELECT 1700000000"), 1_700_000_000);
        assert_eq!(read("SELECT 1700000000.75"), 1_700_000_000);
        assert_eq!(read("SELECT '1700000000'"), 1_700_000_000);
        assert_eq!(read("SELECT NULL"), 0);
        assert_eq!(read("SELECT 'garbage'"), 0);
        assert_eq!(read("SELECT -5"), 0);
    }

    #[test]
    fn test_unknown_enum_is_serialization_error() {
        let conn = Connection::open_in_memory().expect("open");
        let result: Result<tally_types::promotion::PromotionStatus> = conn
            .query_row("SELECT 99", [], |row| enum_column(row, 0))
            .map_err(DbError::from);
        assert!(matches!(result, Err(DbError::Serialization(_))));
    }
}
