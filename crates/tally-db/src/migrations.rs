//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Each table module lists
//! its own steps as [`Migration`] data; the driver merges them, orders them by
//! version and applies one transaction per version. Migrations are
//! forward-only.
//!
//! A fresh database skips the history and is created from the current
//! `create_table` statements.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::{tables, DbError, Result, SCHEMA_VERSION};

/// One schema change of one table.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub table: &'static str,
    pub sql: &'static str,
}

/// Every step of every table, ordered by version.
///
/// Steps sharing a version keep the table registry order.
pub fn all() -> Vec<&'static Migration> {
    let mut steps: Vec<&'static Migration> = tables::MIGRATIONS
        .iter()
        .flat_map(|table| table.iter())
        .collect();
    steps.sort_by_key(|step| step.version);
    steps
}

pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version = current_version(conn)?;

    if current_version == 0 {
        info!("Initializing database schema v{SCHEMA_VERSION}");
        create_current_schema(conn)?;
    } else if current_version < SCHEMA_VERSION {
        migrate_to(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

fn create_current_schema(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for create_table in tables::CREATE_TABLES {
        create_table(&*tx)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Apply every step with a version in `(current, target]`.
///
/// Table rebuilds rename the old table away and copy rows back, so
/// foreign-key enforcement is suspended and `legacy_alter_table` keeps
/// renames from rewriting references in other tables. Both pragmas are
/// restored afterwards.
pub fn migrate_to(conn: &Connection, target: u32) -> Result<()> {
    if target > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Target version {target} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    let current_version = current_version(conn)?;
    if current_version >= target {
        return Ok(());
    }

    let foreign_keys: bool =
        conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = OFF; PRAGMA legacy_alter_table = ON;")?;

    let result = apply(conn, current_version, target);

    conn.execute_batch("PRAGMA legacy_alter_table = OFF;")?;
    conn.pragma_update(None, "foreign_keys", foreign_keys)?;
    result
}

fn apply(conn: &Connection, from: u32, target: u32) -> Result<()> {
    let steps = all();
    for version in (from + 1)..=target {
        info!("Running migration to v{version}");
        let tx = conn.unchecked_transaction()?;
        for step in steps.iter().filter(|step| step.version == version) {
            debug!(version, table = step.table, "Applying migration step");
            tx.execute_batch(step.sql).map_err(|e| {
                DbError::Migration(format!("v{version} ({}): {e}", step.table))
            })?;
        }
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}
