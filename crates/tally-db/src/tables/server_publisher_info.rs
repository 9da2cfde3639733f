//! Server-provided publisher verification state (`server_publisher_info`).

use rusqlite::{Connection, OptionalExtension};
use tally_types::publisher::ServerPublisherInfo;

use crate::migrations::Migration;
use crate::{enum_column, require, timestamp_column, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 7,
        table: "server_publisher_info",
        sql: "CREATE TABLE server_publisher_info (
                publisher_key LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
                status INTEGER DEFAULT 0 NOT NULL,
                excluded INTEGER DEFAULT 0 NOT NULL,
                address TEXT NOT NULL
              );
              CREATE INDEX server_publisher_info_publisher_key_index
                ON server_publisher_info (publisher_key);",
    },
    Migration {
        version: 28,
        table: "server_publisher_info",
        sql: "DELETE FROM server_publisher_info
              WHERE status = 0 OR publisher_key NOT IN (
                SELECT publisher_id FROM publisher_info
              );
              ALTER TABLE server_publisher_info RENAME TO server_publisher_info_temp;
              CREATE TABLE server_publisher_info (
                publisher_key LONGVARCHAR PRIMARY KEY NOT NULL,
                status INTEGER DEFAULT 0 NOT NULL,
                address TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
              );
              INSERT OR IGNORE INTO server_publisher_info
                (publisher_key, status, address, updated_at)
              SELECT publisher_key, status, address, 0
              FROM server_publisher_info_temp;
              DROP TABLE IF EXISTS server_publisher_info_temp;",
    },
    // Status 1 was retired; it now reads as not verified.
    Migration {
        version: 36,
        table: "server_publisher_info",
        sql: "UPDATE server_publisher_info SET status = 0 WHERE status = 1;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS server_publisher_info (
            publisher_key LONGVARCHAR PRIMARY KEY NOT NULL,
            status INTEGER DEFAULT 0 NOT NULL,
            address TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );",
    )?;
    Ok(())
}

pub fn save_server_publisher_info(conn: &Connection, info: &ServerPublisherInfo) -> Result<()> {
    require(&info.publisher_key, "publisher key")?;
    conn.execute(
        "INSERT OR REPLACE INTO server_publisher_info (publisher_key, status, address, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            info.publisher_key,
            info.status.as_i32(),
            info.address,
            info.updated_at as i64,
        ],
    )?;
    Ok(())
}

pub fn get_server_publisher_info(
    conn: &Connection,
    publisher_key: &str,
) -> Result<Option<ServerPublisherInfo>> {
    let info = conn
        .query_row(
            "SELECT publisher_key, status, address, updated_at
             FROM server_publisher_info WHERE publisher_key = ?1",
            [publisher_key],
            |row| {
                Ok(ServerPublisherInfo {
                    publisher_key: row.get(0)?,
                    status: enum_column(row, 1)?,
                    address: row.get(2)?,
                    updated_at: timestamp_column(row, 3)?,
                })
            },
        )
        .optional()?;
    Ok(info)
}

/// Drop entries last refreshed before `cutoff`. Returns the number removed.
pub fn delete_expired_server_publisher_info(conn: &Connection, cutoff: u64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM server_publisher_info WHERE updated_at < ?1",
        [cutoff as i64],
    )?;
    Ok(deleted)
}
