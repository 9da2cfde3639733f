//! Contributions waiting to be processed (`contribution_queue`,
//! `contribution_queue_publishers`).

use rusqlite::{Connection, OptionalExtension};
use tally_types::contribution::{ContributionQueue, ContributionQueuePublisher};

use crate::migrations::Migration;
use crate::{enum_column, require, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 9,
        table: "contribution_queue",
        sql: "CREATE TABLE contribution_queue (
                contribution_queue_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                type INTEGER NOT NULL,
                amount DOUBLE NOT NULL,
                partial INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
              );
              CREATE TABLE contribution_queue_publishers (
                contribution_queue_id INTEGER NOT NULL,
                publisher_key TEXT NOT NULL,
                amount_percent DOUBLE NOT NULL,
                CONSTRAINT fk_contribution_queue_publishers_publisher_key
                  FOREIGN KEY (publisher_key)
                  REFERENCES publisher_info (publisher_id),
                CONSTRAINT fk_contribution_queue_publishers_id
                  FOREIGN KEY (contribution_queue_id)
                  REFERENCES contribution_queue (contribution_queue_id)
                  ON DELETE CASCADE
              );",
    },
    Migration {
        version: 15,
        table: "contribution_queue_publishers",
        sql: "ALTER TABLE contribution_queue_publishers
                RENAME TO contribution_queue_publishers_temp;
              CREATE TABLE contribution_queue_publishers (
                contribution_queue_id INTEGER NOT NULL,
                publisher_key TEXT NOT NULL,
                amount_percent DOUBLE NOT NULL
              );
              CREATE INDEX contribution_queue_publishers_contribution_queue_id_index
                ON contribution_queue_publishers (contribution_queue_id);
              CREATE INDEX contribution_queue_publishers_publisher_key_index
                ON contribution_queue_publishers (publisher_key);
              INSERT INTO contribution_queue_publishers (amount_percent,
                contribution_queue_id, publisher_key)
              SELECT amount_percent, contribution_queue_id, publisher_key
              FROM contribution_queue_publishers_temp;
              DROP TABLE contribution_queue_publishers_temp;",
    },
    // Queue ids become client-generated strings.
    Migration {
        version: 23,
        table: "contribution_queue",
        sql: "ALTER TABLE contribution_queue RENAME TO contribution_queue_temp;
              CREATE TABLE contribution_queue (
                contribution_queue_id TEXT PRIMARY KEY NOT NULL,
                type INTEGER NOT NULL,
                amount DOUBLE NOT NULL,
                partial INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL
              );
              INSERT INTO contribution_queue (contribution_queue_id, type, amount,
                partial, created_at)
              SELECT CAST(contribution_queue_id AS TEXT), type, amount, partial, created_at
              FROM contribution_queue_temp;
              DROP TABLE IF EXISTS contribution_queue_temp;
              ALTER TABLE contribution_queue_publishers
                RENAME TO contribution_queue_publishers_temp;
              DROP INDEX IF EXISTS contribution_queue_publishers_contribution_queue_id_index;
              DROP INDEX IF EXISTS contribution_queue_publishers_publisher_key_index;
              CREATE TABLE contribution_queue_publishers (
                contribution_queue_id TEXT NOT NULL,
                publisher_key TEXT NOT NULL,
                amount_percent DOUBLE NOT NULL
              );
              CREATE INDEX contribution_queue_publishers_contribution_queue_id_index
                ON contribution_queue_publishers (contribution_queue_id);
              CREATE INDEX contribution_queue_publishers_publisher_key_index
                ON contribution_queue_publishers (publisher_key);
              INSERT INTO contribution_queue_publishers (contribution_queue_id,
                publisher_key, amount_percent)
              SELECT CAST(contribution_queue_id AS TEXT), publisher_key, amount_percent
              FROM contribution_queue_publishers_temp;
              DROP TABLE IF EXISTS contribution_queue_publishers_temp;",
    },
    Migration {
        version: 24,
        table: "contribution_queue",
        sql: "ALTER TABLE contribution_queue ADD completed_at TIMESTAMP NOT NULL DEFAULT 0;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contribution_queue (
            contribution_queue_id TEXT PRIMARY KEY NOT NULL,
            type INTEGER NOT NULL,
            amount DOUBLE NOT NULL,
            partial INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL,
            completed_at TIMESTAMP NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS contribution_queue_publishers (
            contribution_queue_id TEXT NOT NULL,
            publisher_key TEXT NOT NULL,
            amount_percent DOUBLE NOT NULL
        );
        CREATE INDEX IF NOT EXISTS contribution_queue_publishers_contribution_queue_id_index
          ON contribution_queue_publishers (contribution_queue_id);
        CREATE INDEX IF NOT EXISTS contribution_queue_publishers_publisher_key_index
          ON contribution_queue_publishers (publisher_key);",
    )?;
    Ok(())
}

/// Insert or replace a queue entry and its publisher split.
pub fn save_contribution_queue(conn: &Connection, queue: &ContributionQueue) -> Result<()> {
    require(&queue.id, "contribution queue id")?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO contribution_queue
           (contribution_queue_id, type, amount, partial, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            queue.id,
            queue.queue_type.as_i32(),
            queue.amount,
            queue.partial,
            queue.created_at as i64,
            queue.completed_at as i64,
        ],
    )?;
    tx.execute(
        "DELETE FROM contribution_queue_publishers WHERE contribution_queue_id = ?1",
        [&queue.id],
    )?;
    for publisher in &queue.publishers {
        tx.execute(
            "INSERT INTO contribution_queue_publishers
               (contribution_queue_id, publisher_key, amount_percent)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![queue.id, publisher.publisher_key, publisher.amount_percent],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Oldest entry that has not been completed.
pub fn get_first_contribution_queue(conn: &Connection) -> Result<Option<ContributionQueue>> {
    let queue = conn
        .query_row(
            "SELECT contribution_queue_id, type, amount, partial, created_at, completed_at
             FROM contribution_queue
             WHERE completed_at = 0
             ORDER BY created_at ASC, rowid ASC
             LIMIT 1",
            [],
            |row| {
                Ok(ContributionQueue {
                    id: row.get(0)?,
                    queue_type: enum_column(row, 1)?,
                    amount: row.get(2)?,
                    partial: row.get(3)?,
                    created_at: timestamp_column(row, 4)?,
                    completed_at: timestamp_column(row, 5)?,
                    publishers: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut queue) = queue else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT publisher_key, amount_percent FROM contribution_queue_publishers
         WHERE contribution_queue_id = ?1",
    )?;
    queue.publishers = stmt
        .query_map([&queue.id], |row| {
            Ok(ContributionQueuePublisher {
                publisher_key: row.get(0)?,
                amount_percent: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(queue))
}

pub fn mark_contribution_queue_as_complete(
    conn: &Connection,
    id: &str,
    completed_at: u64,
) -> Result<()> {
    require(id, "contribution queue id")?;
    let updated = conn.execute(
        "UPDATE contribution_queue SET completed_at = ?1 WHERE contribution_queue_id = ?2",
        rusqlite::params![completed_at.max(1) as i64, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("contribution queue {id}")));
    }
    Ok(())
}
