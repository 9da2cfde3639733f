//! Append-only diagnostic key/value log (`event_log`).

use std::collections::BTreeMap;

use rand::RngCore;
use rusqlite::Connection;
use tally_types::report::EventLog;
use tally_types::Timestamp;

use crate::migrations::Migration;
use crate::{require, timestamp_column, Result};

/// Number of entries returned by [`get_last_event_logs`].
pub const LAST_EVENT_LOGS_LIMIT: usize = 2000;

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 29,
    table: "event_log",
    sql: "DROP TABLE IF EXISTS event_log;
          CREATE TABLE event_log (
            event_log_id LONGVARCHAR PRIMARY KEY NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
          );",
}];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS event_log (
            event_log_id LONGVARCHAR PRIMARY KEY NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );",
    )?;
    Ok(())
}

fn new_event_log_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn insert(conn: &Connection, key: &str, value: &str, created_at: Timestamp) -> Result<String> {
    require(key, "event key")?;
    let id = new_event_log_id();
    conn.execute(
        "INSERT INTO event_log (event_log_id, key, value, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, key, value, created_at as i64],
    )?;
    Ok(id)
}

/// Append one entry. Returns its generated id.
pub fn save_event_log(conn: &Connection, key: &str, value: &str, created_at: Timestamp) -> Result<String> {
    insert(conn, key, value, created_at)
}

/// Append several entries sharing one timestamp, atomically.
pub fn save_event_logs(
    conn: &Connection,
    records: &BTreeMap<String, String>,
    created_at: Timestamp,
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    for (key, value) in records {
        insert(&tx, key, value, created_at)?;
    }
    tx.commit()?;
    Ok(records.len())
}

/// The most recent entries, newest first.
pub fn get_last_event_logs(conn: &Connection) -> Result<Vec<EventLog>> {
    let mut stmt = conn.prepare(
        "SELECT event_log_id, key, value, created_at FROM event_log
         ORDER BY created_at DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([LAST_EVENT_LOGS_LIMIT as i64], |row| {
            Ok(EventLog {
                event_log_id: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
                created_at: timestamp_column(row, 3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_save_and_read_newest_first() {
        let conn = test_db();
        let first = save_event_log(&conn, "wallet", "created", 100).expect("save");
        let second = save_event_log(&conn, "wallet", "linked", 200).expect("save");
        assert_eq!(first.len(), 32);
        assert_ne!(first, second);

        let logs = get_last_event_logs(&conn).expect("get");
        assert_eq!(logs.len(), 2);
        assert_eq!((logs[0].value.as_str(), logs[0].created_at), ("linked", 200));
        assert_eq!(logs[1].event_log_id, first);
    }

    #[test]
    fn test_save_many() {
        let conn = test_db();
        let records = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert_eq!(save_event_logs(&conn, &records, 50).expect("save"), 2);
        assert_eq!(save_event_logs(&conn, &BTreeMap::new(), 50).expect("save"), 0);
        assert_eq!(get_last_event_logs(&conn).expect("get").len(), 2);
    }

    #[test]
    fn test_empty_key_rolls_back_batch() {
        let conn = test_db();
        let records = BTreeMap::from([
            (String::new(), "bad".to_string()),
            ("good".to_string(), "1".to_string()),
        ]);
        assert!(save_event_logs(&conn, &records, 50).is_err());
        assert!(get_last_event_logs(&conn).expect("get").is_empty());
    }

    #[test]
    fn test_read_is_capped() {
        let conn = test_db();
        let records: BTreeMap<String, String> = (0..LAST_EVENT_LOGS_LIMIT + 5)
            .map(|i| (format!("key-{i}"), i.to_string()))
            .collect();
        save_event_logs(&conn, &records, 1).expect("save");
        assert_eq!(get_last_event_logs(&conn).expect("get").len(), LAST_EVENT_LOGS_LIMIT);
    }
}
