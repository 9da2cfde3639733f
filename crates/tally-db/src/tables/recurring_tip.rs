//! Monthly recurring tips (`recurring_donation`).

use rusqlite::Connection;
use tally_types::contribution::RecurringTip;

use crate::filter::placeholders;
use crate::migrations::Migration;
use crate::{require, timestamp_column, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        table: "recurring_donation",
        sql: "CREATE TABLE recurring_donation (
                publisher_id LONGVARCHAR NOT NULL PRIMARY KEY UNIQUE,
                amount DOUBLE DEFAULT 0 NOT NULL,
                added_date INTEGER DEFAULT 0 NOT NULL,
                CONSTRAINT fk_recurring_donation_publisher_id
                  FOREIGN KEY (publisher_id)
                  REFERENCES publisher_info (publisher_id)
                  ON DELETE CASCADE
              );
              CREATE INDEX recurring_donation_publisher_id_index
                ON recurring_donation (publisher_id);",
    },
    Migration {
        version: 15,
        table: "recurring_donation",
        sql: "ALTER TABLE recurring_donation RENAME TO recurring_donation_temp;
              DROP INDEX IF EXISTS recurring_donation_publisher_id_index;
              CREATE TABLE recurring_donation (
                publisher_id LONGVARCHAR NOT NULL PRIMARY KEY UNIQUE,
                amount DOUBLE DEFAULT 0 NOT NULL,
                added_date INTEGER DEFAULT 0 NOT NULL
              );
              CREATE INDEX recurring_donation_publisher_id_index
                ON recurring_donation (publisher_id);
              INSERT INTO recurring_donation (added_date, amount, publisher_id)
              SELECT added_date, amount, publisher_id FROM recurring_donation_temp;
              DROP TABLE recurring_donation_temp;",
    },
    Migration {
        version: 38,
        table: "recurring_donation",
        sql: "ALTER TABLE recurring_donation ADD COLUMN next_contribution_at TIMESTAMP;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS recurring_donation (
            publisher_id LONGVARCHAR NOT NULL PRIMARY KEY UNIQUE,
            amount DOUBLE DEFAULT 0 NOT NULL,
            added_date INTEGER DEFAULT 0 NOT NULL,
            next_contribution_at TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS recurring_donation_publisher_id_index
          ON recurring_donation (publisher_id);",
    )?;
    Ok(())
}

/// Insert or replace the tip for `tip.publisher_key`.
pub fn save_recurring_tip(conn: &Connection, tip: &RecurringTip) -> Result<()> {
    require(&tip.publisher_key, "publisher key")?;
    conn.execute(
        "INSERT OR REPLACE INTO recurring_donation
           (publisher_id, amount, added_date, next_contribution_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            tip.publisher_key,
            tip.amount,
            tip.created_at as i64,
            tip.next_contribution_at as i64,
        ],
    )?;
    Ok(())
}

pub fn get_recurring_tips(conn: &Connection) -> Result<Vec<RecurringTip>> {
    let mut stmt = conn.prepare(
        "SELECT publisher_id, amount, added_date, next_contribution_at
         FROM recurring_donation ORDER BY added_date, publisher_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RecurringTip {
                publisher_key: row.get(0)?,
                amount: row.get(1)?,
                created_at: timestamp_column(row, 2)?,
                next_contribution_at: timestamp_column(row, 3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns whether a tip was removed.
pub fn remove_recurring_tip(conn: &Connection, publisher_key: &str) -> Result<bool> {
    require(publisher_key, "publisher key")?;
    let removed = conn.execute(
        "DELETE FROM recurring_donation WHERE publisher_id = ?1",
        [publisher_key],
    )?;
    Ok(removed > 0)
}

/// Set the next contribution time of every listed tip.
pub fn advance_monthly_contribution_dates(
    conn: &Connection,
    publisher_keys: &[String],
    next: u64,
) -> Result<usize> {
    if publisher_keys.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE recurring_donation SET next_contribution_at = ?
         WHERE publisher_id IN ({})",
        placeholders(publisher_keys.len())
    );
    let mut params: Vec<rusqlite::types::Value> = vec![(next as i64).into()];
    params.extend(publisher_keys.iter().cloned().map(Into::into));
    let updated = conn.execute(&sql, rusqlite::params_from_iter(params))?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn tip(key: &str, amount: f64, created_at: u64) -> RecurringTip {
        RecurringTip {
            publisher_key: key.into(),
            amount,
            created_at,
            next_contribution_at: created_at + 100,
        }
    }

    #[test]
    fn test_save_list_remove() {
        let conn = test_db();
        save_recurring_tip(&conn, &tip("b.com", 5.0, 2)).expect("save b");
        save_recurring_tip(&conn, &tip("a.com", 1.0, 1)).expect("save a");
        save_recurring_tip(&conn, &tip("a.com", 10.0, 1)).expect("replace a");

        let tips = get_recurring_tips(&conn).expect("list");
        assert_eq!(tips, vec![tip("a.com", 10.0, 1), tip("b.com", 5.0, 2)]);

        assert!(remove_recurring_tip(&conn, "a.com").expect("remove"));
        assert!(!remove_recurring_tip(&conn, "a.com").expect("remove again"));
        assert_eq!(get_recurring_tips(&conn).expect("list").len(), 1);
    }

    #[test]
    fn test_advance_dates() {
        let conn = test_db();
        for key in ["a.com", "b.com", "c.com"] {
            save_recurring_tip(&conn, &tip(key, 1.0, 1)).expect("save");
        }
        let updated = advance_monthly_contribution_dates(
            &conn,
            &["a.com".to_string(), "c.com".to_string()],
            5000,
        )
        .expect("advance");
        assert_eq!(updated, 2);
        assert_eq!(
            advance_monthly_contribution_dates(&conn, &[], 1).expect("no-op"),
            0
        );

        let next: Vec<u64> = get_recurring_tips(&conn)
            .expect("list")
            .into_iter()
            .map(|t| t.next_contribution_at)
            .collect();
        assert_eq!(next, vec![5000, 101, 5000]);
    }
}
