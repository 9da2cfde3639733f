//! Contributions and their per-publisher splits (`contribution_info`,
//! `contribution_info_publishers`).

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::contribution::{
    ContributionInfo, ContributionPublisher, ContributionStep, RewardsType,
};

use crate::migrations::Migration;
use crate::{enum_column, require, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        table: "contribution_info",
        sql: "CREATE TABLE contribution_info (
                publisher_id LONGVARCHAR,
                probi TEXT '0' NOT NULL,
                date INTEGER NOT NULL,
                category INTEGER NOT NULL,
                month INTEGER NOT NULL,
                year INTEGER NOT NULL,
                CONSTRAINT fk_contribution_info_publisher_id
                  FOREIGN KEY (publisher_id)
                  REFERENCES publisher_info (publisher_id)
                  ON DELETE CASCADE
              );
              CREATE INDEX contribution_info_publisher_id_index
                ON contribution_info (publisher_id);",
    },
    Migration {
        version: 8,
        table: "contribution_info",
        sql: "ALTER TABLE contribution_info RENAME TO contribution_info_temp;
              DROP INDEX IF EXISTS contribution_info_publisher_id_index;
              CREATE TABLE contribution_info (
                publisher_id LONGVARCHAR,
                probi TEXT '0' NOT NULL,
                date INTEGER NOT NULL,
                type INTEGER NOT NULL,
                month INTEGER NOT NULL,
                year INTEGER NOT NULL,
                CONSTRAINT fk_contribution_info_publisher_id
                  FOREIGN KEY (publisher_id)
                  REFERENCES publisher_info (publisher_id)
                  ON DELETE CASCADE
              );
              CREATE INDEX contribution_info_publisher_id_index
                ON contribution_info (publisher_id);
              INSERT INTO contribution_info (type, date, month, probi, publisher_id, year)
              SELECT category, date, month, probi, publisher_id, year
              FROM contribution_info_temp;
              DROP TABLE contribution_info_temp;",
    },
    // Amounts were stored as 18-decimal fixed point strings.
    Migration {
        version: 11,
        table: "contribution_info",
        sql: "ALTER TABLE contribution_info RENAME TO contribution_info_temp;
              DROP INDEX IF EXISTS contribution_info_publisher_id_index;
              CREATE TABLE contribution_info (
                contribution_id TEXT NOT NULL,
                amount DOUBLE NOT NULL,
                type INTEGER NOT NULL,
                step INTEGER NOT NULL DEFAULT -1,
                retry_count INTEGER NOT NULL DEFAULT -1,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (contribution_id)
              );
              CREATE TABLE contribution_info_publishers (
                contribution_id TEXT NOT NULL,
                publisher_key TEXT NOT NULL,
                total_amount DOUBLE NOT NULL,
                contributed_amount DOUBLE,
                CONSTRAINT fk_contribution_info_publishers_contribution_id
                  FOREIGN KEY (contribution_id)
                  REFERENCES contribution_info (contribution_id)
                  ON DELETE CASCADE,
                CONSTRAINT fk_contribution_info_publishers_publisher_id
                  FOREIGN KEY (publisher_key)
                  REFERENCES publisher_info (publisher_id)
              );
              CREATE INDEX contribution_info_publishers_contribution_id_index
                ON contribution_info_publishers (contribution_id);
              CREATE INDEX contribution_info_publishers_publisher_key_index
                ON contribution_info_publishers (publisher_key);
              ALTER TABLE contribution_info_temp ADD contribution_id TEXT;
              ALTER TABLE contribution_info_temp ADD amount DOUBLE;
              UPDATE contribution_info_temp SET
                contribution_id = PRINTF('id_%s_%s', date, ABS(RANDOM())),
                amount = CAST(probi AS REAL) / 1e18;
              INSERT INTO contribution_info (contribution_id, amount, type, step,
                retry_count, created_at)
              SELECT contribution_id, amount, type, -1, -1, date
              FROM contribution_info_temp;
              INSERT INTO contribution_info_publishers (contribution_id, publisher_key,
                total_amount, contributed_amount)
              SELECT contribution_id, publisher_id, amount, amount
              FROM contribution_info_temp
              WHERE publisher_id IS NOT NULL AND publisher_id != '';
              DROP TABLE IF EXISTS contribution_info_temp;",
    },
    Migration {
        version: 15,
        table: "contribution_info_publishers",
        sql: "ALTER TABLE contribution_info_publishers
                RENAME TO contribution_info_publishers_temp;
              DROP INDEX IF EXISTS contribution_info_publishers_contribution_id_index;
              DROP INDEX IF EXISTS contribution_info_publishers_publisher_key_index;
              CREATE TABLE contribution_info_publishers (
                contribution_id TEXT NOT NULL,
                publisher_key TEXT NOT NULL,
                total_amount DOUBLE NOT NULL,
                contributed_amount DOUBLE
              );
              CREATE INDEX contribution_info_publishers_contribution_id_index
                ON contribution_info_publishers (contribution_id);
              CREATE INDEX contribution_info_publishers_publisher_key_index
                ON contribution_info_publishers (publisher_key);
              INSERT INTO contribution_info_publishers (contributed_amount,
                contribution_id, publisher_key, total_amount)
              SELECT contributed_amount, contribution_id, publisher_key, total_amount
              FROM contribution_info_publishers_temp;
              DROP TABLE contribution_info_publishers_temp;",
    },
    // Older rows stored `created_at` as a datetime string.
    Migration {
        version: 16,
        table: "contribution_info",
        sql: "UPDATE contribution_info SET created_at = (
                CASE WHEN datetime(created_at, 'unixepoch') IS NULL
                THEN strftime('%s', datetime(created_at))
                ELSE created_at END
              );",
    },
    Migration {
        version: 17,
        table: "contribution_info",
        sql: "ALTER TABLE contribution_info ADD processor INTEGER NOT NULL DEFAULT 1;",
    },
    Migration {
        version: 21,
        table: "contribution_info_publishers",
        sql: "ALTER TABLE contribution_info_publishers
                RENAME TO contribution_info_publishers_temp;
              DROP INDEX IF EXISTS contribution_info_publishers_contribution_id_index;
              DROP INDEX IF EXISTS contribution_info_publishers_publisher_key_index;
              CREATE TABLE contribution_info_publishers (
                contribution_id TEXT NOT NULL,
                publisher_key TEXT NOT NULL,
                total_amount DOUBLE NOT NULL,
                contributed_amount DOUBLE,
                CONSTRAINT contribution_info_publishers_unique
                  UNIQUE (contribution_id, publisher_key)
              );
              CREATE INDEX contribution_info_publishers_contribution_id_index
                ON contribution_info_publishers (contribution_id);
              CREATE INDEX contribution_info_publishers_publisher_key_index
                ON contribution_info_publishers (publisher_key);
              INSERT OR IGNORE INTO contribution_info_publishers (contribution_id,
                publisher_key, total_amount, contributed_amount)
              SELECT contribution_id, publisher_key, total_amount, contributed_amount
              FROM contribution_info_publishers_temp;
              DROP TABLE IF EXISTS contribution_info_publishers_temp;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contribution_info (
            contribution_id TEXT NOT NULL,
            amount DOUBLE NOT NULL,
            type INTEGER NOT NULL,
            step INTEGER NOT NULL DEFAULT -1,
            retry_count INTEGER NOT NULL DEFAULT -1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            processor INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (contribution_id)
        );
        CREATE TABLE IF NOT EXISTS contribution_info_publishers (
            contribution_id TEXT NOT NULL,
            publisher_key TEXT NOT NULL,
            total_amount DOUBLE NOT NULL,
            contributed_amount DOUBLE,
            CONSTRAINT contribution_info_publishers_unique
              UNIQUE (contribution_id, publisher_key)
        );
        CREATE INDEX IF NOT EXISTS contribution_info_publishers_contribution_id_index
          ON contribution_info_publishers (contribution_id);
        CREATE INDEX IF NOT EXISTS contribution_info_publishers_publisher_key_index
          ON contribution_info_publishers (publisher_key);",
    )?;
    Ok(())
}

const SELECT_CONTRIBUTION: &str = "SELECT ci.contribution_id, ci.amount, ci.type, ci.step,
        ci.retry_count, ci.created_at, ci.processor
     FROM contribution_info AS ci";

/// `created_at` falls in the given calendar month (UTC).
const IN_MONTH: &str = "strftime('%m', datetime(ci.created_at, 'unixepoch')) = ?1
     AND strftime('%Y', datetime(ci.created_at, 'unixepoch')) = ?2";

fn contribution_row(row: &Row<'_>) -> rusqlite::Result<ContributionInfo> {
    Ok(ContributionInfo {
        contribution_id: row.get(0)?,
        amount: row.get(1)?,
        contribution_type: enum_column(row, 2)?,
        step: enum_column(row, 3)?,
        retry_count: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
        processor: enum_column(row, 6)?,
        publishers: Vec::new(),
    })
}

fn load_publishers(conn: &Connection, info: &mut ContributionInfo) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT contribution_id, publisher_key, total_amount, contributed_amount
         FROM contribution_info_publishers
         WHERE contribution_id = ?1 ORDER BY publisher_key",
    )?;
    info.publishers = stmt
        .query_map([&info.contribution_id], |row| {
            Ok(ContributionPublisher {
                contribution_id: row.get(0)?,
                publisher_key: row.get(1)?,
                total_amount: row.get(2)?,
                contributed_amount: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(())
}

fn query_contributions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ContributionInfo>> {
    let mut stmt = conn.prepare(sql)?;
    let mut list = stmt
        .query_map(params, contribution_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for info in &mut list {
        load_publishers(conn, info)?;
    }
    Ok(list)
}

/// Insert or update a contribution together with its publishers.
///
/// Updated in place so rows referencing the contribution stay valid.
pub fn save_contribution_info(conn: &Connection, info: &ContributionInfo) -> Result<()> {
    require(&info.contribution_id, "contribution id")?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO contribution_info
           (contribution_id, amount, type, step, retry_count, created_at, processor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (contribution_id) DO UPDATE SET amount = excluded.amount,
           type = excluded.type, step = excluded.step, retry_count = excluded.retry_count,
           created_at = excluded.created_at, processor = excluded.processor",
        rusqlite::params![
            info.contribution_id,
            info.amount,
            info.contribution_type.as_i32(),
            info.step.as_i32(),
            info.retry_count,
            info.created_at as i64,
            info.processor.as_i32(),
        ],
    )?;
    for publisher in &info.publishers {
        require(&publisher.publisher_key, "publisher key")?;
        tx.execute(
            "INSERT OR REPLACE INTO contribution_info_publishers
               (contribution_id, publisher_key, total_amount, contributed_amount)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                info.contribution_id,
                publisher.publisher_key,
                publisher.total_amount,
                publisher.contributed_amount,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_contribution_info(
    conn: &Connection,
    contribution_id: &str,
) -> Result<Option<ContributionInfo>> {
    let info = conn
        .query_row(
            &format!("{SELECT_CONTRIBUTION} WHERE ci.contribution_id = ?1"),
            [contribution_id],
            contribution_row,
        )
        .optional()?;
    match info {
        Some(mut info) => {
            load_publishers(conn, &mut info)?;
            Ok(Some(info))
        }
        None => Ok(None),
    }
}

/// Completed one-time tips made in `month` (1-12) of `year`.
pub fn get_one_time_tips(conn: &Connection, month: u32, year: u32) -> Result<Vec<ContributionInfo>> {
    query_contributions(
        conn,
        &format!("{SELECT_CONTRIBUTION} WHERE {IN_MONTH} AND ci.type = ?3 AND ci.step = ?4"),
        rusqlite::params![
            format!("{month:02}"),
            year.to_string(),
            RewardsType::OneTimeTip.as_i32(),
            ContributionStep::Completed.as_i32(),
        ],
    )
}

/// Every contribution made in `month` (1-12) of `year`, any type or step.
pub fn get_contribution_report(
    conn: &Connection,
    month: u32,
    year: u32,
) -> Result<Vec<ContributionInfo>> {
    query_contributions(
        conn,
        &format!("{SELECT_CONTRIBUTION} WHERE {IN_MONTH} ORDER BY ci.created_at"),
        rusqlite::params![format!("{month:02}"), year.to_string()],
    )
}

/// Contributions whose step is not terminal.
pub fn get_not_completed_contributions(conn: &Connection) -> Result<Vec<ContributionInfo>> {
    query_contributions(
        conn,
        &format!("{SELECT_CONTRIBUTION} WHERE ci.step >= 0 ORDER BY ci.created_at"),
        [],
    )
}

fn expect_updated(updated: usize, contribution_id: &str) -> Result<()> {
    if updated == 0 {
        return Err(DbError::NotFound(format!("contribution {contribution_id}")));
    }
    Ok(())
}

pub fn update_contribution_info_step(
    conn: &Connection,
    contribution_id: &str,
    step: ContributionStep,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE contribution_info SET step = ?1, retry_count = 0 WHERE contribution_id = ?2",
        rusqlite::params![step.as_i32(), contribution_id],
    )?;
    expect_updated(updated, contribution_id)
}

pub fn update_contribution_info_step_and_count(
    conn: &Connection,
    contribution_id: &str,
    step: ContributionStep,
    retry_count: i32,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE contribution_info SET step = ?1, retry_count = ?2 WHERE contribution_id = ?3",
        rusqlite::params![step.as_i32(), retry_count, contribution_id],
    )?;
    expect_updated(updated, contribution_id)
}

/// Mark one publisher's share of a contribution as fully paid.
pub fn update_contribution_info_contributed_amount(
    conn: &Connection,
    contribution_id: &str,
    publisher_key: &str,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE contribution_info_publishers SET contributed_amount = total_amount
         WHERE contribution_id = ?1 AND publisher_key = ?2",
        rusqlite::params![contribution_id, publisher_key],
    )?;
    expect_updated(updated, contribution_id)
}

/// Force every in-flight contribution to `Completed`. Returns the count.
pub fn finish_all_in_progress_contributions(conn: &Connection) -> Result<usize> {
    let finished = conn.execute(
        "UPDATE contribution_info SET step = ?1, retry_count = 0 WHERE step >= 0",
        [ContributionStep::Completed.as_i32()],
    )?;
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::contribution::ContributionProcessor;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    // 2024-03-15 and 2024-04-02, UTC.
    const MARCH: u64 = 1_710_460_800;
    const APRIL: u64 = 1_712_016_000;

    fn contribution(id: &str, kind: RewardsType, step: ContributionStep, at: u64) -> ContributionInfo {
        ContributionInfo {
            contribution_id: id.into(),
            amount: 5.0,
            contribution_type: kind,
            step,
            retry_count: 0,
            created_at: at,
            processor: ContributionProcessor::Uphold,
            publishers: vec![
                ContributionPublisher {
                    contribution_id: id.into(),
                    publisher_key: "a.com".into(),
                    total_amount: 2.0,
                    contributed_amount: 0.0,
                },
                ContributionPublisher {
                    contribution_id: id.into(),
                    publisher_key: "b.com".into(),
                    total_amount: 3.0,
                    contributed_amount: 0.0,
                },
            ],
        }
    }

    #[test]
    fn test_save_and_get() {
        let conn = test_db();
        let info = contribution("c1", RewardsType::OneTimeTip, ContributionStep::Start, MARCH);
        save_contribution_info(&conn, &info).expect("save");
        assert_eq!(get_contribution_info(&conn, "c1").expect("get"), Some(info));
        assert_eq!(get_contribution_info(&conn, "c2").expect("get"), None);
    }

    #[test]
    fn test_resave_does_not_duplicate_publishers() {
        let conn = test_db();
        let mut info = contribution("c1", RewardsType::OneTimeTip, ContributionStep::Start, MARCH);
        save_contribution_info(&conn, &info).expect("save");
        info.publishers[0].total_amount = 4.0;
        save_contribution_info(&conn, &info).expect("resave");

        let stored = get_contribution_info(&conn, "c1")
            .expect("get")
            .expect("present");
        assert_eq!(stored.publishers.len(), 2);
        assert_eq!(stored.publishers[0].total_amount, 4.0);
    }

    #[test]
    fn test_monthly_queries() {
        let conn = test_db();
        for info in [
            contribution("tip-march", RewardsType::OneTimeTip, ContributionStep::Completed, MARCH),
            contribution("tip-pending", RewardsType::OneTimeTip, ContributionStep::Reserve, MARCH),
            contribution("ac-march", RewardsType::AutoContribute, ContributionStep::Completed, MARCH),
            contribution("tip-april", RewardsType::OneTimeTip, ContributionStep::Completed, APRIL),
        ] {
            save_contribution_info(&conn, &info).expect("save");
        }

        let tips = get_one_time_tips(&conn, 3, 2024).expect("tips");
        assert_eq!(tips.len(), 1);
        assert_eq!(tips[0].contribution_id, "tip-march");
        assert_eq!(tips[0].publishers.len(), 2);

        let report = get_contribution_report(&conn, 3, 2024).expect("report");
        assert_eq!(report.len(), 3);
        assert!(get_contribution_report(&conn, 3, 2023).expect("report").is_empty());
    }

    #[test]
    fn test_step_updates_and_finish() {
        let conn = test_db();
        save_contribution_info(
            &conn,
            &contribution("c1", RewardsType::AutoContribute, ContributionStep::Start, MARCH),
        )
        .expect("save c1");
        save_contribution_info(
            &conn,
            &contribution("c2", RewardsType::AutoContribute, ContributionStep::Failed, MARCH),
        )
        .expect("save c2");

        update_contribution_info_step_and_count(&conn, "c1", ContributionStep::Reserve, 3)
            .expect("step and count");
        let c1 = get_contribution_info(&conn, "c1").expect("get").expect("present");
        assert_eq!((c1.step, c1.retry_count), (ContributionStep::Reserve, 3));

        update_contribution_info_step(&conn, "c1", ContributionStep::Creds).expect("step");
        let c1 = get_contribution_info(&conn, "c1").expect("get").expect("present");
        assert_eq!((c1.step, c1.retry_count), (ContributionStep::Creds, 0));

        assert!(matches!(
            update_contribution_info_step(&conn, "missing", ContributionStep::Creds),
            Err(DbError::NotFound(_))
        ));

        let pending = get_not_completed_contributions(&conn).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].contribution_id, "c1");

        assert_eq!(finish_all_in_progress_contributions(&conn).expect("finish"), 1);
        assert!(get_not_completed_contributions(&conn).expect("pending").is_empty());
    }

    #[test]
    fn test_contributed_amount() {
        let conn = test_db();
        save_contribution_info(
            &conn,
            &contribution("c1", RewardsType::RecurringTip, ContributionStep::Start, MARCH),
        )
        .expect("save");
        update_contribution_info_contributed_amount(&conn, "c1", "b.com").expect("update");

        let stored = get_contribution_info(&conn, "c1").expect("get").expect("present");
        assert_eq!(stored.publishers[0].contributed_amount, 0.0);
        assert_eq!(stored.publishers[1].contributed_amount, 3.0);
    }

    #[test]
    fn test_legacy_amounts_converted() {
        let conn = Connection::open_in_memory().expect("open");
        crate::migrations::migrate_to(&conn, 10).expect("migrate to v10");
        // Legacy rows name publishers that were never saved.
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO contribution_info (publisher_id, probi, date, type, month, year)
             VALUES ('a.com', '1000000000000000000', 1570614352, 8, 10, 2019),
                    ('', '10000000000000000000', 1574671381, 2, 11, 2019);",
        )
        .expect("seed v10 rows");
        crate::migrations::migrate_to(&conn, crate::SCHEMA_VERSION).expect("migrate");

        // Converted rows are completed.
        let tips = get_one_time_tips(&conn, 10, 2019).expect("tips");
        assert_eq!(tips.len(), 1);
        let report = get_contribution_report(&conn, 10, 2019).expect("report");
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].amount, 1.0);
        assert_eq!(report[0].created_at, 1_570_614_352);
        assert_eq!(report[0].processor, ContributionProcessor::Tokens);
        assert_eq!(report[0].publishers.len(), 1);
        assert_eq!(report[0].publishers[0].contributed_amount, 1.0);

        let report = get_contribution_report(&conn, 11, 2019).expect("report");
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].amount, 10.0);
        assert!(report[0].publishers.is_empty());
    }
}
