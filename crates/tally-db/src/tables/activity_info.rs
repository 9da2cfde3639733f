//! Per-reconcile-period attention records (`activity_info`).

use rusqlite::{Connection, Row};
use tally_types::publisher::{
    ActivityInfoFilter, ActivitySort, ExcludeFilter, PublisherExclude, PublisherInfo,
    PublisherStatus,
};

use crate::filter::{Op, QueryFilter};
use crate::migrations::Migration;
use crate::{enum_column, require, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        table: "activity_info",
        sql: "CREATE TABLE activity_info (
                publisher_id LONGVARCHAR NOT NULL,
                duration INTEGER DEFAULT 0 NOT NULL,
                score DOUBLE DEFAULT 0 NOT NULL,
                percent INTEGER DEFAULT 0 NOT NULL,
                weight DOUBLE DEFAULT 0 NOT NULL,
                category INTEGER NOT NULL,
                month INTEGER NOT NULL,
                year INTEGER NOT NULL,
                CONSTRAINT fk_activity_info_publisher_id
                  FOREIGN KEY (publisher_id)
                  REFERENCES publisher_info (publisher_id)
                  ON DELETE CASCADE
              );",
    },
    Migration {
        version: 2,
        table: "activity_info",
        sql: "ALTER TABLE activity_info ADD reconcile_stamp INTEGER DEFAULT 0 NOT NULL;",
    },
    Migration {
        version: 4,
        table: "activity_info",
        sql: "ALTER TABLE activity_info RENAME TO activity_info_temp;
              DROP INDEX IF EXISTS activity_info_publisher_id_index;
              CREATE TABLE activity_info (
                publisher_id LONGVARCHAR NOT NULL,
                duration INTEGER DEFAULT 0 NOT NULL,
                visits INTEGER DEFAULT 0 NOT NULL,
                score DOUBLE DEFAULT 0 NOT NULL,
                percent INTEGER DEFAULT 0 NOT NULL,
                weight DOUBLE DEFAULT 0 NOT NULL,
                month INTEGER NOT NULL,
                year INTEGER NOT NULL,
                reconcile_stamp INTEGER DEFAULT 0 NOT NULL,
                CONSTRAINT activity_unique
                  UNIQUE (publisher_id, month, year, reconcile_stamp)
                CONSTRAINT fk_activity_info_publisher_id
                  FOREIGN KEY (publisher_id)
                  REFERENCES publisher_info (publisher_id)
                  ON DELETE CASCADE
              );
              CREATE INDEX activity_info_publisher_id_index
                ON activity_info (publisher_id);
              INSERT INTO activity_info (duration, month, percent, publisher_id,
                reconcile_stamp, score, weight, year)
              SELECT duration, month, percent, publisher_id, reconcile_stamp, score,
                weight, year FROM activity_info_temp;
              DROP TABLE activity_info_temp;
              UPDATE activity_info SET visits = 5;",
    },
    Migration {
        version: 5,
        table: "activity_info",
        sql: "UPDATE activity_info SET visits = 1 WHERE visits = 0;",
    },
    Migration {
        version: 6,
        table: "activity_info",
        sql: "ALTER TABLE activity_info RENAME TO activity_info_temp;
              DROP INDEX IF EXISTS activity_info_publisher_id_index;
              CREATE TABLE activity_info (
                publisher_id LONGVARCHAR NOT NULL,
                duration INTEGER DEFAULT 0 NOT NULL,
                visits INTEGER DEFAULT 0 NOT NULL,
                score DOUBLE DEFAULT 0 NOT NULL,
                percent INTEGER DEFAULT 0 NOT NULL,
                weight DOUBLE DEFAULT 0 NOT NULL,
                reconcile_stamp INTEGER DEFAULT 0 NOT NULL,
                CONSTRAINT activity_unique
                  UNIQUE (publisher_id, reconcile_stamp)
                CONSTRAINT fk_activity_info_publisher_id
                  FOREIGN KEY (publisher_id)
                  REFERENCES publisher_info (publisher_id)
                  ON DELETE CASCADE
              );
              CREATE INDEX activity_info_publisher_id_index
                ON activity_info (publisher_id);
              INSERT INTO activity_info (publisher_id, reconcile_stamp, duration,
                percent, score, visits, weight)
              SELECT publisher_id, reconcile_stamp, sum(duration), sum(percent),
                sum(score), sum(visits), sum(weight)
              FROM activity_info_temp
              GROUP BY publisher_id, reconcile_stamp;
              DROP TABLE activity_info_temp;",
    },
    Migration {
        version: 15,
        table: "activity_info",
        sql: "ALTER TABLE activity_info RENAME TO activity_info_temp;
              DROP INDEX IF EXISTS activity_info_publisher_id_index;
              CREATE TABLE activity_info (
                publisher_id LONGVARCHAR NOT NULL,
                duration INTEGER DEFAULT 0 NOT NULL,
                visits INTEGER DEFAULT 0 NOT NULL,
                score DOUBLE DEFAULT 0 NOT NULL,
                percent INTEGER DEFAULT 0 NOT NULL,
                weight DOUBLE DEFAULT 0 NOT NULL,
                reconcile_stamp INTEGER DEFAULT 0 NOT NULL,
                CONSTRAINT activity_unique
                  UNIQUE (publisher_id, reconcile_stamp)
              );
              CREATE INDEX activity_info_publisher_id_index
                ON activity_info (publisher_id);
              INSERT INTO activity_info (duration, percent, publisher_id,
                reconcile_stamp, score, visits, weight)
              SELECT duration, percent, publisher_id, reconcile_stamp, score, visits, weight
              FROM activity_info_temp;
              DROP TABLE activity_info_temp;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_info (
            publisher_id LONGVARCHAR NOT NULL,
            duration INTEGER DEFAULT 0 NOT NULL,
            visits INTEGER DEFAULT 0 NOT NULL,
            score DOUBLE DEFAULT 0 NOT NULL,
            percent INTEGER DEFAULT 0 NOT NULL,
            weight DOUBLE DEFAULT 0 NOT NULL,
            reconcile_stamp INTEGER DEFAULT 0 NOT NULL,
            CONSTRAINT activity_unique
              UNIQUE (publisher_id, reconcile_stamp)
        );
        CREATE INDEX IF NOT EXISTS activity_info_publisher_id_index
          ON activity_info (publisher_id);",
    )?;
    Ok(())
}

fn sort_column(sort: ActivitySort) -> &'static str {
    match sort {
        ActivitySort::PublisherId => "ai.publisher_id",
        ActivitySort::Duration => "ai.duration",
        ActivitySort::Visits => "ai.visits",
        ActivitySort::Score => "ai.score",
        ActivitySort::Percent => "ai.percent",
        ActivitySort::Weight => "ai.weight",
        ActivitySort::ReconcileStamp => "ai.reconcile_stamp",
    }
}

/// Compile an [`ActivityInfoFilter`] against the `ai` / `pi` / `spi` join.
///
/// Zero-valued numeric fields and an empty id add no predicate.
pub fn activity_filter(filter: &ActivityInfoFilter, start: u32, limit: u32) -> QueryFilter {
    let mut query = QueryFilter::new();

    if !filter.id.is_empty() {
        query.bind("ai.publisher_id", Op::Eq, filter.id.clone());
    }
    if filter.reconcile_stamp > 0 {
        query.bind("ai.reconcile_stamp", Op::Eq, filter.reconcile_stamp as i64);
    }
    if filter.min_duration > 0 {
        query.bind("ai.duration", Op::Ge, filter.min_duration as i64);
    }
    match filter.excluded {
        ExcludeFilter::FilterAll => {}
        ExcludeFilter::FilterAllExceptExcluded => {
            query.bind("pi.excluded", Op::Ne, PublisherExclude::Excluded.as_i32());
        }
        other => {
            query.bind("pi.excluded", Op::Eq, other.as_i32());
        }
    }
    if filter.percent > 0 {
        query.bind("ai.percent", Op::Ge, i64::from(filter.percent));
    }
    if filter.min_visits > 0 {
        query.bind("ai.visits", Op::Ge, i64::from(filter.min_visits));
    }
    if !filter.non_verified {
        query.bind("spi.status", Op::Ne, PublisherStatus::NotVerified.as_i32());
    }

    for order in &filter.order_by {
        query.order_by(sort_column(order.column), order.ascending);
    }
    query.page(start, limit);
    query
}

fn activity_row(row: &Row<'_>) -> rusqlite::Result<PublisherInfo> {
    Ok(PublisherInfo {
        id: row.get(0)?,
        duration: row.get::<_, i64>(1)?.max(0) as u64,
        score: row.get(2)?,
        percent: row.get::<_, i64>(3)?.max(0) as u32,
        weight: row.get(4)?,
        status: match row.get::<_, Option<i32>>(5)? {
            Some(_) => enum_column(row, 5)?,
            None => PublisherStatus::NotVerified,
        },
        status_updated_at: timestamp_column(row, 6)?,
        excluded: enum_column(row, 7)?,
        name: row.get(8)?,
        url: row.get(9)?,
        provider: row.get(10)?,
        favicon_url: row.get(11)?,
        reconcile_stamp: row.get::<_, i64>(12)?.max(0) as u64,
        visits: row.get::<_, i64>(13)?.max(0) as u32,
    })
}

fn insert_activity(conn: &Connection, info: &PublisherInfo) -> Result<()> {
    require(&info.id, "publisher id")?;
    conn.prepare_cached(
        "INSERT OR REPLACE INTO activity_info
           (publisher_id, duration, score, percent, weight, reconcile_stamp, visits)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(rusqlite::params![
        info.id,
        info.duration as i64,
        info.score,
        info.percent,
        info.weight,
        info.reconcile_stamp as i64,
        info.visits,
    ])?;
    Ok(())
}

/// Insert or replace the activity row keyed by (`id`, `reconcile_stamp`).
pub fn save_activity_info(conn: &Connection, info: &PublisherInfo) -> Result<()> {
    insert_activity(conn, info)
}

/// Save many activity rows atomically. An empty list is rejected.
pub fn save_activity_info_list(conn: &Connection, list: &[PublisherInfo]) -> Result<()> {
    if list.is_empty() {
        return Err(DbError::Constraint("activity list is empty".into()));
    }
    let tx = conn.unchecked_transaction()?;
    for info in list {
        insert_activity(&tx, info)?;
    }
    tx.commit()?;
    Ok(())
}

/// Activity rows joined with their publisher, filtered and paged.
pub fn get_activity_info_list(
    conn: &Connection,
    start: u32,
    limit: u32,
    filter: &ActivityInfoFilter,
) -> Result<Vec<PublisherInfo>> {
    let query = activity_filter(filter, start, limit);
    let sql = format!(
        "SELECT ai.publisher_id, ai.duration, ai.score, ai.percent, ai.weight,
            spi.status, spi.updated_at, pi.excluded, pi.name, pi.url, pi.provider,
            pi.favIcon, ai.reconcile_stamp, ai.visits
         FROM activity_info AS ai
         INNER JOIN publisher_info AS pi ON ai.publisher_id = pi.publisher_id
         LEFT JOIN server_publisher_info AS spi ON spi.publisher_key = pi.publisher_id{}",
        query.sql()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(query.params()), activity_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete one publisher's activity for one reconcile period.
pub fn delete_activity_info(conn: &Connection, publisher_key: &str, reconcile_stamp: u64) -> Result<()> {
    require(publisher_key, "publisher key")?;
    if reconcile_stamp == 0 {
        return Err(DbError::Constraint("reconcile stamp is zero".into()));
    }
    conn.execute(
        "DELETE FROM activity_info WHERE publisher_id = ?1 AND reconcile_stamp = ?2",
        rusqlite::params![publisher_key, reconcile_stamp as i64],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{publisher_info, server_publisher_info};
    use tally_types::publisher::{ActivityOrder, ServerPublisherInfo};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn activity(id: &str, stamp: u64, duration: u64, percent: u32, visits: u32) -> PublisherInfo {
        PublisherInfo {
            id: id.into(),
            name: id.into(),
            url: format!("https://{id}"),
            duration,
            percent,
            visits,
            score: duration as f64 / 10.0,
            weight: f64::from(percent),
            reconcile_stamp: stamp,
            ..PublisherInfo::default()
        }
    }

    fn seed(conn: &Connection) {
        let rows = [
            activity("a.com", 100, 40, 50, 4),
            activity("b.com", 100, 20, 30, 2),
            activity("c.com", 100, 5, 20, 1),
            activity("a.com", 200, 10, 100, 1),
        ];
        for row in &rows {
            publisher_info::save_publisher_info(conn, row).expect("save publisher");
        }
        save_activity_info_list(conn, &rows).expect("save activity");
        server_publisher_info::save_server_publisher_info(
            conn,
            &ServerPublisherInfo {
                publisher_key: "a.com".into(),
                status: PublisherStatus::Connected,
                address: String::new(),
                updated_at: 1,
            },
        )
        .expect("verify a.com");
    }

    fn ids(rows: &[PublisherInfo]) -> Vec<(&str, u64)> {
        rows.iter().map(|r| (r.id.as_str(), r.reconcile_stamp)).collect()
    }

    fn all_filter() -> ActivityInfoFilter {
        ActivityInfoFilter {
            excluded: ExcludeFilter::FilterAll,
            non_verified: true,
            order_by: vec![
                ActivityOrder {
                    column: ActivitySort::ReconcileStamp,
                    ascending: true,
                },
                ActivityOrder {
                    column: ActivitySort::PublisherId,
                    ascending: true,
                },
            ],
            ..ActivityInfoFilter::default()
        }
    }

    #[test]
    fn test_placeholders_match_bound_values() {
        let excluded = [
            ExcludeFilter::FilterAll,
            ExcludeFilter::FilterDefault,
            ExcludeFilter::FilterExcluded,
            ExcludeFilter::FilterIncluded,
            ExcludeFilter::FilterAllExceptExcluded,
        ];
        for mask in 0u32..64 {
            for exclude in excluded {
                let filter = ActivityInfoFilter {
                    id: if mask & 1 != 0 { "a.com".into() } else { String::new() },
                    reconcile_stamp: u64::from(mask & 2),
                    min_duration: u64::from(mask & 4),
                    percent: mask & 8,
                    min_visits: mask & 16,
                    non_verified: mask & 32 != 0,
                    excluded: exclude,
                    order_by: vec![],
                };
                let query = activity_filter(&filter, mask, mask);
                assert_eq!(
                    query.sql().matches('?').count(),
                    query.params().len(),
                    "mask {mask} exclude {exclude:?}"
                );
            }
        }
    }

    #[test]
    fn test_filter_clauses() {
        let filter = ActivityInfoFilter {
            id: "a.com".into(),
            reconcile_stamp: 100,
            min_duration: 8,
            excluded: ExcludeFilter::FilterAllExceptExcluded,
            percent: 1,
            min_visits: 1,
            non_verified: false,
            order_by: vec![ActivityOrder {
                column: ActivitySort::Percent,
                ascending: false,
            }],
        };
        assert_eq!(
            activity_filter(&filter, 2, 10).sql(),
            " WHERE ai.publisher_id = ? AND ai.reconcile_stamp = ? AND ai.duration >= ? \
             AND pi.excluded != ? AND ai.percent >= ? AND ai.visits >= ? AND spi.status != ? \
             ORDER BY ai.percent DESC LIMIT 10 OFFSET 2"
        );
    }

    #[test]
    fn test_list_all() {
        let conn = test_db();
        seed(&conn);
        let rows = get_activity_info_list(&conn, 0, 0, &all_filter()).expect("list");
        assert_eq!(
            ids(&rows),
            vec![("a.com", 100), ("b.com", 100), ("c.com", 100), ("a.com", 200)]
        );
        assert_eq!(rows[0].visits, 4);
        assert_eq!(rows[0].status, PublisherStatus::Connected);
        assert_eq!(rows[1].status, PublisherStatus::NotVerified);
    }

    #[test]
    fn test_list_filters() {
        let conn = test_db();
        seed(&conn);

        let filter = ActivityInfoFilter {
            reconcile_stamp: 100,
            min_duration: 10,
            ..all_filter()
        };
        let rows = get_activity_info_list(&conn, 0, 0, &filter).expect("list");
        assert_eq!(ids(&rows), vec![("a.com", 100), ("b.com", 100)]);

        let filter = ActivityInfoFilter {
            min_visits: 2,
            percent: 40,
            ..all_filter()
        };
        let rows = get_activity_info_list(&conn, 0, 0, &filter).expect("list");
        assert_eq!(ids(&rows), vec![("a.com", 100)]);

        let verified_only = ActivityInfoFilter {
            non_verified: false,
            ..all_filter()
        };
        let rows = get_activity_info_list(&conn, 0, 0, &verified_only).expect("list");
        assert_eq!(ids(&rows), vec![("a.com", 100), ("a.com", 200)]);
    }

    #[test]
    fn test_list_exclusion_filters() {
        let conn = test_db();
        seed(&conn);
        let mut excluded = activity("b.com", 100, 20, 30, 2);
        excluded.excluded = PublisherExclude::Excluded;
        publisher_info::save_publisher_info(&conn, &excluded).expect("exclude b.com");

        let only_excluded = ActivityInfoFilter {
            excluded: ExcludeFilter::FilterExcluded,
            ..all_filter()
        };
        let rows = get_activity_info_list(&conn, 0, 0, &only_excluded).expect("list");
        assert_eq!(ids(&rows), vec![("b.com", 100)]);

        let not_excluded = ActivityInfoFilter {
            excluded: ExcludeFilter::FilterAllExceptExcluded,
            ..all_filter()
        };
        let rows = get_activity_info_list(&conn, 0, 0, &not_excluded).expect("list");
        assert_eq!(ids(&rows), vec![("a.com", 100), ("c.com", 100), ("a.com", 200)]);
    }

    #[test]
    fn test_paging() {
        let conn = test_db();
        seed(&conn);
        let rows = get_activity_info_list(&conn, 0, 2, &all_filter()).expect("page");
        assert_eq!(ids(&rows), vec![("a.com", 100), ("b.com", 100)]);

        // A start of 1 is the first row, as is 0.
        let rows = get_activity_info_list(&conn, 1, 2, &all_filter()).expect("page");
        assert_eq!(ids(&rows), vec![("a.com", 100), ("b.com", 100)]);

        let rows = get_activity_info_list(&conn, 2, 2, &all_filter()).expect("page");
        assert_eq!(ids(&rows), vec![("c.com", 100), ("a.com", 200)]);
    }

    #[test]
    fn test_unbounded_page_ignores_start() {
        let conn = test_db();
        seed(&conn);
        for start in [0, 2, 3] {
            let rows = get_activity_info_list(&conn, start, 0, &all_filter()).expect("list");
            assert_eq!(rows.len(), 4, "start {start}");
        }
    }

    #[test]
    fn test_save_replaces_row_for_same_period() {
        let conn = test_db();
        seed(&conn);
        save_activity_info(&conn, &activity("a.com", 100, 99, 50, 9)).expect("save");
        let filter = ActivityInfoFilter {
            id: "a.com".into(),
            reconcile_stamp: 100,
            ..all_filter()
        };
        let rows = get_activity_info_list(&conn, 0, 0, &filter).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration, 99);
        assert_eq!(rows[0].visits, 9);
    }

    #[test]
    fn test_empty_list_rejected_and_batch_is_atomic() {
        let conn = test_db();
        assert!(matches!(
            save_activity_info_list(&conn, &[]),
            Err(DbError::Constraint(_))
        ));

        let batch = [activity("a.com", 1, 1, 1, 1), activity("", 1, 1, 1, 1)];
        assert!(save_activity_info_list(&conn, &batch).is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity_info", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_delete() {
        let conn = test_db();
        seed(&conn);
        assert!(matches!(
            delete_activity_info(&conn, "", 100),
            Err(DbError::Constraint(_))
        ));
        assert!(matches!(
            delete_activity_info(&conn, "a.com", 0),
            Err(DbError::Constraint(_))
        ));

        delete_activity_info(&conn, "a.com", 100).expect("delete");
        let rows = get_activity_info_list(&conn, 0, 0, &all_filter()).expect("list");
        assert_eq!(ids(&rows), vec![("b.com", 100), ("c.com", 100), ("a.com", 200)]);
    }
}
