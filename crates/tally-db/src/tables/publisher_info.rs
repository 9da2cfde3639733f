//! Publisher identity and exclusion state (`publisher_info`).

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::publisher::{ActivityInfoFilter, PublisherExclude, PublisherInfo, PublisherStatus};

use crate::migrations::Migration;
use crate::{enum_column, require, timestamp_column, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        table: "publisher_info",
        sql: "CREATE TABLE publisher_info (
                publisher_id LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
                verified BOOLEAN DEFAULT 0 NOT NULL,
                excluded INTEGER DEFAULT 0 NOT NULL,
                name TEXT NOT NULL,
                favIcon TEXT NOT NULL,
                url TEXT NOT NULL,
                provider TEXT NOT NULL
              );",
    },
    Migration {
        version: 7,
        table: "publisher_info",
        sql: "ALTER TABLE publisher_info RENAME TO publisher_info_old;
              CREATE TABLE publisher_info (
                publisher_id LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
                excluded INTEGER DEFAULT 0 NOT NULL,
                name TEXT NOT NULL,
                favIcon TEXT NOT NULL,
                url TEXT NOT NULL,
                provider TEXT NOT NULL
              );
              INSERT INTO publisher_info (excluded, favIcon, name, provider, publisher_id, url)
              SELECT excluded, favIcon, name, provider, publisher_id, url
              FROM publisher_info_old;
              DROP TABLE publisher_info_old;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS publisher_info (
            publisher_id LONGVARCHAR PRIMARY KEY NOT NULL UNIQUE,
            excluded INTEGER DEFAULT 0 NOT NULL,
            name TEXT NOT NULL,
            favIcon TEXT NOT NULL,
            url TEXT NOT NULL,
            provider TEXT NOT NULL
        );",
    )?;
    Ok(())
}

const SELECT_PUBLISHER: &str = "SELECT pi.publisher_id, pi.name, pi.url, pi.favIcon, pi.provider,
        pi.excluded, spi.status, spi.updated_at
     FROM publisher_info AS pi
     LEFT JOIN server_publisher_info AS spi ON spi.publisher_key = pi.publisher_id";

fn publisher_row(row: &Row<'_>) -> rusqlite::Result<PublisherInfo> {
    Ok(PublisherInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        favicon_url: row.get(3)?,
        provider: row.get(4)?,
        excluded: enum_column(row, 5)?,
        status: match row.get::<_, Option<i32>>(6)? {
            Some(_) => enum_column(row, 6)?,
            None => PublisherStatus::NotVerified,
        },
        status_updated_at: timestamp_column(row, 7)?,
        ..PublisherInfo::default()
    })
}

/// Insert or replace a publisher. An empty `favicon_url` keeps the stored icon.
pub fn save_publisher_info(conn: &Connection, info: &PublisherInfo) -> Result<()> {
    require(&info.id, "publisher id")?;
    conn.execute(
        "INSERT OR REPLACE INTO publisher_info (publisher_id, excluded, name, url, provider, favIcon)
         VALUES (?1, ?2, ?3, ?4, ?5,
           CASE WHEN ?6 = ''
             THEN IFNULL((SELECT favIcon FROM publisher_info WHERE publisher_id = ?1), '')
             ELSE ?6 END)",
        rusqlite::params![
            info.id,
            info.excluded.as_i32(),
            info.name,
            info.url,
            info.provider,
            info.favicon_url,
        ],
    )?;
    Ok(())
}

/// Publisher with its verification status.
pub fn get_publisher_info(conn: &Connection, publisher_key: &str) -> Result<Option<PublisherInfo>> {
    let info = conn
        .query_row(
            &format!("{SELECT_PUBLISHER} WHERE pi.publisher_id = ?1"),
            [publisher_key],
            publisher_row,
        )
        .optional()?;
    Ok(info)
}

/// Publisher as shown in the panel: its record plus the attention percent
/// for `filter.reconcile_stamp`.
pub fn get_panel_publisher_info(
    conn: &Connection,
    filter: &ActivityInfoFilter,
) -> Result<Option<PublisherInfo>> {
    require(&filter.id, "publisher id")?;
    let info = conn
        .query_row(
            "SELECT pi.publisher_id, pi.name, pi.url, pi.favIcon, pi.provider,
                pi.excluded, spi.status, spi.updated_at,
                (SELECT percent FROM activity_info
                 WHERE publisher_id = ?1 AND reconcile_stamp = ?2) AS percent
             FROM publisher_info AS pi
             LEFT JOIN server_publisher_info AS spi ON spi.publisher_key = pi.publisher_id
             WHERE pi.publisher_id = ?1
             LIMIT 1",
            rusqlite::params![filter.id, filter.reconcile_stamp as i64],
            |row| {
                let mut info = publisher_row(row)?;
                info.percent = row.get::<_, Option<i64>>(8)?.unwrap_or(0).max(0) as u32;
                info.reconcile_stamp = filter.reconcile_stamp;
                Ok(info)
            },
        )
        .optional()?;
    Ok(info)
}

/// Clear every exclusion. Returns the number of publishers restored.
pub fn restore_publishers(conn: &Connection) -> Result<usize> {
    let restored = conn.execute(
        "UPDATE publisher_info SET excluded = ?1 WHERE excluded = ?2",
        rusqlite::params![
            PublisherExclude::Default.as_i32(),
            PublisherExclude::Excluded.as_i32()
        ],
    )?;
    Ok(restored)
}

pub fn get_excluded_list(conn: &Connection) -> Result<Vec<PublisherInfo>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_PUBLISHER} WHERE pi.excluded = ?1 ORDER BY pi.publisher_id"
    ))?;
    let rows = stmt
        .query_map([PublisherExclude::Excluded.as_i32()], publisher_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{activity_info, server_publisher_info};
    use crate::DbError;
    use tally_types::publisher::ServerPublisherInfo;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn publisher(id: &str) -> PublisherInfo {
        PublisherInfo {
            id: id.into(),
            name: format!("{id} name"),
            url: format!("https://{id}"),
            provider: String::new(),
            favicon_url: format!("https://{id}/favicon.ico"),
            ..PublisherInfo::default()
        }
    }

    #[test]
    fn test_save_and_get() {
        let conn = test_db();
        save_publisher_info(&conn, &publisher("brave.com")).expect("save");

        let info = get_publisher_info(&conn, "brave.com")
            .expect("get")
            .expect("present");
        assert_eq!(info.name, "brave.com name");
        assert_eq!(info.status, PublisherStatus::NotVerified);
        assert_eq!(info.excluded, PublisherExclude::Default);

        assert!(get_publisher_info(&conn, "absent.com").expect("get").is_none());
    }

    #[test]
    fn test_empty_favicon_keeps_stored_icon() {
        let conn = test_db();
        save_publisher_info(&conn, &publisher("brave.com")).expect("save");

        let mut update = publisher("brave.com");
        update.favicon_url.clear();
        update.name = "Brave".into();
        save_publisher_info(&conn, &update).expect("update");

        let info = get_publisher_info(&conn, "brave.com")
            .expect("get")
            .expect("present");
        assert_eq!(info.name, "Brave");
        assert_eq!(info.favicon_url, "https://brave.com/favicon.ico");
    }

    #[test]
    fn test_empty_id_rejected() {
        let conn = test_db();
        let result = save_publisher_info(&conn, &publisher(""));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_status_joined_from_server_info() {
        let conn = test_db();
        save_publisher_info(&conn, &publisher("brave.com")).expect("save");
        server_publisher_info::save_server_publisher_info(
            &conn,
            &ServerPublisherInfo {
                publisher_key: "brave.com".into(),
                status: PublisherStatus::UpholdVerified,
                address: "addr".into(),
                updated_at: 1_700_000_000,
            },
        )
        .expect("save server info");

        let info = get_publisher_info(&conn, "brave.com")
            .expect("get")
            .expect("present");
        assert_eq!(info.status, PublisherStatus::UpholdVerified);
        assert_eq!(info.status_updated_at, 1_700_000_000);
    }

    #[test]
    fn test_panel_info_includes_percent() {
        let conn = test_db();
        save_publisher_info(&conn, &publisher("brave.com")).expect("save");
        let mut activity = publisher("brave.com");
        activity.percent = 42;
        activity.reconcile_stamp = 7;
        activity_info::save_activity_info(&conn, &activity).expect("save activity");

        let filter = ActivityInfoFilter {
            id: "brave.com".into(),
            reconcile_stamp: 7,
            ..ActivityInfoFilter::default()
        };
        let info = get_panel_publisher_info(&conn, &filter)
            .expect("panel")
            .expect("present");
        assert_eq!(info.percent, 42);

        let other_stamp = ActivityInfoFilter {
            reconcile_stamp: 8,
            ..filter
        };
        let info = get_panel_publisher_info(&conn, &other_stamp)
            .expect("panel")
            .expect("present");
        assert_eq!(info.percent, 0);
    }

    #[test]
    fn test_exclude_and_restore() {
        let conn = test_db();
        for (id, excluded) in [
            ("a.com", PublisherExclude::Excluded),
            ("b.com", PublisherExclude::Included),
            ("c.com", PublisherExclude::Excluded),
        ] {
            let mut info = publisher(id);
            info.excluded = excluded;
            save_publisher_info(&conn, &info).expect("save");
        }

        let excluded: Vec<String> = get_excluded_list(&conn)
            .expect("list")
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(excluded, vec!["a.com", "c.com"]);

        assert_eq!(restore_publishers(&conn).expect("restore"), 2);
        assert!(get_excluded_list(&conn).expect("list").is_empty());
        let b = get_publisher_info(&conn, "b.com").expect("get").expect("present");
        assert_eq!(b.excluded, PublisherExclude::Included);
    }
}
