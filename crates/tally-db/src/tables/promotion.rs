//! Grant promotions (`promotion`).
//!
//! Claim credentials used to live in `promotion_creds`; version 18 moved
//! them to `creds_batch` and dropped the table.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::promotion::{Promotion, PromotionStatus};

use crate::filter::placeholders;
use crate::migrations::Migration;
use crate::{enum_column, require, text_column, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 10,
        table: "promotion",
        sql: "CREATE TABLE promotion (
                promotion_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                type INTEGER NOT NULL,
                public_keys TEXT NOT NULL,
                suggestions INTEGER NOT NULL DEFAULT 0,
                approximate_value DOUBLE NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (promotion_id)
              );
              CREATE INDEX promotion_promotion_id_index ON promotion (promotion_id);
              CREATE TABLE promotion_creds (
                promotion_id TEXT UNIQUE NOT NULL,
                tokens TEXT NOT NULL,
                blinded_creds TEXT NOT NULL,
                signed_creds TEXT,
                public_key TEXT,
                batch_proof TEXT,
                claim_id TEXT,
                CONSTRAINT fk_promotion_creds_promotion_id
                  FOREIGN KEY (promotion_id)
                  REFERENCES promotion (promotion_id) ON DELETE CASCADE
              );
              CREATE INDEX promotion_creds_promotion_id_index
                ON promotion_creds (promotion_id);",
    },
    Migration {
        version: 13,
        table: "promotion",
        sql: "ALTER TABLE promotion ADD claimed_at TIMESTAMP;",
    },
    Migration {
        version: 14,
        table: "promotion",
        sql: "UPDATE promotion SET approximate_value = (
                SELECT (suggestions * 0.25)
                FROM promotion AS ps
                WHERE ps.promotion_id = promotion.promotion_id);",
    },
    Migration {
        version: 15,
        table: "promotion_creds",
        sql: "ALTER TABLE promotion_creds RENAME TO promotion_creds_temp;
              DROP INDEX IF EXISTS promotion_creds_promotion_id_index;
              CREATE TABLE promotion_creds (
                promotion_id TEXT UNIQUE NOT NULL,
                tokens TEXT NOT NULL,
                blinded_creds TEXT NOT NULL,
                signed_creds TEXT,
                public_key TEXT,
                batch_proof TEXT,
                claim_id TEXT
              );
              CREATE INDEX promotion_creds_promotion_id_index
                ON promotion_creds (promotion_id);
              INSERT INTO promotion_creds (batch_proof, blinded_creds, claim_id,
                promotion_id, public_key, signed_creds, tokens)
              SELECT batch_proof, blinded_creds, claim_id, promotion_id, public_key,
                signed_creds, tokens
              FROM promotion_creds_temp;
              DROP TABLE promotion_creds_temp;",
    },
    // Statuses 2 and 3 folded into `Attested`.
    Migration {
        version: 18,
        table: "promotion",
        sql: "ALTER TABLE promotion ADD claim_id TEXT;
              UPDATE promotion AS p SET claim_id = (
                SELECT claim_id FROM promotion_creds AS pc
                WHERE pc.promotion_id = p.promotion_id);
              UPDATE promotion SET status = 1 WHERE status = 2 OR status = 3;
              DROP TABLE IF EXISTS promotion_creds;",
    },
    Migration {
        version: 25,
        table: "promotion",
        sql: "ALTER TABLE promotion ADD legacy BOOLEAN DEFAULT 0 NOT NULL;",
    },
    Migration {
        version: 34,
        table: "promotion",
        sql: "ALTER TABLE promotion ADD COLUMN claimable_until INTEGER;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS promotion (
            promotion_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            type INTEGER NOT NULL,
            public_keys TEXT NOT NULL,
            suggestions INTEGER NOT NULL DEFAULT 0,
            approximate_value DOUBLE NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 0,
            expires_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            claimed_at TIMESTAMP,
            claim_id TEXT,
            legacy BOOLEAN DEFAULT 0 NOT NULL,
            claimable_until INTEGER,
            PRIMARY KEY (promotion_id)
        );
        CREATE INDEX IF NOT EXISTS promotion_promotion_id_index ON promotion (promotion_id);",
    )?;
    Ok(())
}

const SELECT_PROMOTION: &str = "SELECT promotion_id, version, type, public_keys, suggestions,
        approximate_value, status, created_at, claimable_until, expires_at, claimed_at,
        claim_id, legacy
     FROM promotion";

fn promotion_row(row: &Row<'_>) -> rusqlite::Result<Promotion> {
    Ok(Promotion {
        id: row.get(0)?,
        version: row.get(1)?,
        promotion_type: enum_column(row, 2)?,
        public_keys: row.get(3)?,
        suggestions: row.get::<_, i64>(4)?.max(0) as u64,
        approximate_value: row.get(5)?,
        status: enum_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
        claimable_until: timestamp_column(row, 8)?,
        expires_at: timestamp_column(row, 9)?,
        claimed_at: timestamp_column(row, 10)?,
        claim_id: text_column(row, 11)?,
        legacy_claimed: row.get(12)?,
    })
}

pub fn save_promotion(conn: &Connection, promotion: &Promotion) -> Result<()> {
    require(&promotion.id, "promotion id")?;
    conn.execute(
        "INSERT OR REPLACE INTO promotion (promotion_id, version, type, public_keys,
           suggestions, approximate_value, status, created_at, claimable_until, expires_at,
           claimed_at, claim_id, legacy)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            promotion.id,
            promotion.version,
            promotion.promotion_type.as_i32(),
            promotion.public_keys,
            promotion.suggestions as i64,
            promotion.approximate_value,
            promotion.status.as_i32(),
            promotion.created_at as i64,
            promotion.claimable_until as i64,
            promotion.expires_at as i64,
            promotion.claimed_at as i64,
            promotion.claim_id,
            promotion.legacy_claimed,
        ],
    )?;
    Ok(())
}

pub fn get_promotion(conn: &Connection, id: &str) -> Result<Option<Promotion>> {
    let promotion = conn
        .query_row(
            &format!("{SELECT_PROMOTION} WHERE promotion_id = ?1"),
            [id],
            promotion_row,
        )
        .optional()?;
    Ok(promotion)
}

/// Promotions with the given ids. Unknown ids are skipped.
pub fn get_promotion_list(conn: &Connection, ids: &[String]) -> Result<Vec<Promotion>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "{SELECT_PROMOTION} WHERE promotion_id IN ({}) ORDER BY promotion_id",
        placeholders(ids.len())
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), promotion_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_all_promotions(conn: &Connection) -> Result<Vec<Promotion>> {
    let mut stmt = conn.prepare(&format!("{SELECT_PROMOTION} ORDER BY promotion_id"))?;
    let rows = stmt
        .query_map([], promotion_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn expect_updated(updated: usize, id: &str) -> Result<()> {
    if updated == 0 {
        return Err(DbError::NotFound(format!("promotion {id}")));
    }
    Ok(())
}

pub fn save_promotion_claim_id(conn: &Connection, id: &str, claim_id: &str) -> Result<()> {
    require(claim_id, "claim id")?;
    let updated = conn.execute(
        "UPDATE promotion SET claim_id = ?1 WHERE promotion_id = ?2",
        rusqlite::params![claim_id, id],
    )?;
    expect_updated(updated, id)
}

pub fn update_promotion_status(conn: &Connection, id: &str, status: PromotionStatus) -> Result<()> {
    let updated = conn.execute(
        "UPDATE promotion SET status = ?1 WHERE promotion_id = ?2",
        rusqlite::params![status.as_i32(), id],
    )?;
    expect_updated(updated, id)
}

fn update_many(conn: &Connection, set: &str, first: rusqlite::types::Value, ids: &[String]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE promotion SET {set} = ? WHERE promotion_id IN ({})",
        placeholders(ids.len())
    );
    let mut params = vec![first];
    params.extend(ids.iter().cloned().map(Into::into));
    let updated = conn.execute(&sql, rusqlite::params_from_iter(params))?;
    Ok(updated)
}

/// Set the status of every listed promotion. Returns the number updated.
pub fn update_promotions_status(
    conn: &Connection,
    ids: &[String],
    status: PromotionStatus,
) -> Result<usize> {
    update_many(conn, "status", status.as_i32().into(), ids)
}

/// Record a successful claim.
pub fn promotion_credential_completed(conn: &Connection, id: &str, claimed_at: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE promotion SET status = ?1, claimed_at = ?2 WHERE promotion_id = ?3",
        rusqlite::params![PromotionStatus::Finished.as_i32(), claimed_at as i64, id],
    )?;
    expect_updated(updated, id)
}

/// Forget the issuer keys of the listed promotions.
pub fn update_promotions_blank_public_key(conn: &Connection, ids: &[String]) -> Result<usize> {
    update_many(conn, "public_keys", "[]".to_string().into(), ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::promotion::PromotionType;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn promotion(id: &str) -> Promotion {
        Promotion {
            id: id.into(),
            version: 5,
            promotion_type: PromotionType::Ads,
            public_keys: "[\"key\"]".into(),
            suggestions: 4,
            approximate_value: 1.0,
            status: PromotionStatus::Active,
            created_at: 100,
            claimable_until: 500,
            expires_at: 1000,
            claimed_at: 0,
            claim_id: String::new(),
            legacy_claimed: false,
        }
    }

    #[test]
    fn test_save_get_list() {
        let conn = test_db();
        for id in ["p1", "p2", "p3"] {
            save_promotion(&conn, &promotion(id)).expect("save");
        }
        assert_eq!(get_promotion(&conn, "p2").expect("get"), Some(promotion("p2")));
        assert_eq!(get_promotion(&conn, "p9").expect("get"), None);

        let list = get_promotion_list(&conn, &["p3".into(), "p1".into(), "p9".into()])
            .expect("list");
        assert_eq!(list, vec![promotion("p1"), promotion("p3")]);
        assert!(get_promotion_list(&conn, &[]).expect("empty").is_empty());
        assert_eq!(get_all_promotions(&conn).expect("all").len(), 3);
    }

    #[test]
    fn test_claim_flow() {
        let conn = test_db();
        save_promotion(&conn, &promotion("p1")).expect("save");
        save_promotion_claim_id(&conn, "p1", "claim-1").expect("claim id");
        update_promotion_status(&conn, "p1", PromotionStatus::Attested).expect("attest");
        promotion_credential_completed(&conn, "p1", 777).expect("complete");

        let stored = get_promotion(&conn, "p1").expect("get").expect("present");
        assert_eq!(stored.claim_id, "claim-1");
        assert_eq!(stored.status, PromotionStatus::Finished);
        assert_eq!(stored.claimed_at, 777);

        assert!(matches!(
            update_promotion_status(&conn, "missing", PromotionStatus::Over),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_bulk_updates() {
        let conn = test_db();
        for id in ["p1", "p2", "p3"] {
            save_promotion(&conn, &promotion(id)).expect("save");
        }
        let ids = vec!["p1".to_string(), "p3".to_string()];
        assert_eq!(
            update_promotions_status(&conn, &ids, PromotionStatus::Over).expect("status"),
            2
        );
        assert_eq!(update_promotions_blank_public_key(&conn, &ids).expect("blank"), 2);

        let p1 = get_promotion(&conn, "p1").expect("get").expect("present");
        assert_eq!((p1.status, p1.public_keys.as_str()), (PromotionStatus::Over, "[]"));
        let p2 = get_promotion(&conn, "p2").expect("get").expect("present");
        assert_eq!(p2, promotion("p2"));
    }

    #[test]
    fn test_legacy_values_migrated() {
        let conn = Connection::open_in_memory().expect("open");
        crate::migrations::migrate_to(&conn, 13).expect("migrate to v13");
        conn.execute_batch(
            "INSERT INTO promotion (promotion_id, version, type, public_keys, suggestions,
               approximate_value, status, expires_at, created_at)
             VALUES ('p1', 4, 0, '[]', 5, 0, 0, 1000, 100);",
        )
        .expect("seed");
        crate::migrations::migrate_to(&conn, crate::SCHEMA_VERSION).expect("migrate");

        let stored = get_promotion(&conn, "p1").expect("get").expect("present");
        assert_eq!(stored.approximate_value, 1.25);
        assert_eq!(stored.claim_id, "");
        assert_eq!(stored.claimable_until, 0);
        assert!(!stored.legacy_claimed);
    }
}
