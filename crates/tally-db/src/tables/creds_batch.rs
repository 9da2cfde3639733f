//! Blinded credential batches and their signed responses (`creds_batch`).
//!
//! A batch is keyed by what triggered it: a promotion claim, a SKU order or
//! a confirmation token refill. At most one batch exists per trigger.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::promotion::{CredsBatch, CredsBatchStatus, CredsBatchType};

use crate::filter::placeholders;
use crate::migrations::Migration;
use crate::{enum_column, require, text_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 18,
    table: "creds_batch",
    sql: "CREATE TABLE creds_batch (
            creds_id TEXT PRIMARY KEY NOT NULL,
            trigger_id TEXT NOT NULL,
            trigger_type INT NOT NULL,
            creds TEXT NOT NULL,
            blinded_creds TEXT NOT NULL,
            signed_creds TEXT,
            public_key TEXT,
            batch_proof TEXT,
            status INT NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CONSTRAINT creds_batch_unique
              UNIQUE (trigger_id, trigger_type)
          );
          CREATE INDEX creds_batch_trigger_id_index ON creds_batch (trigger_id);
          CREATE INDEX creds_batch_trigger_type_index ON creds_batch (trigger_type);
          INSERT INTO creds_batch (creds_id, trigger_id, trigger_type, creds,
            blinded_creds, signed_creds, public_key, batch_proof)
          SELECT hex(randomblob(16)), promotion_id, 1, tokens, blinded_creds,
            signed_creds, public_key, batch_proof
          FROM promotion_creds;
          UPDATE creds_batch AS cb SET status = (
            SELECT p.status FROM promotion AS p
            WHERE cb.trigger_id = p.promotion_id);",
}];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS creds_batch (
            creds_id TEXT PRIMARY KEY NOT NULL,
            trigger_id TEXT NOT NULL,
            trigger_type INT NOT NULL,
            creds TEXT NOT NULL,
            blinded_creds TEXT NOT NULL,
            signed_creds TEXT,
            public_key TEXT,
            batch_proof TEXT,
            status INT NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CONSTRAINT creds_batch_unique
              UNIQUE (trigger_id, trigger_type)
        );
        CREATE INDEX IF NOT EXISTS creds_batch_trigger_id_index ON creds_batch (trigger_id);
        CREATE INDEX IF NOT EXISTS creds_batch_trigger_type_index ON creds_batch (trigger_type);",
    )?;
    Ok(())
}

const SELECT_BATCH: &str = "SELECT creds_id, trigger_id, trigger_type, creds, blinded_creds,
        signed_creds, public_key, batch_proof, status
     FROM creds_batch";

fn batch_row(row: &Row<'_>) -> rusqlite::Result<CredsBatch> {
    Ok(CredsBatch {
        creds_id: row.get(0)?,
        trigger_id: row.get(1)?,
        trigger_type: enum_column(row, 2)?,
        creds: row.get(3)?,
        blinded_creds: row.get(4)?,
        signed_creds: text_column(row, 5)?,
        public_key: text_column(row, 6)?,
        batch_proof: text_column(row, 7)?,
        status: enum_column(row, 8)?,
    })
}

/// Insert or replace a batch. A batch for the same trigger is replaced.
pub fn save_creds_batch(conn: &Connection, batch: &CredsBatch) -> Result<()> {
    require(&batch.creds_id, "creds id")?;
    require(&batch.trigger_id, "trigger id")?;
    conn.execute(
        "INSERT OR REPLACE INTO creds_batch (creds_id, trigger_id, trigger_type, creds,
           blinded_creds, signed_creds, public_key, batch_proof, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            batch.creds_id,
            batch.trigger_id,
            batch.trigger_type.as_i32(),
            batch.creds,
            batch.blinded_creds,
            batch.signed_creds,
            batch.public_key,
            batch.batch_proof,
            batch.status.as_i32(),
        ],
    )?;
    Ok(())
}

pub fn get_creds_batch_by_trigger(
    conn: &Connection,
    trigger_id: &str,
    trigger_type: CredsBatchType,
) -> Result<Option<CredsBatch>> {
    let batch = conn
        .query_row(
            &format!("{SELECT_BATCH} WHERE trigger_id = ?1 AND trigger_type = ?2"),
            rusqlite::params![trigger_id, trigger_type.as_i32()],
            batch_row,
        )
        .optional()?;
    Ok(batch)
}

/// Batches of one trigger type in one status, most recently written first.
pub fn get_creds_batches_by_status(
    conn: &Connection,
    trigger_type: CredsBatchType,
    status: CredsBatchStatus,
) -> Result<Vec<CredsBatch>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_BATCH} WHERE trigger_type = ?1 AND status = ?2 ORDER BY rowid DESC"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![trigger_type.as_i32(), status.as_i32()],
            batch_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Store the issuer's response for a batch and mark it `Signed`.
pub fn save_signed_creds(conn: &Connection, batch: &CredsBatch) -> Result<()> {
    let updated = conn.execute(
        "UPDATE creds_batch SET signed_creds = ?1, public_key = ?2, batch_proof = ?3, status = ?4
         WHERE trigger_id = ?5 AND trigger_type = ?6",
        rusqlite::params![
            batch.signed_creds,
            batch.public_key,
            batch.batch_proof,
            CredsBatchStatus::Signed.as_i32(),
            batch.trigger_id,
            batch.trigger_type.as_i32(),
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("creds batch {}", batch.trigger_id)));
    }
    Ok(())
}

pub fn update_creds_batch_status(
    conn: &Connection,
    trigger_id: &str,
    trigger_type: CredsBatchType,
    status: CredsBatchStatus,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE creds_batch SET status = ?1 WHERE trigger_id = ?2 AND trigger_type = ?3",
        rusqlite::params![status.as_i32(), trigger_id, trigger_type.as_i32()],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("creds batch {trigger_id}")));
    }
    Ok(())
}

/// Set the status of every listed batch. Returns the number updated.
pub fn update_creds_batches_status(
    conn: &Connection,
    trigger_ids: &[String],
    trigger_type: CredsBatchType,
    status: CredsBatchStatus,
) -> Result<usize> {
    if trigger_ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE creds_batch SET status = ? WHERE trigger_type = ? AND trigger_id IN ({})",
        placeholders(trigger_ids.len())
    );
    let mut params: Vec<rusqlite::types::Value> =
        vec![status.as_i32().into(), trigger_type.as_i32().into()];
    params.extend(trigger_ids.iter().cloned().map(Into::into));
    let updated = conn.execute(&sql, rusqlite::params_from_iter(params))?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn batch(creds_id: &str, trigger_id: &str, trigger_type: CredsBatchType) -> CredsBatch {
        CredsBatch {
            creds_id: creds_id.into(),
            trigger_id: trigger_id.into(),
            trigger_type,
            creds: "[\"token\"]".into(),
            blinded_creds: "[\"blinded\"]".into(),
            signed_creds: String::new(),
            public_key: String::new(),
            batch_proof: String::new(),
            status: CredsBatchStatus::Blinded,
        }
    }

    #[test]
    fn test_lifecycle() {
        let conn = test_db();
        save_creds_batch(&conn, &batch("c1", "nonce-1", CredsBatchType::Confirmation))
            .expect("save");

        let mut signed = batch("c1", "nonce-1", CredsBatchType::Confirmation);
        signed.signed_creds = "[\"signed\"]".into();
        signed.public_key = "pk".into();
        signed.batch_proof = "proof".into();
        save_signed_creds(&conn, &signed).expect("save signed");

        let stored = get_creds_batch_by_trigger(&conn, "nonce-1", CredsBatchType::Confirmation)
            .expect("get")
            .expect("present");
        assert_eq!(stored.status, CredsBatchStatus::Signed);
        assert_eq!(stored.signed_creds, "[\"signed\"]");
        assert_eq!(stored.public_key, "pk");

        update_creds_batch_status(
            &conn,
            "nonce-1",
            CredsBatchType::Confirmation,
            CredsBatchStatus::Finished,
        )
        .expect("finish");
        let stored = get_creds_batch_by_trigger(&conn, "nonce-1", CredsBatchType::Confirmation)
            .expect("get")
            .expect("present");
        assert_eq!(stored.status, CredsBatchStatus::Finished);

        assert!(get_creds_batch_by_trigger(&conn, "nonce-1", CredsBatchType::Promotion)
            .expect("get")
            .is_none());
    }

    #[test]
    fn test_one_batch_per_trigger() {
        let conn = test_db();
        save_creds_batch(&conn, &batch("c1", "promo", CredsBatchType::Promotion)).expect("save");
        save_creds_batch(&conn, &batch("c2", "promo", CredsBatchType::Promotion)).expect("replace");
        save_creds_batch(&conn, &batch("c3", "promo", CredsBatchType::Sku)).expect("other type");

        let stored = get_creds_batch_by_trigger(&conn, "promo", CredsBatchType::Promotion)
            .expect("get")
            .expect("present");
        assert_eq!(stored.creds_id, "c2");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM creds_batch", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_by_status_newest_first() {
        let conn = test_db();
        for (creds_id, nonce) in [("c1", "n1"), ("c2", "n2"), ("c3", "n3")] {
            save_creds_batch(&conn, &batch(creds_id, nonce, CredsBatchType::Confirmation))
                .expect("save");
        }
        let updated = update_creds_batches_status(
            &conn,
            &["n2".to_string()],
            CredsBatchType::Confirmation,
            CredsBatchStatus::Corrupted,
        )
        .expect("update");
        assert_eq!(updated, 1);

        let blinded: Vec<String> = get_creds_batches_by_status(
            &conn,
            CredsBatchType::Confirmation,
            CredsBatchStatus::Blinded,
        )
        .expect("list")
        .into_iter()
        .map(|b| b.trigger_id)
        .collect();
        assert_eq!(blinded, vec!["n3", "n1"]);
    }

    #[test]
    fn test_missing_batch_updates() {
        let conn = test_db();
        assert!(matches!(
            update_creds_batch_status(
                &conn,
                "nope",
                CredsBatchType::Sku,
                CredsBatchStatus::Finished
            ),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            save_signed_creds(&conn, &batch("c", "nope", CredsBatchType::Sku)),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            save_creds_batch(&conn, &batch("", "t", CredsBatchType::Sku)),
            Err(DbError::Constraint(_))
        ));
    }
}
