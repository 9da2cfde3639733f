//! Unblinded tokens (`unblinded_tokens`).
//!
//! A token is spendable while `redeemed_at` and `reserved_at` are both
//! zero. Reserving stamps `reserved_at` and `redeem_id`; spending stamps
//! `redeemed_at`. Tokens with `expires_at = 0` never expire.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use tally_types::contribution::RewardsType;
use tally_types::promotion::{CredsBatchType, UnblindedTokenRecord};
use tally_types::Timestamp;

use crate::filter::placeholders;
use crate::migrations::Migration;
use crate::{require, text_column, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 10,
        table: "unblinded_tokens",
        sql: "DROP TABLE IF EXISTS unblinded_tokens;
              CREATE TABLE unblinded_tokens (
                token_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                token_value TEXT,
                public_key TEXT,
                value DOUBLE NOT NULL DEFAULT 0,
                promotion_id TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT fk_unblinded_tokens_promotion_id
                  FOREIGN KEY (promotion_id)
                  REFERENCES promotion (promotion_id) ON DELETE CASCADE
              );
              CREATE INDEX unblinded_tokens_token_id_index
                ON unblinded_tokens (token_id);",
    },
    Migration {
        version: 14,
        table: "unblinded_tokens",
        sql: "UPDATE unblinded_tokens SET value = 0.25;",
    },
    Migration {
        version: 15,
        table: "unblinded_tokens",
        sql: "ALTER TABLE unblinded_tokens RENAME TO unblinded_tokens_temp;
              DROP INDEX IF EXISTS unblinded_tokens_token_id_index;
              CREATE TABLE unblinded_tokens (
                token_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                token_value TEXT,
                public_key TEXT,
                value DOUBLE NOT NULL DEFAULT 0,
                promotion_id TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
              );
              CREATE INDEX unblinded_tokens_promotion_id_index
                ON unblinded_tokens (promotion_id);
              INSERT INTO unblinded_tokens (created_at, promotion_id, public_key,
                token_id, token_value, value)
              SELECT created_at, promotion_id, public_key, token_id, token_value, value
              FROM unblinded_tokens_temp;
              DROP TABLE unblinded_tokens_temp;",
    },
    // Tokens of promotions move under their credential batch. Only UGP
    // grants carried an expiry.
    Migration {
        version: 18,
        table: "unblinded_tokens",
        sql: "ALTER TABLE unblinded_tokens ADD creds_id TEXT;
              ALTER TABLE unblinded_tokens ADD expires_at TIMESTAMP NOT NULL DEFAULT 0;
              UPDATE unblinded_tokens AS ut SET creds_id = (
                SELECT creds_id FROM creds_batch AS cb
                WHERE cb.trigger_id = ut.promotion_id), expires_at = IFNULL((
                  SELECT p.expires_at FROM promotion AS p
                  WHERE p.promotion_id = ut.promotion_id AND p.type = 0), 0);
              ALTER TABLE unblinded_tokens RENAME TO unblinded_tokens_temp;
              DROP INDEX IF EXISTS unblinded_tokens_promotion_id_index;
              CREATE TABLE unblinded_tokens (
                token_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                token_value TEXT,
                public_key TEXT,
                value DOUBLE NOT NULL DEFAULT 0,
                creds_id TEXT,
                expires_at TIMESTAMP NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
              );
              CREATE INDEX unblinded_tokens_creds_id_index
                ON unblinded_tokens (creds_id);
              INSERT INTO unblinded_tokens (created_at, creds_id, expires_at,
                public_key, token_id, token_value, value)
              SELECT created_at, creds_id, expires_at, public_key, token_id,
                token_value, value
              FROM unblinded_tokens_temp;
              DROP TABLE unblinded_tokens_temp;",
    },
    Migration {
        version: 20,
        table: "unblinded_tokens",
        sql: "DROP INDEX IF EXISTS unblinded_tokens_creds_id_index;
              ALTER TABLE unblinded_tokens ADD redeemed_at TIMESTAMP NOT NULL DEFAULT 0;
              ALTER TABLE unblinded_tokens ADD redeem_id TEXT;
              ALTER TABLE unblinded_tokens ADD redeem_type INTEGER NOT NULL DEFAULT 0;
              CREATE INDEX unblinded_tokens_creds_id_index
                ON unblinded_tokens (creds_id);
              CREATE INDEX unblinded_tokens_redeem_id_index
                ON unblinded_tokens (redeem_id);",
    },
    // Duplicate (token_value, public_key) pairs collapse to the first row.
    Migration {
        version: 26,
        table: "unblinded_tokens",
        sql: "ALTER TABLE unblinded_tokens RENAME TO unblinded_tokens_temp;
              DROP INDEX IF EXISTS unblinded_tokens_creds_id_index;
              DROP INDEX IF EXISTS unblinded_tokens_redeem_id_index;
              CREATE TABLE unblinded_tokens (
                token_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                token_value TEXT,
                public_key TEXT,
                value DOUBLE NOT NULL DEFAULT 0,
                creds_id TEXT,
                expires_at TIMESTAMP NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                redeemed_at TIMESTAMP NOT NULL DEFAULT 0,
                redeem_id TEXT,
                redeem_type INTEGER NOT NULL DEFAULT 0,
                CONSTRAINT unblinded_tokens_unique
                  UNIQUE (token_value, public_key)
              );
              CREATE INDEX unblinded_tokens_creds_id_index
                ON unblinded_tokens (creds_id);
              CREATE INDEX unblinded_tokens_redeem_id_index
                ON unblinded_tokens (redeem_id);
              INSERT OR IGNORE INTO unblinded_tokens (token_id, token_value, public_key,
                value, creds_id, expires_at, created_at, redeemed_at, redeem_id,
                redeem_type)
              SELECT token_id, token_value, public_key, value, creds_id, expires_at,
                created_at, redeemed_at, redeem_id, redeem_type
              FROM unblinded_tokens_temp;
              DROP TABLE IF EXISTS unblinded_tokens_temp;",
    },
    Migration {
        version: 27,
        table: "unblinded_tokens",
        sql: "ALTER TABLE unblinded_tokens ADD reserved_at TIMESTAMP DEFAULT 0 NOT NULL;",
    },
];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS unblinded_tokens (
            token_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            token_value TEXT,
            public_key TEXT,
            value DOUBLE NOT NULL DEFAULT 0,
            creds_id TEXT,
            expires_at TIMESTAMP NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            redeemed_at TIMESTAMP NOT NULL DEFAULT 0,
            redeem_id TEXT,
            redeem_type INTEGER NOT NULL DEFAULT 0,
            reserved_at TIMESTAMP DEFAULT 0 NOT NULL,
            CONSTRAINT unblinded_tokens_unique
              UNIQUE (token_value, public_key)
        );
        CREATE INDEX IF NOT EXISTS unblinded_tokens_creds_id_index
          ON unblinded_tokens (creds_id);
        CREATE INDEX IF NOT EXISTS unblinded_tokens_redeem_id_index
          ON unblinded_tokens (redeem_id);",
    )?;
    Ok(())
}

const SELECT_TOKEN: &str = "SELECT ut.token_id, ut.token_value, ut.public_key, ut.value,
        ut.creds_id, ut.expires_at, ut.redeemed_at, ut.redeem_id, ut.redeem_type,
        ut.reserved_at
     FROM unblinded_tokens AS ut";

const SPENDABLE: &str = "ut.redeemed_at = 0 AND ut.reserved_at = 0
     AND (ut.expires_at = 0 OR ut.expires_at > ?)";

fn token_row(row: &Row<'_>) -> rusqlite::Result<UnblindedTokenRecord> {
    let redeem_type = match row.get::<_, i32>(8)? {
        0 => None,
        raw => Some(RewardsType::try_from(raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Integer, Box::new(e))
        })?),
    };
    Ok(UnblindedTokenRecord {
        id: row.get(0)?,
        token_value: text_column(row, 1)?,
        public_key: text_column(row, 2)?,
        value: row.get(3)?,
        creds_id: text_column(row, 4)?,
        expires_at: timestamp_column(row, 5)?,
        redeemed_at: timestamp_column(row, 6)?,
        redeem_id: text_column(row, 7)?,
        redeem_type,
        reserved_at: timestamp_column(row, 9)?,
    })
}

fn query_tokens(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Vec<UnblindedTokenRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), token_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn id_values(ids: &[i64]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|&id| Value::Integer(id))
}

/// Insert tokens. Tokens already stored under the same value and public
/// key are skipped. Returns the number inserted.
pub fn save_unblinded_token_list(conn: &Connection, tokens: &[UnblindedTokenRecord]) -> Result<usize> {
    if tokens.is_empty() {
        return Err(DbError::Constraint("token list is empty".into()));
    }

    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO unblinded_tokens (token_value, public_key, value, creds_id,
               expires_at, redeemed_at, redeem_id, redeem_type, reserved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for token in tokens {
            require(&token.token_value, "token value")?;
            inserted += stmt.execute(rusqlite::params![
                token.token_value,
                token.public_key,
                token.value,
                token.creds_id,
                token.expires_at as i64,
                token.redeemed_at as i64,
                token.redeem_id,
                token.redeem_type.map_or(0, RewardsType::as_i32),
                token.reserved_at as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

/// Unexpired tokens that are neither reserved nor spent, oldest first.
pub fn get_spendable_unblinded_tokens(conn: &Connection, now: Timestamp) -> Result<Vec<UnblindedTokenRecord>> {
    query_tokens(
        conn,
        &format!("{SELECT_TOKEN} WHERE {SPENDABLE} ORDER BY ut.token_id"),
        vec![Value::Integer(now as i64)],
    )
}

/// Spendable tokens whose credential batch was triggered by one of `types`.
pub fn get_spendable_unblinded_tokens_by_trigger_types(
    conn: &Connection,
    types: &[CredsBatchType],
    now: Timestamp,
) -> Result<Vec<UnblindedTokenRecord>> {
    if types.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "{SELECT_TOKEN} JOIN creds_batch AS cb ON cb.creds_id = ut.creds_id
         WHERE {SPENDABLE} AND cb.trigger_type IN ({})
         ORDER BY ut.token_id",
        placeholders(types.len())
    );
    let mut params = vec![Value::Integer(now as i64)];
    params.extend(types.iter().map(|t| Value::Integer(i64::from(t.as_i32()))));
    query_tokens(conn, &sql, params)
}

pub fn count_spendable_unblinded_tokens(
    conn: &Connection,
    trigger_type: CredsBatchType,
    now: Timestamp,
) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM unblinded_tokens AS ut
             JOIN creds_batch AS cb ON cb.creds_id = ut.creds_id
             WHERE {SPENDABLE} AND cb.trigger_type = ?"
        ),
        rusqlite::params![now as i64, trigger_type.as_i32()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as usize)
}

/// Tokens reserved for `redeem_id` and not yet spent.
pub fn get_reserved_unblinded_tokens(conn: &Connection, redeem_id: &str) -> Result<Vec<UnblindedTokenRecord>> {
    require(redeem_id, "redeem id")?;
    query_tokens(
        conn,
        &format!(
            "{SELECT_TOKEN} WHERE ut.redeem_id = ? AND ut.reserved_at > 0
             AND ut.redeemed_at = 0 ORDER BY ut.token_id"
        ),
        vec![redeem_id.to_string().into()],
    )
}

/// Tokens spent under `redeem_id`.
pub fn get_spent_unblinded_tokens(conn: &Connection, redeem_id: &str) -> Result<Vec<UnblindedTokenRecord>> {
    require(redeem_id, "redeem id")?;
    query_tokens(
        conn,
        &format!("{SELECT_TOKEN} WHERE ut.redeem_id = ? AND ut.redeemed_at > 0 ORDER BY ut.token_id"),
        vec![redeem_id.to_string().into()],
    )
}

/// Reserve every listed token for `redeem_id`.
///
/// All or nothing: when any token is missing, reserved or spent, no token
/// is touched and a constraint error is returned.
pub fn mark_unblinded_tokens_as_reserved(
    conn: &Connection,
    ids: &[i64],
    redeem_id: &str,
    reserved_at: Timestamp,
) -> Result<()> {
    require(redeem_id, "redeem id")?;
    if ids.is_empty() {
        return Err(DbError::Constraint("token id list is empty".into()));
    }

    let tx = conn.unchecked_transaction()?;
    let sql = format!(
        "UPDATE unblinded_tokens SET redeem_id = ?, reserved_at = ?
         WHERE token_id IN ({}) AND redeemed_at = 0 AND reserved_at = 0",
        placeholders(ids.len())
    );
    let mut params = vec![
        Value::from(redeem_id.to_string()),
        Value::Integer(reserved_at.max(1) as i64),
    ];
    params.extend(id_values(ids));
    let updated = tx.execute(&sql, rusqlite::params_from_iter(params))?;
    if updated != ids.len() {
        return Err(DbError::Constraint(format!(
            "only {updated} of {} tokens are spendable",
            ids.len()
        )));
    }
    tx.commit()?;
    Ok(())
}

/// Reserve the oldest spendable token minted by a `trigger_type` batch.
///
/// Returns `None` when no such token is spendable.
pub fn reserve_oldest_spendable_unblinded_token(
    conn: &Connection,
    trigger_type: CredsBatchType,
    redeem_id: &str,
    now: Timestamp,
) -> Result<Option<UnblindedTokenRecord>> {
    require(redeem_id, "redeem id")?;
    let sql = format!(
        "{SELECT_TOKEN} JOIN creds_batch AS cb ON cb.creds_id = ut.creds_id
         WHERE {SPENDABLE} AND cb.trigger_type = ?
         ORDER BY ut.token_id LIMIT 1"
    );
    let params = vec![
        Value::Integer(now as i64),
        Value::Integer(i64::from(trigger_type.as_i32())),
    ];
    let Some(mut token) = query_tokens(conn, &sql, params)?.into_iter().next() else {
        return Ok(None);
    };
    mark_unblinded_tokens_as_reserved(conn, &[token.id], redeem_id, now)?;
    token.redeem_id = redeem_id.to_string();
    token.reserved_at = now.max(1);
    Ok(Some(token))
}

/// Mark tokens spent. Already spent tokens are left alone.
pub fn mark_unblinded_tokens_as_spent(
    conn: &Connection,
    ids: &[i64],
    redeem_type: RewardsType,
    redeem_id: &str,
    redeemed_at: Timestamp,
) -> Result<usize> {
    require(redeem_id, "redeem id")?;
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE unblinded_tokens SET redeemed_at = ?, redeem_id = ?, redeem_type = ?
         WHERE token_id IN ({}) AND redeemed_at = 0",
        placeholders(ids.len())
    );
    let mut params = vec![
        Value::Integer(redeemed_at.max(1) as i64),
        Value::from(redeem_id.to_string()),
        Value::Integer(i64::from(redeem_type.as_i32())),
    ];
    params.extend(id_values(ids));
    Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?)
}

/// Release the unspent reservations held by `redeem_id`.
pub fn mark_unblinded_tokens_as_spendable(conn: &Connection, redeem_id: &str) -> Result<usize> {
    require(redeem_id, "redeem id")?;
    let updated = conn.execute(
        "UPDATE unblinded_tokens SET redeem_id = '', reserved_at = 0
         WHERE redeem_id = ?1 AND redeemed_at = 0",
        [redeem_id],
    )?;
    Ok(updated)
}

pub fn delete_unblinded_tokens(conn: &Connection, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM unblinded_tokens WHERE token_id IN ({})",
        placeholders(ids.len())
    );
    Ok(conn.execute(&sql, rusqlite::params_from_iter(id_values(ids)))?)
}
