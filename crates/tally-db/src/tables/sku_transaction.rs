//! Payment transactions of SKU orders (`sku_transaction`).

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::sku::{SkuTransaction, SkuTransactionStatus};

use crate::migrations::Migration;
use crate::{enum_column, require, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 19,
    table: "sku_transaction",
    sql: "DROP TABLE IF EXISTS sku_transaction;
          CREATE TABLE sku_transaction (transaction_id TEXT NOT NULL,
            order_id TEXT NOT NULL,
            external_transaction_id TEXT NOT NULL,
            type INTEGER NOT NULL,
            amount DOUBLE NOT NULL,
            status INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (transaction_id)
          );
          CREATE INDEX sku_transaction_order_id_index ON sku_transaction (order_id);",
}];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sku_transaction (transaction_id TEXT NOT NULL,
            order_id TEXT NOT NULL,
            external_transaction_id TEXT NOT NULL,
            type INTEGER NOT NULL,
            amount DOUBLE NOT NULL,
            status INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (transaction_id)
        );
        CREATE INDEX IF NOT EXISTS sku_transaction_order_id_index
          ON sku_transaction (order_id);",
    )?;
    Ok(())
}

fn transaction_row(row: &Row<'_>) -> rusqlite::Result<SkuTransaction> {
    Ok(SkuTransaction {
        transaction_id: row.get(0)?,
        order_id: row.get(1)?,
        external_transaction_id: row.get(2)?,
        transaction_type: enum_column(row, 3)?,
        amount: row.get(4)?,
        status: enum_column(row, 5)?,
        created_at: timestamp_column(row, 6)?,
    })
}

pub fn save_sku_transaction(conn: &Connection, transaction: &SkuTransaction) -> Result<()> {
    require(&transaction.transaction_id, "transaction id")?;
    require(&transaction.order_id, "order id")?;
    conn.execute(
        "INSERT OR REPLACE INTO sku_transaction (transaction_id, order_id,
           external_transaction_id, type, amount, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            transaction.transaction_id,
            transaction.order_id,
            transaction.external_transaction_id,
            transaction.transaction_type.as_i32(),
            transaction.amount,
            transaction.status.as_i32(),
            transaction.created_at as i64,
        ],
    )?;
    Ok(())
}

/// Record the provider's id for a transaction and mark it completed.
pub fn save_sku_external_transaction(
    conn: &Connection,
    transaction_id: &str,
    external_transaction_id: &str,
) -> Result<()> {
    require(external_transaction_id, "external transaction id")?;
    let updated = conn.execute(
        "UPDATE sku_transaction SET external_transaction_id = ?1, status = ?2
         WHERE transaction_id = ?3",
        rusqlite::params![
            external_transaction_id,
            SkuTransactionStatus::Completed.as_i32(),
            transaction_id,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("sku transaction {transaction_id}")));
    }
    Ok(())
}

pub fn get_sku_transaction_by_order_id(
    conn: &Connection,
    order_id: &str,
) -> Result<Option<SkuTransaction>> {
    let transaction = conn
        .query_row(
            "SELECT transaction_id, order_id, external_transaction_id, type, amount, status,
               created_at
             FROM sku_transaction WHERE order_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [order_id],
            transaction_row,
        )
        .optional()?;
    Ok(transaction)
}
