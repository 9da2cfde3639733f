//! Transfers to external wallets (`external_transactions`).
//!
//! The only table with an enforced foreign key: every row belongs to a
//! stored contribution.

use rusqlite::{Connection, OptionalExtension};
use tally_types::contribution::ExternalTransaction;

use crate::migrations::Migration;
use crate::{require, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 37,
    table: "external_transactions",
    sql: "CREATE TABLE external_transactions (
            transaction_id TEXT NOT NULL CHECK(transaction_id <> ''),
            contribution_id TEXT NOT NULL CHECK(contribution_id <> ''),
            destination TEXT NOT NULL CHECK(destination <> ''),
            amount TEXT NOT NULL CHECK(amount <> ''),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (contribution_id, destination),
            FOREIGN KEY (contribution_id)
            REFERENCES contribution_info (contribution_id)
            ON UPDATE RESTRICT ON DELETE RESTRICT
          );",
}];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS external_transactions (
            transaction_id TEXT NOT NULL CHECK(transaction_id <> ''),
            contribution_id TEXT NOT NULL CHECK(contribution_id <> ''),
            destination TEXT NOT NULL CHECK(destination <> ''),
            amount TEXT NOT NULL CHECK(amount <> ''),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (contribution_id, destination),
            FOREIGN KEY (contribution_id)
            REFERENCES contribution_info (contribution_id)
            ON UPDATE RESTRICT ON DELETE RESTRICT
        );",
    )?;
    Ok(())
}

/// Insert a transfer. A transfer for the same contribution and destination
/// already on record is a constraint error.
pub fn save_external_transaction(conn: &Connection, transaction: &ExternalTransaction) -> Result<()> {
    require(&transaction.transaction_id, "transaction id")?;
    require(&transaction.contribution_id, "contribution id")?;
    require(&transaction.destination, "destination")?;
    require(&transaction.amount, "amount")?;

    conn.execute(
        "INSERT INTO external_transactions (transaction_id, contribution_id, destination,
           amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            transaction.transaction_id,
            transaction.contribution_id,
            transaction.destination,
            transaction.amount,
            transaction.created_at as i64,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, ref msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        other => other.into(),
    })?;
    Ok(())
}

pub fn get_external_transaction(
    conn: &Connection,
    contribution_id: &str,
    destination: &str,
) -> Result<Option<ExternalTransaction>> {
    let transaction = conn
        .query_row(
            "SELECT transaction_id, contribution_id, destination, amount, created_at
             FROM external_transactions
             WHERE contribution_id = ?1 AND destination = ?2",
            [contribution_id, destination],
            |row| {
                Ok(ExternalTransaction {
                    transaction_id: row.get(0)?,
                    contribution_id: row.get(1)?,
                    destination: row.get(2)?,
                    amount: row.get(3)?,
                    created_at: timestamp_column(row, 4)?,
                })
            },
        )
        .optional()?;
    Ok(transaction)
}
