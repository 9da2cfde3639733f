//! Monthly balance totals (`balance_report_info`).

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::report::{BalanceReport, ReportType};

use crate::migrations::Migration;
use crate::{require, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 22,
    table: "balance_report_info",
    sql: "DROP TABLE IF EXISTS balance_report_info;
          CREATE TABLE balance_report_info (
            balance_report_id LONGVARCHAR PRIMARY KEY NOT NULL,
            grants_ugp DOUBLE DEFAULT 0 NOT NULL,
            grants_ads DOUBLE DEFAULT 0 NOT NULL,
            auto_contribute DOUBLE DEFAULT 0 NOT NULL,
            tip_recurring DOUBLE DEFAULT 0 NOT NULL,
            tip DOUBLE DEFAULT 0 NOT NULL
          );
          CREATE INDEX balance_report_info_balance_report_id_index
            ON balance_report_info (balance_report_id);",
}];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS balance_report_info (
            balance_report_id LONGVARCHAR PRIMARY KEY NOT NULL,
            grants_ugp DOUBLE DEFAULT 0 NOT NULL,
            grants_ads DOUBLE DEFAULT 0 NOT NULL,
            auto_contribute DOUBLE DEFAULT 0 NOT NULL,
            tip_recurring DOUBLE DEFAULT 0 NOT NULL,
            tip DOUBLE DEFAULT 0 NOT NULL
        );
        CREATE INDEX IF NOT EXISTS balance_report_info_balance_report_id_index
          ON balance_report_info (balance_report_id);",
    )?;
    Ok(())
}

const SELECT_REPORT: &str = "SELECT balance_report_id, grants_ugp, grants_ads, auto_contribute,
        tip_recurring, tip
     FROM balance_report_info";

fn report_row(row: &Row<'_>) -> rusqlite::Result<BalanceReport> {
    Ok(BalanceReport {
        id: row.get(0)?,
        grants: row.get(1)?,
        earning_from_ads: row.get(2)?,
        auto_contribute: row.get(3)?,
        recurring_donation: row.get(4)?,
        one_time_donation: row.get(5)?,
    })
}

fn column_for(kind: ReportType) -> &'static str {
    match kind {
        ReportType::GrantUgp => "grants_ugp",
        ReportType::GrantAd => "grants_ads",
        ReportType::AutoContribution => "auto_contribute",
        ReportType::TipRecurring => "tip_recurring",
        ReportType::Tip => "tip",
    }
}

fn check_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(DbError::Constraint(format!("month {month} outside 1-12")));
    }
    Ok(())
}

fn check_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(DbError::Constraint(format!("invalid amount {amount}")));
    }
    Ok(())
}

pub fn save_balance_report(conn: &Connection, report: &BalanceReport) -> Result<()> {
    require(&report.id, "balance report id")?;
    for amount in [
        report.grants,
        report.earning_from_ads,
        report.auto_contribute,
        report.recurring_donation,
        report.one_time_donation,
    ] {
        check_amount(amount)?;
    }
    conn.execute(
        "INSERT OR REPLACE INTO balance_report_info (balance_report_id, grants_ugp, grants_ads,
           auto_contribute, tip_recurring, tip)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            report.id,
            report.grants,
            report.earning_from_ads,
            report.auto_contribute,
            report.recurring_donation,
            report.one_time_donation,
        ],
    )?;
    Ok(())
}

/// Report for a month, created empty when absent.
pub fn get_balance_report(conn: &Connection, month: u32, year: u32) -> Result<BalanceReport> {
    check_month(month)?;
    let id = BalanceReport::id_for(month, year);
    conn.execute(
        "INSERT OR IGNORE INTO balance_report_info (balance_report_id) VALUES (?1)",
        [&id],
    )?;
    let report = conn
        .query_row(
            &format!("{SELECT_REPORT} WHERE balance_report_id = ?1"),
            [&id],
            report_row,
        )
        .optional()?;
    report.ok_or_else(|| DbError::NotFound(format!("balance report {id}")))
}

pub fn get_all_balance_reports(conn: &Connection) -> Result<Vec<BalanceReport>> {
    let mut stmt = conn.prepare(&format!("{SELECT_REPORT} ORDER BY balance_report_id"))?;
    let rows = stmt
        .query_map([], report_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Add `amount` to one column of a month's report.
pub fn increment_balance_report(
    conn: &Connection,
    month: u32,
    year: u32,
    kind: ReportType,
    amount: f64,
) -> Result<()> {
    check_month(month)?;
    check_amount(amount)?;

    let id = BalanceReport::id_for(month, year);
    let column = column_for(kind);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO balance_report_info (balance_report_id) VALUES (?1)",
        [&id],
    )?;
    tx.execute(
        &format!(
            "UPDATE balance_report_info SET {column} = {column} + ?1
             WHERE balance_report_id = ?2"
        ),
        rusqlite::params![amount, id],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn delete_all_balance_reports(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM balance_report_info", [])?)
}
