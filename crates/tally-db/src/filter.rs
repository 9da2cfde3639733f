//! Parameterized WHERE / ORDER BY / LIMIT builder.
//!
//! Each predicate is stored together with the value it binds, so the
//! generated SQL always carries exactly as many `?` placeholders as there are
//! bound parameters. Column names are `&'static str` chosen by the caller
//! from a fixed set; values never reach the SQL text.

use rusqlite::types::Value;

/// Comparison used by a bound predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Ge,
    Lt,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Ge => ">=",
            Op::Lt => "<",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueryFilter {
    clauses: Vec<String>,
    params: Vec<Value>,
    order_by: Vec<(&'static str, bool)>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column op ?` bound to `value`.
    pub fn bind(&mut self, column: &'static str, op: Op, value: impl Into<Value>) -> &mut Self {
        self.clauses.push(format!("{column} {} ?", op.as_sql()));
        self.params.push(value.into());
        self
    }

    pub fn order_by(&mut self, column: &'static str, ascending: bool) -> &mut Self {
        self.order_by.push((column, ascending));
        self
    }

    /// Page the result set. `limit == 0` means unbounded and ignores
    /// `start`; otherwise rows are skipped only when `start > 1`.
    pub fn page(&mut self, start: u32, limit: u32) -> &mut Self {
        self.limit = (limit > 0).then_some(limit);
        self.offset = (limit > 0 && start > 1).then_some(start);
        self
    }

    /// SQL to append after the FROM/JOIN part of a SELECT.
    pub fn sql(&self) -> String {
        let mut sql = String::new();
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        if !self.order_by.is_empty() {
            let columns: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, ascending)| {
                    format!("{column} {}", if *ascending { "ASC" } else { "DESC" })
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&columns.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = self.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// `?, ?, ?` for an `IN (...)` list of `count` values.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
