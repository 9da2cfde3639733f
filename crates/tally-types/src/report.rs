//! Monthly balance reports and the event log.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

int_enum! {
    /// Balance report column an amount is added to.
    pub enum ReportType {
        GrantUgp = 0,
        AutoContribution = 1,
        GrantAd = 3,
        TipRecurring = 4,
        Tip = 5,
    }
}

/// Totals for one calendar month.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// `"<year>_<month>"`, e.g. `"2024_3"`.
    pub id: String,
    pub grants: f64,
    pub earning_from_ads: f64,
    pub auto_contribute: f64,
    pub recurring_donation: f64,
    pub one_time_donation: f64,
}

impl BalanceReport {
    /// Report id for a month (1-12).
    pub fn id_for(month: u32, year: u32) -> String {
        format!("{year}_{month}")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub event_log_id: String,
    pub key: String,
    pub value: String,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_id() {
        assert_eq!(BalanceReport::id_for(3, 2024), "2024_3");
        assert_eq!(BalanceReport::id_for(12, 2023), "2023_12");
    }
}
