//! Publisher and activity records.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

int_enum! {
    /// Per-publisher exclusion choice stored in `publisher_info.excluded`.
    #[derive(Default)]
    pub enum PublisherExclude {
        #[default]
        Default = 0,
        Excluded = 1,
        Included = 2,
    }
}

int_enum! {
    /// Exclusion filter applied when listing activity.
    #[derive(Default)]
    pub enum ExcludeFilter {
        /// No exclusion clause at all.
        FilterAll = -1,
        #[default]
        FilterDefault = 0,
        FilterExcluded = 1,
        FilterIncluded = 2,
        /// Everything except explicitly excluded publishers.
        FilterAllExceptExcluded = 3,
    }
}

int_enum! {
    /// Verification status reported by the publisher registry.
    #[derive(Default)]
    pub enum PublisherStatus {
        #[default]
        NotVerified = 0,
        Connected = 1,
        UpholdVerified = 2,
        BitflyerVerified = 3,
        GeminiVerified = 4,
    }
}

/// Sortable columns of an activity listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySort {
    PublisherId,
    Duration,
    Visits,
    Score,
    Percent,
    Weight,
    ReconcileStamp,
}

/// One `ORDER BY` term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityOrder {
    pub column: ActivitySort,
    pub ascending: bool,
}

/// Filter for activity listings. Zero, empty and default values mean "unset".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfoFilter {
    pub id: String,
    pub excluded: ExcludeFilter,
    pub percent: u32,
    pub order_by: Vec<ActivityOrder>,
    pub min_duration: u64,
    pub reconcile_stamp: u64,
    /// When false, publishers the registry reports as not verified are skipped.
    pub non_verified: bool,
    pub min_visits: u32,
}

/// A publisher joined with its activity for one reconcile period.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: String,
    pub duration: u64,
    pub score: f64,
    pub visits: u32,
    pub percent: u32,
    pub weight: f64,
    pub excluded: PublisherExclude,
    pub reconcile_stamp: u64,
    pub status: PublisherStatus,
    pub status_updated_at: Timestamp,
    pub name: String,
    pub url: String,
    pub provider: String,
    pub favicon_url: String,
}

/// Registry view of a publisher, refreshed periodically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerPublisherInfo {
    pub publisher_key: String,
    pub status: PublisherStatus,
    pub address: String,
    pub updated_at: Timestamp,
}
