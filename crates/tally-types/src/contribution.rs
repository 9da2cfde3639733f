//! Contributions, contribution queues, recurring tips and external transfers.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

int_enum! {
    /// Kind of payout a contribution or token redemption belongs to.
    pub enum RewardsType {
        AutoContribute = 2,
        OneTimeTip = 8,
        RecurringTip = 16,
        Transfer = 17,
        Payment = 18,
        /// Anonymous ad confirmation.
        Confirmation = 19,
    }
}

int_enum! {
    /// Progress of a contribution. Negative values are terminal.
    #[derive(Default)]
    pub enum ContributionStep {
        RetryCount = -7,
        AutoContributeOff = -6,
        RewardsOff = -5,
        AutoContributeTableEmpty = -4,
        NotEnoughFunds = -3,
        Failed = -2,
        Completed = -1,
        #[default]
        No = 0,
        Start = 1,
        Prepare = 2,
        Reserve = 3,
        ExternalTransaction = 4,
        Creds = 5,
    }
}

impl ContributionStep {
    /// Whether the contribution reached a final state.
    pub fn is_terminal(self) -> bool {
        self.as_i32() < 0
    }
}

int_enum! {
    /// Funding source of a contribution.
    #[derive(Default)]
    pub enum ContributionProcessor {
        #[default]
        None = 0,
        Tokens = 1,
        Uphold = 2,
        Bitflyer = 3,
        Gemini = 4,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionPublisher {
    pub contribution_id: String,
    pub publisher_key: String,
    pub total_amount: f64,
    pub contributed_amount: f64,
}

/// A contribution and the publishers it pays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContributionInfo {
    pub contribution_id: String,
    pub amount: f64,
    pub contribution_type: RewardsType,
    pub step: ContributionStep,
    pub retry_count: i32,
    pub created_at: Timestamp,
    pub processor: ContributionProcessor,
    pub publishers: Vec<ContributionPublisher>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionQueuePublisher {
    pub publisher_key: String,
    pub amount_percent: f64,
}

/// A contribution waiting to be processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContributionQueue {
    pub id: String,
    pub queue_type: RewardsType,
    pub amount: f64,
    pub partial: bool,
    pub created_at: Timestamp,
    /// Zero while pending.
    pub completed_at: Timestamp,
    pub publishers: Vec<ContributionQueuePublisher>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringTip {
    pub publisher_key: String,
    pub amount: f64,
    pub created_at: Timestamp,
    pub next_contribution_at: Timestamp,
}

/// A transfer sent to an external wallet on behalf of a contribution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    pub transaction_id: String,
    pub contribution_id: String,
    pub destination: String,
    /// Decimal string, kept verbatim from the provider.
    pub amount: String,
    pub created_at: Timestamp,
}
