//! Async facade over the ledger.
//!
//! [`Database`] moves the [`Connection`] onto a dedicated worker thread and
//! exposes every table operation as an `async fn`. Jobs run one at a time in
//! submission order, so a caller always reads its own writes.
//!
//! Dropping the facade closes the job queue; the worker drains what was
//! already queued and exits.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use tally_types::contribution::{
    ContributionInfo, ContributionQueue, ContributionStep, ExternalTransaction, RecurringTip,
    RewardsType,
};
use tally_types::promotion::{
    CredsBatch, CredsBatchStatus, CredsBatchType, Promotion, PromotionStatus,
    UnblindedTokenRecord,
};
use tally_types::publisher::{ActivityInfoFilter, PublisherInfo, ServerPublisherInfo};
use tally_types::report::{BalanceReport, EventLog, ReportType};
use tally_types::sku::{SkuOrder, SkuOrderStatus, SkuTransaction};
use tally_types::Timestamp;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::tables::{
    activity_info, balance_report, contribution_info, contribution_queue, creds_batch, event_log,
    external_transaction, promotion, publisher_info, recurring_tip, server_publisher_info,
    sku_order, sku_transaction, unblinded_token,
};
use crate::{DbError, Result};

type Job = Box<dyn FnOnce(&Connection) + Send>;

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Handle to the ledger worker.
pub struct Database {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Database {
    /// Open (and migrate) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(crate::open(path)?)
    }

    /// In-memory ledger, for tests.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(crate::open_memory()?)
    }

    /// Hand an already configured connection to a new worker thread.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let worker = thread::Builder::new()
            .name("tally-db".into())
            .spawn(move || {
                debug!("Database worker started");
                while let Some(job) = queue.blocking_recv() {
                    job(&conn);
                }
                debug!("Database worker stopped");
            })?;
        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    /// Run `f` on the worker and wait for its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(DbError::Closed)?;
        let (reply, result) = oneshot::channel();
        jobs.send(Box::new(move |conn: &Connection| {
            let _ = reply.send(f(conn));
        }))
        .map_err(|_| DbError::Closed)?;
        result.await.map_err(|_| DbError::Closed)?
    }

    // Activity

    pub async fn save_activity_info(&self, info: &PublisherInfo) -> Result<()> {
        let info = info.clone();
        self.call(move |conn| activity_info::save_activity_info(conn, &info))
            .await
    }

    pub async fn save_activity_info_list(&self, list: &[PublisherInfo]) -> Result<()> {
        let list = list.to_vec();
        self.call(move |conn| activity_info::save_activity_info_list(conn, &list))
            .await
    }

    pub async fn get_activity_info_list(
        &self,
        start: u32,
        limit: u32,
        filter: &ActivityInfoFilter,
    ) -> Result<Vec<PublisherInfo>> {
        let filter = filter.clone();
        self.call(move |conn| activity_info::get_activity_info_list(conn, start, limit, &filter))
            .await
    }

    pub async fn delete_activity_info(&self, publisher_key: &str, reconcile_stamp: u64) -> Result<()> {
        let key = publisher_key.to_string();
        self.call(move |conn| activity_info::delete_activity_info(conn, &key, reconcile_stamp))
            .await
    }

    // Publishers

    pub async fn save_publisher_info(&self, info: &PublisherInfo) -> Result<()> {
        let info = info.clone();
        self.call(move |conn| publisher_info::save_publisher_info(conn, &info))
            .await
    }

    pub async fn get_publisher_info(&self, publisher_key: &str) -> Result<Option<PublisherInfo>> {
        let key = publisher_key.to_string();
        self.call(move |conn| publisher_info::get_publisher_info(conn, &key))
            .await
    }

    pub async fn get_panel_publisher_info(
        &self,
        filter: &ActivityInfoFilter,
    ) -> Result<Option<PublisherInfo>> {
        let filter = filter.clone();
        self.call(move |conn| publisher_info::get_panel_publisher_info(conn, &filter))
            .await
    }

    pub async fn restore_publishers(&self) -> Result<usize> {
        self.call(publisher_info::restore_publishers).await
    }

    pub async fn get_excluded_list(&self) -> Result<Vec<PublisherInfo>> {
        self.call(publisher_info::get_excluded_list).await
    }

    // Server publishers

    pub async fn save_server_publisher_info(&self, info: &ServerPublisherInfo) -> Result<()> {
        let info = info.clone();
        self.call(move |conn| server_publisher_info::save_server_publisher_info(conn, &info))
            .await
    }

    pub async fn get_server_publisher_info(
        &self,
        publisher_key: &str,
    ) -> Result<Option<ServerPublisherInfo>> {
        let key = publisher_key.to_string();
        self.call(move |conn| server_publisher_info::get_server_publisher_info(conn, &key))
            .await
    }

    pub async fn delete_expired_server_publisher_info(&self, cutoff: Timestamp) -> Result<usize> {
        self.call(move |conn| server_publisher_info::delete_expired_server_publisher_info(conn, cutoff))
            .await
    }

    // Recurring tips

    pub async fn save_recurring_tip(&self, tip: &RecurringTip) -> Result<()> {
        let tip = tip.clone();
        self.call(move |conn| recurring_tip::save_recurring_tip(conn, &tip))
            .await
    }

    pub async fn get_recurring_tips(&self) -> Result<Vec<RecurringTip>> {
        self.call(recurring_tip::get_recurring_tips).await
    }

    pub async fn remove_recurring_tip(&self, publisher_key: &str) -> Result<bool> {
        let key = publisher_key.to_string();
        self.call(move |conn| recurring_tip::remove_recurring_tip(conn, &key))
            .await
    }

    pub async fn advance_monthly_contribution_dates(
        &self,
        publisher_keys: &[String],
        next: Timestamp,
    ) -> Result<usize> {
        let keys = publisher_keys.to_vec();
        self.call(move |conn| recurring_tip::advance_monthly_contribution_dates(conn, &keys, next))
            .await
    }

    // Contributions

    pub async fn save_contribution_info(&self, info: &ContributionInfo) -> Result<()> {
        let info = info.clone();
        self.call(move |conn| contribution_info::save_contribution_info(conn, &info))
            .await
    }

    pub async fn get_contribution_info(&self, contribution_id: &str) -> Result<Option<ContributionInfo>> {
        let id = contribution_id.to_string();
        self.call(move |conn| contribution_info::get_contribution_info(conn, &id))
            .await
    }

    pub async fn get_one_time_tips(&self, month: u32, year: u32) -> Result<Vec<ContributionInfo>> {
        self.call(move |conn| contribution_info::get_one_time_tips(conn, month, year))
            .await
    }

    pub async fn get_contribution_report(&self, month: u32, year: u32) -> Result<Vec<ContributionInfo>> {
        self.call(move |conn| contribution_info::get_contribution_report(conn, month, year))
            .await
    }

    pub async fn get_not_completed_contributions(&self) -> Result<Vec<ContributionInfo>> {
        self.call(contribution_info::get_not_completed_contributions)
            .await
    }

    pub async fn update_contribution_info_step(
        &self,
        contribution_id: &str,
        step: ContributionStep,
    ) -> Result<()> {
        let id = contribution_id.to_string();
        self.call(move |conn| contribution_info::update_contribution_info_step(conn, &id, step))
            .await
    }

    pub async fn update_contribution_info_step_and_count(
        &self,
        contribution_id: &str,
        step: ContributionStep,
        retry_count: i32,
    ) -> Result<()> {
        let id = contribution_id.to_string();
        self.call(move |conn| {
            contribution_info::update_contribution_info_step_and_count(conn, &id, step, retry_count)
        })
        .await
    }

    pub async fn update_contribution_info_contributed_amount(
        &self,
        contribution_id: &str,
        publisher_key: &str,
    ) -> Result<()> {
        let id = contribution_id.to_string();
        let key = publisher_key.to_string();
        self.call(move |conn| {
            contribution_info::update_contribution_info_contributed_amount(conn, &id, &key)
        })
        .await
    }

    pub async fn finish_all_in_progress_contributions(&self) -> Result<usize> {
        self.call(contribution_info::finish_all_in_progress_contributions)
            .await
    }

    // Contribution queue

    pub async fn save_contribution_queue(&self, queue: &ContributionQueue) -> Result<()> {
        let queue = queue.clone();
        self.call(move |conn| contribution_queue::save_contribution_queue(conn, &queue))
            .await
    }

    pub async fn get_first_contribution_queue(&self) -> Result<Option<ContributionQueue>> {
        self.call(contribution_queue::get_first_contribution_queue)
            .await
    }

    pub async fn mark_contribution_queue_as_complete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let now = unix_now();
        self.call(move |conn| contribution_queue::mark_contribution_queue_as_complete(conn, &id, now))
            .await
    }

    // Promotions

    pub async fn save_promotion(&self, promotion: &Promotion) -> Result<()> {
        let promotion = promotion.clone();
        self.call(move |conn| promotion::save_promotion(conn, &promotion))
            .await
    }

    pub async fn get_promotion(&self, id: &str) -> Result<Option<Promotion>> {
        let id = id.to_string();
        self.call(move |conn| promotion::get_promotion(conn, &id))
            .await
    }

    pub async fn get_promotion_list(&self, ids: &[String]) -> Result<Vec<Promotion>> {
        let ids = ids.to_vec();
        self.call(move |conn| promotion::get_promotion_list(conn, &ids))
            .await
    }

    pub async fn get_all_promotions(&self) -> Result<Vec<Promotion>> {
        self.call(promotion::get_all_promotions).await
    }

    pub async fn save_promotion_claim_id(&self, id: &str, claim_id: &str) -> Result<()> {
        let id = id.to_string();
        let claim_id = claim_id.to_string();
        self.call(move |conn| promotion::save_promotion_claim_id(conn, &id, &claim_id))
            .await
    }

    pub async fn update_promotion_status(&self, id: &str, status: PromotionStatus) -> Result<()> {
        let id = id.to_string();
        self.call(move |conn| promotion::update_promotion_status(conn, &id, status))
            .await
    }

    pub async fn update_promotions_status(
        &self,
        ids: &[String],
        status: PromotionStatus,
    ) -> Result<usize> {
        let ids = ids.to_vec();
        self.call(move |conn| promotion::update_promotions_status(conn, &ids, status))
            .await
    }

    pub async fn promotion_credential_completed(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let now = unix_now();
        self.call(move |conn| promotion::promotion_credential_completed(conn, &id, now))
            .await
    }

    pub async fn update_promotions_blank_public_key(&self, ids: &[String]) -> Result<usize> {
        let ids = ids.to_vec();
        self.call(move |conn| promotion::update_promotions_blank_public_key(conn, &ids))
            .await
    }

    // Credential batches

    pub async fn save_creds_batch(&self, batch: &CredsBatch) -> Result<()> {
        let batch = batch.clone();
        self.call(move |conn| creds_batch::save_creds_batch(conn, &batch))
            .await
    }

    pub async fn get_creds_batch_by_trigger(
        &self,
        trigger_id: &str,
        trigger_type: CredsBatchType,
    ) -> Result<Option<CredsBatch>> {
        let trigger_id = trigger_id.to_string();
        self.call(move |conn| creds_batch::get_creds_batch_by_trigger(conn, &trigger_id, trigger_type))
            .await
    }

    pub async fn get_creds_batches_by_status(
        &self,
        trigger_type: CredsBatchType,
        status: CredsBatchStatus,
    ) -> Result<Vec<CredsBatch>> {
        self.call(move |conn| creds_batch::get_creds_batches_by_status(conn, trigger_type, status))
            .await
    }

    pub async fn save_signed_creds(&self, batch: &CredsBatch) -> Result<()> {
        let batch = batch.clone();
        self.call(move |conn| creds_batch::save_signed_creds(conn, &batch))
            .await
    }

    pub async fn update_creds_batch_status(
        &self,
        trigger_id: &str,
        trigger_type: CredsBatchType,
        status: CredsBatchStatus,
    ) -> Result<()> {
        let trigger_id = trigger_id.to_string();
        self.call(move |conn| {
            creds_batch::update_creds_batch_status(conn, &trigger_id, trigger_type, status)
        })
        .await
    }

    pub async fn update_creds_batches_status(
        &self,
        trigger_ids: &[String],
        trigger_type: CredsBatchType,
        status: CredsBatchStatus,
    ) -> Result<usize> {
        let trigger_ids = trigger_ids.to_vec();
        self.call(move |conn| {
            creds_batch::update_creds_batches_status(conn, &trigger_ids, trigger_type, status)
        })
        .await
    }

    // SKU orders and transactions

    pub async fn save_sku_order(&self, order: &SkuOrder) -> Result<()> {
        let order = order.clone();
        self.call(move |conn| sku_order::save_sku_order(conn, &order))
            .await
    }

    pub async fn get_sku_order(&self, order_id: &str) -> Result<Option<SkuOrder>> {
        let order_id = order_id.to_string();
        self.call(move |conn| sku_order::get_sku_order(conn, &order_id))
            .await
    }

    pub async fn get_sku_order_by_contribution_id(
        &self,
        contribution_id: &str,
    ) -> Result<Option<SkuOrder>> {
        let id = contribution_id.to_string();
        self.call(move |conn| sku_order::get_sku_order_by_contribution_id(conn, &id))
            .await
    }

    pub async fn update_sku_order_status(&self, order_id: &str, status: SkuOrderStatus) -> Result<()> {
        let order_id = order_id.to_string();
        self.call(move |conn| sku_order::update_sku_order_status(conn, &order_id, status))
            .await
    }

    pub async fn save_contribution_id_for_sku_order(
        &self,
        order_id: &str,
        contribution_id: &str,
    ) -> Result<()> {
        let order_id = order_id.to_string();
        let contribution_id = contribution_id.to_string();
        self.call(move |conn| {
            sku_order::save_contribution_id_for_sku_order(conn, &order_id, &contribution_id)
        })
        .await
    }

    pub async fn save_sku_transaction(&self, transaction: &SkuTransaction) -> Result<()> {
        let transaction = transaction.clone();
        self.call(move |conn| sku_transaction::save_sku_transaction(conn, &transaction))
            .await
    }

    pub async fn save_sku_external_transaction(
        &self,
        transaction_id: &str,
        external_transaction_id: &str,
    ) -> Result<()> {
        let transaction_id = transaction_id.to_string();
        let external_id = external_transaction_id.to_string();
        self.call(move |conn| {
            sku_transaction::save_sku_external_transaction(conn, &transaction_id, &external_id)
        })
        .await
    }

    pub async fn get_sku_transaction_by_order_id(&self, order_id: &str) -> Result<Option<SkuTransaction>> {
        let order_id = order_id.to_string();
        self.call(move |conn| sku_transaction::get_sku_transaction_by_order_id(conn, &order_id))
            .await
    }

    // Unblinded tokens

    pub async fn save_unblinded_token_list(&self, tokens: &[UnblindedTokenRecord]) -> Result<usize> {
        let tokens = tokens.to_vec();
        self.call(move |conn| unblinded_token::save_unblinded_token_list(conn, &tokens))
            .await
    }

    pub async fn get_spendable_unblinded_tokens(&self) -> Result<Vec<UnblindedTokenRecord>> {
        let now = unix_now();
        self.call(move |conn| unblinded_token::get_spendable_unblinded_tokens(conn, now))
            .await
    }

    pub async fn get_spendable_unblinded_tokens_by_trigger_types(
        &self,
        types: &[CredsBatchType],
    ) -> Result<Vec<UnblindedTokenRecord>> {
        let types = types.to_vec();
        let now = unix_now();
        self.call(move |conn| {
            unblinded_token::get_spendable_unblinded_tokens_by_trigger_types(conn, &types, now)
        })
        .await
    }

    pub async fn count_spendable_unblinded_tokens(&self, trigger_type: CredsBatchType) -> Result<usize> {
        let now = unix_now();
        self.call(move |conn| unblinded_token::count_spendable_unblinded_tokens(conn, trigger_type, now))
            .await
    }

    pub async fn get_reserved_unblinded_tokens(&self, redeem_id: &str) -> Result<Vec<UnblindedTokenRecord>> {
        let redeem_id = redeem_id.to_string();
        self.call(move |conn| unblinded_token::get_reserved_unblinded_tokens(conn, &redeem_id))
            .await
    }

    pub async fn get_spent_unblinded_tokens(&self, redeem_id: &str) -> Result<Vec<UnblindedTokenRecord>> {
        let redeem_id = redeem_id.to_string();
        self.call(move |conn| unblinded_token::get_spent_unblinded_tokens(conn, &redeem_id))
            .await
    }

    pub async fn mark_unblinded_tokens_as_reserved(&self, ids: &[i64], redeem_id: &str) -> Result<()> {
        let ids = ids.to_vec();
        let redeem_id = redeem_id.to_string();
        let now = unix_now();
        self.call(move |conn| {
            unblinded_token::mark_unblinded_tokens_as_reserved(conn, &ids, &redeem_id, now)
        })
        .await
    }

    /// Select and reserve the oldest spendable token in one worker job, so
    /// concurrent callers never pick the same token.
    pub async fn reserve_oldest_spendable_unblinded_token(
        &self,
        trigger_type: CredsBatchType,
        redeem_id: &str,
    ) -> Result<Option<UnblindedTokenRecord>> {
        let redeem_id = redeem_id.to_string();
        let now = unix_now();
        self.call(move |conn| {
            unblinded_token::reserve_oldest_spendable_unblinded_token(conn, trigger_type, &redeem_id, now)
        })
        .await
    }

    pub async fn mark_unblinded_tokens_as_spent(
        &self,
        ids: &[i64],
        redeem_type: RewardsType,
        redeem_id: &str,
    ) -> Result<usize> {
        let ids = ids.to_vec();
        let redeem_id = redeem_id.to_string();
        let now = unix_now();
        self.call(move |conn| {
            unblinded_token::mark_unblinded_tokens_as_spent(conn, &ids, redeem_type, &redeem_id, now)
        })
        .await
    }

    pub async fn mark_unblinded_tokens_as_spendable(&self, redeem_id: &str) -> Result<usize> {
        let redeem_id = redeem_id.to_string();
        self.call(move |conn| unblinded_token::mark_unblinded_tokens_as_spendable(conn, &redeem_id))
            .await
    }

    pub async fn delete_unblinded_tokens(&self, ids: &[i64]) -> Result<usize> {
        let ids = ids.to_vec();
        self.call(move |conn| unblinded_token::delete_unblinded_tokens(conn, &ids))
            .await
    }

    // Event log

    pub async fn save_event_log(&self, key: &str, value: &str) -> Result<String> {
        let key = key.to_string();
        let value = value.to_string();
        let now = unix_now();
        self.call(move |conn| event_log::save_event_log(conn, &key, &value, now))
            .await
    }

    pub async fn save_event_logs(&self, records: &BTreeMap<String, String>) -> Result<usize> {
        let records = records.clone();
        let now = unix_now();
        self.call(move |conn| event_log::save_event_logs(conn, &records, now))
            .await
    }

    pub async fn get_last_event_logs(&self) -> Result<Vec<EventLog>> {
        self.call(event_log::get_last_event_logs).await
    }

    // External transactions

    pub async fn save_external_transaction(&self, transaction: &ExternalTransaction) -> Result<()> {
        let transaction = transaction.clone();
        self.call(move |conn| external_transaction::save_external_transaction(conn, &transaction))
            .await
    }

    pub async fn get_external_transaction(
        &self,
        contribution_id: &str,
        destination: &str,
    ) -> Result<Option<ExternalTransaction>> {
        let contribution_id = contribution_id.to_string();
        let destination = destination.to_string();
        self.call(move |conn| {
            external_transaction::get_external_transaction(conn, &contribution_id, &destination)
        })
        .await
    }

    // Balance reports

    pub async fn save_balance_report(&self, report: &BalanceReport) -> Result<()> {
        let report = report.clone();
        self.call(move |conn| balance_report::save_balance_report(conn, &report))
            .await
    }

    pub async fn get_balance_report(&self, month: u32, year: u32) -> Result<BalanceReport> {
        self.call(move |conn| balance_report::get_balance_report(conn, month, year))
            .await
    }

    pub async fn get_all_balance_reports(&self) -> Result<Vec<BalanceReport>> {
        self.call(balance_report::get_all_balance_reports).await
    }

    pub async fn increment_balance_report(
        &self,
        month: u32,
        year: u32,
        kind: ReportType,
        amount: f64,
    ) -> Result<()> {
        self.call(move |conn| balance_report::increment_balance_report(conn, month, year, kind, amount))
            .await
    }

    pub async fn delete_all_balance_reports(&self) -> Result<usize> {
        self.call(balance_report::delete_all_balance_reports).await
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Database worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tally_types::promotion::PromotionType;

    fn promotion(id: &str) -> Promotion {
        Promotion {
            id: id.into(),
            version: 1,
            promotion_type: PromotionType::Ugp,
            public_keys: "[]".into(),
            suggestions: 0,
            approximate_value: 0.0,
            status: PromotionStatus::Active,
            created_at: 1,
            claimable_until: 0,
            expires_at: 0,
            claimed_at: 0,
            claim_id: String::new(),
            legacy_claimed: false,
        }
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let db = Database::open_memory().expect("open");
        db.save_promotion(&promotion("p1")).await.expect("save");
        db.update_promotion_status("p1", PromotionStatus::Attested)
            .await
            .expect("update");
        let stored = db.get_promotion("p1").await.expect("get").expect("present");
        assert_eq!(stored.status, PromotionStatus::Attested);
    }

    #[tokio::test]
    async fn test_errors_cross_the_worker() {
        let db = Database::open_memory().expect("open");
        assert!(matches!(
            db.update_promotion_status("missing", PromotionStatus::Over).await,
            Err(DbError::NotFound(_))
        ));
        // The worker keeps serving after an error.
        assert!(db.get_all_promotions().await.expect("list").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers() {
        let db = Arc::new(Database::open_memory().expect("open"));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let db = Arc::clone(&db);
            tasks.push(tokio::spawn(async move {
                db.save_promotion(&promotion(&format!("p{i:02}"))).await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("save");
        }
        assert_eq!(db.get_all_promotions().await.expect("list").len(), 16);
    }

    #[tokio::test]
    async fn test_event_log_and_reports() {
        let db = Database::open_memory().expect("open");
        let id = db.save_event_log("state", "ready").await.expect("log");
        let logs = db.get_last_event_logs().await.expect("logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_log_id, id);
        assert!(logs[0].created_at > 0);

        db.increment_balance_report(5, 2024, ReportType::GrantAd, 0.5)
            .await
            .expect("increment");
        let report = db.get_balance_report(5, 2024).await.expect("report");
        assert_eq!(report.earning_from_ads, 0.5);
    }

    #[tokio::test]
    async fn test_file_backed_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.db");
        {
            let db = Database::open(&path).expect("open");
            db.save_promotion(&promotion("kept")).await.expect("save");
        }
        let db = Database::open(&path).expect("reopen");
        assert!(db.get_promotion("kept").await.expect("get").is_some());
    }
}
