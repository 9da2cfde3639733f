//! `run`: keep the confirmation token pool topped up until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tally_db::Database;
use tally_tokens::{
    HttpTokenIssuer, IssuersInfo, RefillDelegate, RefillUnblindedTokens, TokenGenerator,
    TokenIssuer, TokenPool, WalletInfo,
};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;

/// Event log key for refill progress.
pub const REFILL_EVENT_KEY: &str = "confirmations.refill";

/// Records refill progress in the ledger event log.
///
/// Writes happen in the background; a failed write is logged and dropped.
pub struct LedgerEventDelegate {
    database: Arc<Database>,
}

impl LedgerEventDelegate {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    fn record(&self, value: String) {
        let database = self.database.clone();
        tokio::spawn(async move {
            if let Err(e) = database.save_event_log(REFILL_EVENT_KEY, &value).await {
                warn!("Failed to record refill event {value:?}: {e}");
            }
        });
    }
}

impl RefillDelegate for LedgerEventDelegate {
    fn on_did_refill_unblinded_tokens(&self) {
        self.record("refilled".to_string());
    }

    fn on_failed_to_refill_unblinded_tokens(&self) {
        self.record("failed".to_string());
    }

    fn on_captcha_required_to_refill_unblinded_tokens(&self, captcha_id: &str) {
        self.record(format!("captcha_required:{captcha_id}"));
    }

    fn on_will_retry_refilling_unblinded_tokens(&self, delay: Duration) {
        self.record(format!("retry_in:{}s", delay.as_secs()));
    }

    fn on_did_retry_refilling_unblinded_tokens(&self) {
        self.record("retrying".to_string());
    }
}

/// Check the pool every `interval` until `shutdown` resolves.
///
/// Shutdown also interrupts a cycle waiting to retry; its batch is resumed
/// on the next start.
pub async fn refill_loop<I, G>(
    refill: &RefillUnblindedTokens<I, G>,
    wallet: &WalletInfo,
    issuers: &IssuersInfo,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) where
    I: TokenIssuer,
    G: TokenGenerator,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }
        tokio::select! {
            result = refill.maybe_refill(wallet, issuers) => match result {
                Ok(outcome) => debug!(?outcome, "Refill check finished"),
                Err(e) => warn!("Refill check failed: {e}"),
            },
            _ = &mut shutdown => break,
        }
    }
}

pub async fn run(config: &DaemonConfig) -> anyhow::Result<()> {
    let wallet = config
        .wallet()?
        .ok_or_else(|| anyhow::anyhow!("wallet.payment_id must be set to run"))?;
    if !wallet.is_valid() {
        anyhow::bail!("wallet.recovery_seed must be a base64 32-byte seed");
    }
    let issuers = config.issuers();
    if !issuers.is_valid() {
        anyhow::bail!("issuer.public_keys must list at least one key");
    }

    let db_path = config.database_path();
    let database = Arc::new(tokio::task::spawn_blocking(move || Database::open(&db_path)).await??);
    let issuer = HttpTokenIssuer::new(&config.issuer.base_url, config.issuer_timeout())?;
    let refill = RefillUnblindedTokens::new(TokenPool::new(database.clone()), issuer)
        .with_config(config.refill_config());
    refill.set_delegate(Some(Arc::new(LedgerEventDelegate::new(database.clone()))));

    info!(
        issuer = %config.issuer.base_url,
        interval_secs = config.check_interval().as_secs(),
        "Token refill loop started"
    );
    refill_loop(&refill, &wallet, &issuers, config.check_interval(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
        }
        info!("Ctrl-C received, shutting down");
    })
    .await;

    info!("Token refill loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_tokens::testing::{
        test_wallet, DelegateEvent, DeterministicTokenGenerator, Fault, MockIssuer,
        RecordingDelegate,
    };
    use tally_types::promotion::{CredsBatchStatus, CredsBatchType};

    struct Setup {
        database: Arc<Database>,
        issuer: Arc<MockIssuer>,
        delegate: Arc<RecordingDelegate>,
        refill: RefillUnblindedTokens<Arc<MockIssuer>, DeterministicTokenGenerator>,
    }

    fn setup() -> Setup {
        let database = Arc::new(Database::open_memory().expect("open db"));
        let issuer = Arc::new(MockIssuer::new());
        let refill = RefillUnblindedTokens::with_generator(
            TokenPool::new(database.clone()),
            issuer.clone(),
            DeterministicTokenGenerator::new(5),
        );
        let delegate = Arc::new(RecordingDelegate::default());
        refill.set_delegate(Some(delegate.clone()));
        Setup {
            database,
            issuer,
            delegate,
            refill,
        }
    }

    async fn wait_for(delegate: &RecordingDelegate, event: DelegateEvent) {
        while !delegate.events().contains(&event) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_loop_refills_and_stops() {
        let s = setup();
        refill_loop(
            &s.refill,
            &test_wallet(),
            &s.issuer.issuers_info(),
            Duration::from_secs(3600),
            wait_for(&s.delegate, DelegateEvent::DidRefill),
        )
        .await;

        assert_eq!(s.refill.pool().count().await.expect("count"), 50);
        assert_eq!(s.issuer.request_count(), 1);
        assert!(!s.refill.is_processing());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_wait() {
        let s = setup();
        s.issuer.fail_next_fetch(Fault::Unavailable);

        refill_loop(
            &s.refill,
            &test_wallet(),
            &s.issuer.issuers_info(),
            Duration::from_secs(3600),
            wait_for(
                &s.delegate,
                DelegateEvent::WillRetry(tally_tokens::RETRY_DELAY),
            ),
        )
        .await;

        assert_eq!(s.refill.pool().count().await.expect("count"), 0);
        assert!(!s.refill.is_processing());
        let outstanding = s
            .database
            .get_creds_batches_by_status(CredsBatchType::Confirmation, CredsBatchStatus::Blinded)
            .await
            .expect("batches");
        assert_eq!(outstanding.len(), 1);
    }

    #[tokio::test]
    async fn test_delegate_writes_event_log() {
        let database = Arc::new(Database::open_memory().expect("open db"));
        let delegate = LedgerEventDelegate::new(database.clone());
        delegate.on_will_retry_refilling_unblinded_tokens(Duration::from_secs(15));

        let mut logs = Vec::new();
        for _ in 0..100 {
            logs = database.get_last_event_logs().await.expect("logs");
            if !logs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].key, REFILL_EVENT_KEY);
        assert_eq!(logs[0].value, "retry_in:15s");
    }
}
