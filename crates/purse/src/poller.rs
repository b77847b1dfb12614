//! Quote pollers
//!
//! One in-memory recurring task per outstanding mint quote, registered in a
//! process-wide map. A poller watches its quote until payment, expiry, its
//! error budget or the total time budget ends it; completion is handed to
//! the coordinator and the poller removes itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use purse_common::database::PendingUpdate;
use purse_common::ledger::{CompletionMethod, EntryId, TransactionId};
use purse_common::protocol::QuoteState;
use purse_common::{Amount, Error, MintUrl, UserKey};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::retry::with_retry;

/// Identity of one poller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollerKey {
    /// Owning user
    pub user_key: UserKey,
    /// Quote being watched
    pub quote_id: String,
    /// Operation the quote belongs to
    pub transaction_id: TransactionId,
}

/// Everything a poller needs to run
#[derive(Debug, Clone)]
pub struct PollerContext {
    /// Poller identity
    pub key: PollerKey,
    /// Pending ledger entry to resolve
    pub entry_id: EntryId,
    /// Mint the quote lives at
    pub mint_url: MintUrl,
    /// Amount being minted
    pub amount: Amount,
}

/// Observability snapshot of one poller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerSnapshot {
    /// Poller identity
    pub key: PollerKey,
    /// Seconds since the poller started
    pub elapsed_secs: u64,
    /// Status checks performed
    pub attempts: u32,
}

#[derive(Debug)]
struct ActivePoller {
    started_at: Instant,
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
}

/// Process-wide registry of active quote pollers
#[derive(Debug, Clone, Default)]
pub struct PollerRegistry {
    active: Arc<Mutex<HashMap<PollerKey, ActivePoller>>>,
}

impl PollerRegistry {
    /// Create new [`PollerRegistry`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start a poller; rejects an already active key
    pub async fn register(
        &self,
        coordinator: Coordinator,
        ctx: PollerContext,
    ) -> Result<(), Error> {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        {
            let mut active = self.active.lock().await;
            if active.contains_key(&ctx.key) {
                return Err(Error::PollerAlreadyActive {
                    quote_id: ctx.key.quote_id.clone(),
                });
            }
            active.insert(
                ctx.key.clone(),
                ActivePoller {
                    started_at: Instant::now(),
                    attempts: attempts.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let registry = self.clone();
        tokio::spawn(async move {
            run_poller(coordinator, &ctx, cancel, attempts).await;
            registry.remove(&ctx.key).await;
        });

        Ok(())
    }

    async fn remove(&self, key: &PollerKey) {
        self.active.lock().await.remove(key);
    }

    /// Number of active pollers
    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Whether no pollers are active
    pub async fn is_empty(&self) -> bool {
        self.active.lock().await.is_empty()
    }

    /// Snapshot of every active poller
    pub async fn status(&self) -> Vec<PollerSnapshot> {
        let active = self.active.lock().await;
        active
            .iter()
            .map(|(key, poller)| PollerSnapshot {
                key: key.clone(),
                elapsed_secs: poller.started_at.elapsed().as_secs(),
                attempts: poller.attempts.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Cancel every active poller; used at shutdown
    pub async fn cleanup_all(&self) {
        let mut active = self.active.lock().await;
        for (key, poller) in active.drain() {
            tracing::debug!("Cancelling poller for quote {}", key.quote_id);
            poller.cancel.cancel();
        }
    }
}

async fn run_poller(
    coordinator: Coordinator,
    ctx: &PollerContext,
    cancel: CancellationToken,
    attempts: Arc<AtomicU32>,
) {
    let config = coordinator.config();
    let budget = config.poll_budget();
    let max_consecutive_errors = config.poll_max_consecutive_errors;
    let started = Instant::now();

    let connector = coordinator.connectors().connector(&ctx.mint_url);

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick resolves immediately
    ticker.tick().await;

    let mut consecutive_errors: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Poller for quote {} cancelled", ctx.key.quote_id);
                return;
            }
            _ = ticker.tick() => {}
        }

        if started.elapsed() >= budget {
            tracing::warn!(
                "Poller for quote {} exhausted its {}s budget",
                ctx.key.quote_id,
                budget.as_secs()
            );
            mark_failed(&coordinator, ctx, "Polling timeout".to_string()).await;
            return;
        }

        attempts.fetch_add(1, Ordering::Relaxed);

        let status = with_retry(|| connector.get_mint_quote_status(&ctx.key.quote_id)).await;

        match status {
            Ok(response) => {
                consecutive_errors = 0;

                match response.state {
                    QuoteState::Paid => {
                        match coordinator
                            .complete_mint_with_method(
                                &ctx.key.user_key,
                                &ctx.key.quote_id,
                                ctx.amount,
                                ctx.key.transaction_id,
                                CompletionMethod::Poller,
                            )
                            .await
                        {
                            Ok(completed) => {
                                tracing::info!(
                                    "Poller completed mint {} for {}",
                                    ctx.key.quote_id,
                                    completed.total_amount
                                );
                            }
                            Err(err) => {
                                tracing::error!(
                                    "Poller completion of quote {} failed: {}",
                                    ctx.key.quote_id,
                                    err
                                );
                                mark_failed(
                                    &coordinator,
                                    ctx,
                                    format!("Completion failed: {err}"),
                                )
                                .await;
                            }
                        }
                        return;
                    }
                    QuoteState::Expired => {
                        mark_failed(&coordinator, ctx, "Quote expired".to_string()).await;
                        return;
                    }
                    QuoteState::Unpaid | QuoteState::Pending => {}
                }
            }
            Err(err) => {
                consecutive_errors += 1;
                tracing::warn!(
                    "Poller status check for quote {} failed ({}/{}): {}",
                    ctx.key.quote_id,
                    consecutive_errors,
                    max_consecutive_errors,
                    err
                );

                if consecutive_errors >= max_consecutive_errors {
                    mark_failed(&coordinator, ctx, format!("Polling failed: {err}")).await;
                    return;
                }
            }
        }
    }
}

async fn mark_failed(coordinator: &Coordinator, ctx: &PollerContext, reason: String) {
    coordinator.monitor().record_mint_failure();

    if let Err(err) = coordinator
        .localstore()
        .update_pending(&ctx.entry_id, PendingUpdate::Fail { reason })
        .await
    {
        // the entry may already have been resolved by an explicit completion
        tracing::debug!("Could not mark entry {} failed: {}", ctx.entry_id, err);
    }
}
