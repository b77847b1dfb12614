//! Operation monitoring and recovery
//!
//! Counts mint and completion outcomes, scans for stuck pending mints and
//! drives the pending cleanup pass. Counters are process-local; the
//! ledger remains the source of truth for everything durable.

use std::sync::atomic::{AtomicU64, Ordering};

use purse_common::database::PendingUpdate;
use purse_common::util::unix_time;
use purse_common::{Config, Error, UserKey};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::types::{CleanupReport, RecoveryStats};
use crate::LocalStore;

/// Attempt/success/failure counters for one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCounters {
    /// Operations started
    pub attempts: u64,
    /// Operations succeeded
    pub successes: u64,
    /// Operations failed
    pub failures: u64,
}

/// Snapshot of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Mint quote creation counters
    pub mint: OpCounters,
    /// Mint completion counters
    pub completion: OpCounters,
    /// Success rate over all attempted operations
    pub success_rate: f64,
}

/// Aggregated stuck-pending alert, one per scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckAlert {
    /// Stuck pending entries across all users
    pub count: usize,
    /// Distinct affected users
    pub users: usize,
    /// Age of the oldest entry in seconds
    pub oldest_age_secs: u64,
}

/// Process-wide operation monitor
#[derive(Debug, Default)]
pub struct Monitor {
    mint_attempts: AtomicU64,
    mint_successes: AtomicU64,
    mint_failures: AtomicU64,
    completion_attempts: AtomicU64,
    completion_successes: AtomicU64,
    completion_failures: AtomicU64,
}

impl Monitor {
    /// Record a mint attempt
    pub fn record_mint_attempt(&self) {
        self.mint_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a mint success
    pub fn record_mint_success(&self) {
        self.mint_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a mint failure
    pub fn record_mint_failure(&self) {
        self.mint_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion attempt
    pub fn record_completion_attempt(&self) {
        self.completion_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion success
    pub fn record_completion_success(&self) {
        self.completion_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion failure
    pub fn record_completion_failure(&self) {
        self.completion_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current counters
    pub fn snapshot(&self) -> CounterSnapshot {
        let mint = OpCounters {
            attempts: self.mint_attempts.load(Ordering::Relaxed),
            successes: self.mint_successes.load(Ordering::Relaxed),
            failures: self.mint_failures.load(Ordering::Relaxed),
        };
        let completion = OpCounters {
            attempts: self.completion_attempts.load(Ordering::Relaxed),
            successes: self.completion_successes.load(Ordering::Relaxed),
            failures: self.completion_failures.load(Ordering::Relaxed),
        };

        let attempts = mint.attempts + completion.attempts;
        let successes = mint.successes + completion.successes;
        let success_rate = if attempts == 0 {
            1.0
        } else {
            successes as f64 / attempts as f64
        };

        CounterSnapshot {
            mint,
            completion,
            success_rate,
        }
    }

    /// Scan for pending mints older than the stuck threshold across all
    /// users and emit a single aggregated alert
    #[instrument(skip_all)]
    pub async fn check_stuck_alert(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<Option<StuckAlert>, Error> {
        let now = unix_time();
        let cutoff = now.saturating_sub(config.stuck_threshold_secs);
        let stuck = store.find_pending_older_than(cutoff).await?;

        if stuck.is_empty() {
            return Ok(None);
        }

        let users = stuck
            .iter()
            .map(|e| e.user_key.clone())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let oldest = stuck.iter().map(|e| e.created_at).min().unwrap_or(now);

        let alert = StuckAlert {
            count: stuck.len(),
            users,
            oldest_age_secs: now.saturating_sub(oldest),
        };

        tracing::warn!(
            "{} stuck pending mints across {} users, oldest {}s",
            alert.count,
            alert.users,
            alert.oldest_age_secs
        );

        Ok(Some(alert))
    }

    /// Transition a user's aged pending mints to failed
    #[instrument(skip(self, store, config))]
    pub async fn cleanup(
        &self,
        store: &LocalStore,
        config: &Config,
        user_key: &UserKey,
        max_age_secs: Option<u64>,
        dry_run: bool,
    ) -> Result<CleanupReport, Error> {
        let max_age = max_age_secs.unwrap_or(config.stuck_threshold_secs);
        let cutoff = unix_time().saturating_sub(max_age);

        let aged = store
            .find_pending_mints(
                user_key,
                purse_common::database::PendingWindow::OlderThan(cutoff),
            )
            .await?;

        let mut report = CleanupReport {
            processed: aged.len(),
            cleaned: 0,
            failed: 0,
            dry_run,
        };

        if dry_run {
            return Ok(report);
        }

        for entry in aged {
            match store
                .update_pending(
                    &entry.id,
                    PendingUpdate::Fail {
                        reason: format!("Cleaned up after {max_age}s"),
                    },
                )
                .await
            {
                Ok(_) => report.cleaned += 1,
                Err(err) => {
                    tracing::warn!("Cleanup of entry {} failed: {}", entry.id, err);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Pending population stats for one user
    pub async fn recovery_stats(
        &self,
        store: &LocalStore,
        config: &Config,
        user_key: &UserKey,
    ) -> Result<RecoveryStats, Error> {
        let now = unix_time();
        let pending = store
            .find_pending_mints(
                user_key,
                purse_common::database::PendingWindow::OlderThan(u64::MAX),
            )
            .await?;

        let stuck_cutoff = now.saturating_sub(config.stuck_threshold_secs);
        let stuck_one_hour = pending
            .iter()
            .filter(|e| e.created_at < stuck_cutoff)
            .count();

        Ok(RecoveryStats {
            total_pending: pending.len(),
            stuck_one_hour,
            transactions: pending.iter().map(|e| e.transaction_id).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use purse_common::ledger::{EntryKind, EntryMetadata, EntryStatus, LedgerEntry, TransactionId};
    use purse_common::wallet::WalletId;
    use purse_common::{Amount, MintUrl};

    use super::*;
    use crate::database::{LedgerDatabase, LedgerMemoryDatabase};

    fn user() -> UserKey {
        UserKey::from_str("7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e")
            .unwrap()
    }

    fn aged_pending(config: &Config, amount: u64, age_secs: u64) -> LedgerEntry {
        let mut entry = LedgerEntry::pending(
            user(),
            WalletId::new(),
            config.mint_url.clone(),
            TransactionId::new(),
            EntryKind::Minted,
            EntryMetadata::pending_mint(
                format!("q-{amount}"),
                Amount::from(amount),
                "lnbc1".to_string(),
                None,
            ),
        );
        entry.created_at -= age_secs;
        entry
    }

    fn test_config() -> Config {
        Config {
            mint_url: MintUrl::from_str("https://mint.example.com").unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stuck_alert_aggregates() {
        let config = test_config();
        let db = LedgerMemoryDatabase::default();
        let store: LocalStore = Arc::new(db.clone());
        let monitor = Monitor::default();

        assert!(monitor
            .check_stuck_alert(&store, &config)
            .await
            .unwrap()
            .is_none());

        db.store_entry(aged_pending(&config, 10, 2 * 60 * 60))
            .await
            .unwrap();
        db.store_entry(aged_pending(&config, 20, 3 * 60 * 60))
            .await
            .unwrap();

        let alert = monitor
            .check_stuck_alert(&store, &config)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.count, 2);
        assert_eq!(alert.users, 1);
        assert!(alert.oldest_age_secs >= 3 * 60 * 60);
    }

    #[tokio::test]
    async fn test_cleanup_dry_run_then_real() {
        let config = test_config();
        let db = LedgerMemoryDatabase::default();
        let store: LocalStore = Arc::new(db.clone());
        let monitor = Monitor::default();

        let stale = aged_pending(&config, 10, 2 * 60 * 60);
        let stale_id = stale.id;
        db.store_entry(stale).await.unwrap();
        // fresh entry stays untouched
        db.store_entry(aged_pending(&config, 20, 0)).await.unwrap();

        let dry = monitor
            .cleanup(&store, &config, &user(), None, true)
            .await
            .unwrap();
        assert_eq!(dry.processed, 1);
        assert_eq!(dry.cleaned, 0);

        let wet = monitor
            .cleanup(&store, &config, &user(), None, false)
            .await
            .unwrap();
        assert_eq!(wet.cleaned, 1);

        let failed = db.find_entry(&stale_id).await.unwrap().unwrap();
        assert_eq!(failed.status, EntryStatus::Failed);

        let stats = monitor
            .recovery_stats(&store, &config, &user())
            .await
            .unwrap();
        assert_eq!(stats.total_pending, 1);
        assert_eq!(stats.stuck_one_hour, 0);
    }

    #[test]
    fn test_success_rate() {
        let monitor = Monitor::default();
        assert_eq!(monitor.snapshot().success_rate, 1.0);

        monitor.record_mint_attempt();
        monitor.record_mint_success();
        monitor.record_completion_attempt();
        monitor.record_completion_failure();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.mint.attempts, 1);
        assert_eq!(snapshot.completion.failures, 1);
        assert!((snapshot.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
