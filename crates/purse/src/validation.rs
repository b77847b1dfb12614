//! Request admission
//!
//! Two phases: structural checks that are pure, then stateful checks
//! against the ledger. Warnings never block a request; they are logged and
//! surfaced so callers can act on them.

use std::str::FromStr;

use purse_common::database::{LedgerDatabase, PendingWindow};
use purse_common::util::unix_time;
use purse_common::wallet::WalletRecord;
use purse_common::{Amount, Config, Error, UserKey};
use serde::{Deserialize, Serialize};

/// Non-blocking admission warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AdmissionWarning {
    /// Pending count is one below the cap
    ApproachingPendingCap {
        /// Current pending count
        count: usize,
        /// Configured cap
        cap: usize,
    },
    /// Amount exceeds the large-amount threshold
    LargeAmount {
        /// Requested amount
        amount: Amount,
    },
    /// Pending mints older than the stuck threshold exist
    StuckPending {
        /// Stuck entries
        count: usize,
        /// Age of the oldest in seconds
        oldest_age_secs: u64,
    },
}

/// Outcome of a stateful admission check
#[derive(Debug, Clone)]
pub struct Admission {
    /// Wallet the operation runs against
    pub wallet: WalletRecord,
    /// Warnings attached to the admission
    pub warnings: Vec<AdmissionWarning>,
}

/// Parse and validate a user key
pub fn validate_user_key(user_key: &str) -> Result<UserKey, Error> {
    Ok(UserKey::from_str(user_key)?)
}

/// Check an operation amount against the configured range
pub fn validate_amount(amount: Amount, config: &Config) -> Result<(), Error> {
    if amount < config.min_amount || amount > config.max_amount {
        return Err(Error::AmountOutOfRange {
            amount,
            min: config.min_amount,
            max: config.max_amount,
        });
    }
    Ok(())
}

/// Stateful admission checks over the ledger
#[derive(Debug)]
pub struct ValidationGate<'a> {
    store: &'a (dyn LedgerDatabase<Err = purse_common::database::Error> + Send + Sync),
    config: &'a Config,
}

impl<'a> ValidationGate<'a> {
    /// Create new [`ValidationGate`]
    pub fn new(
        store: &'a (dyn LedgerDatabase<Err = purse_common::database::Error> + Send + Sync),
        config: &'a Config,
    ) -> Self {
        Self { store, config }
    }

    /// Admit a mint request: wallet must exist and the pending cap must not
    /// be reached within the lookback window
    pub async fn admit_mint(
        &self,
        user_key: &UserKey,
        amount: Amount,
    ) -> Result<Admission, Error> {
        validate_amount(amount, self.config)?;

        let wallet = self
            .store
            .find_wallet(user_key, &self.config.mint_url)
            .await?
            .ok_or(Error::WalletNotFound)?;

        let now = unix_time();
        let lookback = now.saturating_sub(self.config.pending_lookback_secs);
        let pending = self
            .store
            .find_pending_mints(user_key, PendingWindow::NewerThan(lookback))
            .await?;

        if pending.len() >= self.config.max_pending_per_user {
            return Err(Error::PendingLimitExceeded {
                count: pending.len(),
                limit: self.config.max_pending_per_user,
            });
        }

        let mut warnings = Vec::new();

        if pending.len() + 1 >= self.config.max_pending_per_user {
            tracing::warn!(
                "User {} approaching pending cap: {} of {}",
                user_key,
                pending.len(),
                self.config.max_pending_per_user
            );
            warnings.push(AdmissionWarning::ApproachingPendingCap {
                count: pending.len(),
                cap: self.config.max_pending_per_user,
            });
        }

        if amount > self.config.large_amount_warn {
            tracing::warn!("Large mint requested by {}: {}", user_key, amount);
            warnings.push(AdmissionWarning::LargeAmount { amount });
        }

        let stuck_cutoff = now.saturating_sub(self.config.stuck_threshold_secs);
        let stuck: Vec<_> = pending
            .iter()
            .filter(|e| e.created_at < stuck_cutoff)
            .collect();

        if !stuck.is_empty() {
            let oldest = stuck.iter().map(|e| e.created_at).min().unwrap_or(now);
            let oldest_age_secs = now.saturating_sub(oldest);
            tracing::warn!(
                "User {} has {} stuck pending mints, oldest {}s",
                user_key,
                stuck.len(),
                oldest_age_secs
            );
            warnings.push(AdmissionWarning::StuckPending {
                count: stuck.len(),
                oldest_age_secs,
            });
        }

        Ok(Admission { wallet, warnings })
    }

    /// Admit a spend: the wallet must exist
    pub async fn admit_spend(&self, user_key: &UserKey) -> Result<WalletRecord, Error> {
        self.store
            .find_wallet(user_key, &self.config.mint_url)
            .await?
            .ok_or(Error::WalletNotFound)
    }
}
