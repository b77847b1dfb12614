//! Operation coordinator
//!
//! Composes validation, reconciliation, the mint oracle and the ledger
//! store into the public operation surface. Every operation opens its own
//! mint handle; the ledger store serializes committing writes.

mod melt;
mod mint;
mod receive;
mod send;

use std::str::FromStr;
use std::sync::Arc;

use bitcoin::secp256k1::{rand, Secp256k1};
use purse_common::database::HistoryFilter;
use purse_common::ledger::Balance;
use purse_common::protocol::CheckStateRequest;
use purse_common::secrets::SecretCipher;
use purse_common::wallet::{WalletOrigin, WalletRecord};
use purse_common::{Config, Error, Proofs, ProofsMethods, UserKey};
use tracing::instrument;

use crate::client::{HttpConnectorFactory, MintConnectorFactory, MintHandle};
use crate::database::HistoryPage;
use crate::monitor::Monitor;
use crate::poller::{PollerRegistry, PollerSnapshot};
use crate::reconcile::{self, Discrepancy, SeverityCounts};
use crate::retry::with_retry;
use crate::transport::MintTransport;
use crate::types::{
    CheckedProofState, CleanupReport, HealthReport, HealthStatus, ReconcileOutcome, RecoveryStats,
    StateCheckReport, WalletInfo,
};
use crate::validation::{validate_user_key, ValidationGate};
use crate::LocalStore;

/// Ecash wallet coordinator
#[derive(Debug, Clone)]
pub struct Coordinator {
    config: Arc<Config>,
    localstore: LocalStore,
    connectors: Arc<dyn MintConnectorFactory>,
    pollers: PollerRegistry,
    monitor: Arc<Monitor>,
    cipher: Arc<dyn SecretCipher>,
}

impl Coordinator {
    /// Create new [`Coordinator`]
    pub fn new(
        config: Config,
        localstore: LocalStore,
        connectors: Arc<dyn MintConnectorFactory>,
        cipher: Arc<dyn SecretCipher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            localstore,
            connectors,
            pollers: PollerRegistry::new(),
            monitor: Arc::new(Monitor::default()),
            cipher,
        }
    }

    /// Create a coordinator backed by the standard HTTP transport
    pub fn with_http_transport(
        config: Config,
        localstore: LocalStore,
        cipher: Arc<dyn SecretCipher>,
    ) -> Result<Self, Error> {
        let transport = MintTransport::new(&config.http)?;
        let connectors = Arc::new(HttpConnectorFactory::new(transport));
        Ok(Self::new(config, localstore, connectors, cipher))
    }

    /// Coordinator configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ledger store
    pub fn localstore(&self) -> &LocalStore {
        &self.localstore
    }

    /// Connector factory
    pub fn connectors(&self) -> &Arc<dyn MintConnectorFactory> {
        &self.connectors
    }

    /// Operation monitor
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Poller registry
    pub fn pollers(&self) -> &PollerRegistry {
        &self.pollers
    }

    /// At-rest secret cipher
    pub fn cipher(&self) -> &Arc<dyn SecretCipher> {
        &self.cipher
    }

    pub(crate) fn gate(&self) -> ValidationGate<'_> {
        ValidationGate::new(&*self.localstore, &self.config)
    }

    /// Open the request-scoped mint handle for one operation
    pub(crate) async fn open_handle(&self) -> Result<MintHandle, Error> {
        MintHandle::open(self.connectors.connector(&self.config.mint_url)).await
    }

    /// Create the wallet for a user, or return the existing one
    #[instrument(skip(self))]
    pub async fn create_wallet(&self, user_key: &str) -> Result<WalletInfo, Error> {
        let user_key = validate_user_key(user_key)?;
        self.wallet_info(
            self.ensure_wallet(&user_key, WalletOrigin::Explicit).await?,
        )
    }

    /// Wallet for the user, creating it when allowed by `origin`
    pub(crate) async fn ensure_wallet(
        &self,
        user_key: &UserKey,
        origin: WalletOrigin,
    ) -> Result<WalletRecord, Error> {
        if let Some(wallet) = self
            .localstore
            .find_wallet(user_key, &self.config.mint_url)
            .await?
        {
            return Ok(wallet);
        }

        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        let privkey_enc = self.cipher.encrypt(&secret_key.secret_bytes())?;

        let wallet = WalletRecord::new(
            user_key.clone(),
            self.config.mint_url.clone(),
            public_key.to_string(),
            privkey_enc,
            origin,
        );

        tracing::info!("Created wallet for {} at {}", user_key, wallet.mint_url);
        self.localstore.create_wallet(wallet.clone()).await?;

        Ok(wallet)
    }

    fn wallet_info(&self, wallet: WalletRecord) -> Result<WalletInfo, Error> {
        Ok(WalletInfo {
            mint_url: wallet.mint_url,
            p2pk_pubkey: wallet.p2pk_pubkey,
        })
    }

    /// Balance breakdown for a user
    #[instrument(skip(self))]
    pub async fn get_balance(&self, user_key: &str) -> Result<Balance, Error> {
        let user_key = validate_user_key(user_key)?;
        Ok(self
            .localstore
            .get_balance(&user_key, &self.config.mint_url)
            .await?)
    }

    /// Compare ledger and oracle state over the given proofs, or over all
    /// of the user's unspent proofs when none are given
    #[instrument(skip(self, proofs))]
    pub async fn check_proof_states(
        &self,
        user_key: &str,
        proofs: Option<Proofs>,
    ) -> Result<StateCheckReport, Error> {
        let user_key = validate_user_key(user_key)?;
        self.gate().admit_spend(&user_key).await?;

        let candidates = match proofs {
            Some(proofs) => proofs,
            None => self
                .localstore
                .find_unspent(&user_key, &self.config.mint_url)
                .await?
                .into_iter()
                .flat_map(|e| e.proofs)
                .collect(),
        };

        if candidates.is_empty() {
            return Ok(StateCheckReport {
                states: Vec::new(),
                discrepancies: Vec::new(),
                severity_counts: SeverityCounts::default(),
                consistent: true,
            });
        }

        let entries = self
            .localstore
            .find_entries(&user_key, &self.config.mint_url)
            .await?;
        let local = reconcile::index_entries(&entries);

        let handle = self.open_handle().await?;
        let response = with_retry(|| {
            handle.post_check_state(CheckStateRequest {
                secrets: candidates.secrets(),
            })
        })
        .await?;

        let (discrepancies, severity_counts) = reconcile::cross_walk(&local, &response.states);

        Ok(StateCheckReport {
            states: response
                .states
                .iter()
                .map(|s| CheckedProofState {
                    secret: s.secret.clone(),
                    state: s.state,
                })
                .collect(),
            consistent: severity_counts.total() == 0,
            discrepancies,
            severity_counts,
        })
    }

    /// Apply the deterministic corrections for previously reported
    /// discrepancies
    #[instrument(skip(self, discrepancies))]
    pub async fn reconcile(
        &self,
        user_key: &str,
        discrepancies: Vec<Discrepancy>,
    ) -> Result<ReconcileOutcome, Error> {
        let user_key = validate_user_key(user_key)?;
        self.gate().admit_spend(&user_key).await?;

        let mut summary = SeverityCounts::default();
        for discrepancy in &discrepancies {
            match discrepancy.severity {
                crate::reconcile::Severity::High => summary.high += 1,
                crate::reconcile::Severity::Medium => summary.medium += 1,
                crate::reconcile::Severity::Low => summary.low += 1,
            }
        }

        let actions = reconcile::apply_corrections(&self.localstore, &discrepancies).await?;

        Ok(ReconcileOutcome {
            actions,
            blocked: summary.high > 0,
            summary,
        })
    }

    /// One page of ledger history
    #[instrument(skip(self))]
    pub async fn get_history(
        &self,
        user_key: &str,
        filter: HistoryFilter,
    ) -> Result<HistoryPage, Error> {
        let user_key = validate_user_key(user_key)?;

        if filter.limit == 0 || filter.limit > 100 {
            return Err(Error::Custom(format!(
                "History limit must be within 1..=100, got {}",
                filter.limit
            )));
        }

        Ok(self.localstore.get_history(&user_key, filter).await?)
    }

    /// Transition a user's aged pending mints to failed
    #[instrument(skip(self))]
    pub async fn cleanup(
        &self,
        user_key: &str,
        dry_run: bool,
        max_age_secs: Option<u64>,
    ) -> Result<CleanupReport, Error> {
        let user_key = validate_user_key(user_key)?;
        self.monitor
            .cleanup(&self.localstore, &self.config, &user_key, max_age_secs, dry_run)
            .await
    }

    /// Pending population stats for one user
    #[instrument(skip(self))]
    pub async fn recovery_stats(&self, user_key: &str) -> Result<RecoveryStats, Error> {
        let user_key = validate_user_key(user_key)?;
        self.monitor
            .recovery_stats(&self.localstore, &self.config, &user_key)
            .await
    }

    /// Coordinator health: counters plus stuck-pending alerts
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<HealthReport, Error> {
        let counters = self.monitor.snapshot();
        let mut alerts = Vec::new();

        if let Some(alert) = self
            .monitor
            .check_stuck_alert(&self.localstore, &self.config)
            .await?
        {
            alerts.push(format!(
                "{} stuck pending mints across {} users, oldest {}s",
                alert.count, alert.users, alert.oldest_age_secs
            ));
        }

        let attempted = counters.mint.attempts + counters.completion.attempts;
        let status = if !alerts.is_empty() && counters.success_rate < 0.5 {
            HealthStatus::Critical
        } else if !alerts.is_empty() || (attempted > 0 && counters.success_rate < 0.9) {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        Ok(HealthReport {
            status,
            counters,
            alerts,
        })
    }

    /// Snapshot of the active pollers
    pub async fn poller_status(&self) -> Vec<PollerSnapshot> {
        self.pollers.status().await
    }

    /// Cancel all background work; call at process shutdown
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.pollers.cleanup_all().await;
    }

    pub(crate) fn parse_transaction_id(
        value: &str,
    ) -> Result<purse_common::ledger::TransactionId, Error> {
        purse_common::ledger::TransactionId::from_str(value)
            .map_err(|_| Error::Custom(format!("Malformed transaction id: `{value}`")))
    }
}
