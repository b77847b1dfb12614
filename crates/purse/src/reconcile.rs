//! Ledger / oracle reconciliation
//!
//! Before any fund-moving operation the coordinator compares the ledger's
//! view of the candidate proofs with the mint oracle. Divergences are
//! classified by severity; high severity blocks the operation even after
//! the ledger has been corrected, because the funds are ambiguous.

use std::collections::{HashMap, HashSet};

use purse_common::database::PendingUpdate;
use purse_common::ledger::{EntryId, EntryStatus, LedgerEntry, TransactionId};
use purse_common::protocol::{CheckStateRequest, ProofSpendState, ProofStateEntry};
use purse_common::{Amount, Error};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::client::MintHandle;
use crate::retry::with_retry;
use crate::LocalStore;

/// Discrepancy severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational only
    Low,
    /// Corrected deterministically, operation allowed
    Medium,
    /// Funds ambiguous, operation blocked
    High,
}

/// How ledger and oracle disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// Ledger unspent, oracle spent
    DbUnspentMintSpent,
    /// Ledger pending, oracle spent
    DbPendingMintSpent,
    /// Ledger spent, oracle unspent
    DbSpentMintUnspent,
    /// Oracle knows a proof the ledger does not
    ProofNotInDb,
    /// Ledger unspent, oracle pending
    DbUnspentMintPending,
}

/// One ledger/oracle divergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Proof secret
    pub secret: String,
    /// Ledger entry holding the proof
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
    /// Operation of that entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    /// Ledger status of the entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_status: Option<EntryStatus>,
    /// Oracle state of the proof
    pub oracle_state: ProofSpendState,
    /// Divergence type
    pub kind: DiscrepancyKind,
    /// Severity
    pub severity: Severity,
    /// Proof amount
    pub amount: Amount,
}

/// Discrepancy counts by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    /// High severity count
    pub high: usize,
    /// Medium severity count
    pub medium: usize,
    /// Low severity count
    pub low: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    /// Total discrepancies
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Correction applied while reconciling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ReconcileAction {
    /// Entry transitioned unspent to spent
    MarkedSpent {
        /// Corrected entry
        entry_id: EntryId,
    },
    /// Pending entry transitioned to failed
    MarkedFailed {
        /// Corrected entry
        entry_id: EntryId,
    },
    /// Divergence recorded for investigation
    Logged {
        /// Proof secret
        secret: String,
        /// Divergence type
        kind: DiscrepancyKind,
    },
}

/// Result of a pre-flight check that allowed the operation
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    /// Divergences found
    pub discrepancies: Vec<Discrepancy>,
    /// Counts by severity
    pub counts: SeverityCounts,
    /// Corrections applied
    pub actions: Vec<ReconcileAction>,
}

/// Ledger-side view of one proof
#[derive(Debug, Clone)]
pub(crate) struct LocalProofView {
    pub entry_id: EntryId,
    pub transaction_id: TransactionId,
    pub status: EntryStatus,
    pub amount: Amount,
}

/// Classify one ledger/oracle pair; `None` means consistent
pub fn classify(
    local: Option<EntryStatus>,
    oracle: ProofSpendState,
) -> Option<(DiscrepancyKind, Severity)> {
    match (local, oracle) {
        (Some(EntryStatus::Unspent), ProofSpendState::Spent) => {
            Some((DiscrepancyKind::DbUnspentMintSpent, Severity::High))
        }
        (Some(EntryStatus::Pending), ProofSpendState::Spent) => {
            Some((DiscrepancyKind::DbPendingMintSpent, Severity::Medium))
        }
        (Some(EntryStatus::Spent), ProofSpendState::Unspent) => {
            Some((DiscrepancyKind::DbSpentMintUnspent, Severity::Medium))
        }
        (None, _) => Some((DiscrepancyKind::ProofNotInDb, Severity::Low)),
        (Some(EntryStatus::Unspent), ProofSpendState::Pending) => {
            Some((DiscrepancyKind::DbUnspentMintPending, Severity::Low))
        }
        _ => None,
    }
}

/// Index candidate entries by proof secret
pub(crate) fn index_entries(entries: &[LedgerEntry]) -> HashMap<String, LocalProofView> {
    let mut local = HashMap::new();
    for entry in entries {
        for proof in &entry.proofs {
            local.insert(
                proof.secret.clone(),
                LocalProofView {
                    entry_id: entry.id,
                    transaction_id: entry.transaction_id,
                    status: entry.status,
                    amount: proof.amount,
                },
            );
        }
    }
    local
}

/// Attach ledger context to every oracle answer and classify
pub(crate) fn cross_walk(
    local: &HashMap<String, LocalProofView>,
    states: &[ProofStateEntry],
) -> (Vec<Discrepancy>, SeverityCounts) {
    let mut discrepancies = Vec::new();
    let mut counts = SeverityCounts::default();

    for state in states {
        let view = local.get(&state.secret);
        if let Some((kind, severity)) = classify(view.map(|v| v.status), state.state) {
            counts.record(severity);
            discrepancies.push(Discrepancy {
                secret: state.secret.clone(),
                entry_id: view.map(|v| v.entry_id),
                transaction_id: view.map(|v| v.transaction_id),
                local_status: view.map(|v| v.status),
                oracle_state: state.state,
                kind,
                severity,
                amount: view.map(|v| v.amount).unwrap_or(Amount::ZERO),
            });
        }
    }

    (discrepancies, counts)
}

/// Apply the deterministic corrections for a set of discrepancies
pub(crate) async fn apply_corrections(
    store: &LocalStore,
    discrepancies: &[Discrepancy],
) -> Result<Vec<ReconcileAction>, Error> {
    let mut actions = Vec::new();
    let mut spent_targets: Vec<EntryId> = Vec::new();
    let mut failed_targets: HashSet<EntryId> = HashSet::new();

    for discrepancy in discrepancies {
        match discrepancy.kind {
            DiscrepancyKind::DbUnspentMintSpent => {
                if let Some(entry_id) = discrepancy.entry_id {
                    if !spent_targets.contains(&entry_id) {
                        spent_targets.push(entry_id);
                    }
                }
            }
            DiscrepancyKind::DbPendingMintSpent => {
                if let Some(entry_id) = discrepancy.entry_id {
                    failed_targets.insert(entry_id);
                }
            }
            DiscrepancyKind::DbSpentMintUnspent => {
                tracing::warn!(
                    "Proof `{}` spent locally but unspent at mint, flagged for investigation",
                    discrepancy.secret
                );
                actions.push(ReconcileAction::Logged {
                    secret: discrepancy.secret.clone(),
                    kind: discrepancy.kind,
                });
            }
            DiscrepancyKind::ProofNotInDb | DiscrepancyKind::DbUnspentMintPending => {
                tracing::debug!(
                    "Proof `{}` divergence {:?} noted",
                    discrepancy.secret,
                    discrepancy.kind
                );
                actions.push(ReconcileAction::Logged {
                    secret: discrepancy.secret.clone(),
                    kind: discrepancy.kind,
                });
            }
        }
    }

    if !spent_targets.is_empty() {
        store.mark_spent(&spent_targets).await?;
        actions.extend(
            spent_targets
                .iter()
                .map(|entry_id| ReconcileAction::MarkedSpent { entry_id: *entry_id }),
        );
    }

    for entry_id in failed_targets {
        store
            .update_pending(
                &entry_id,
                PendingUpdate::Fail {
                    reason: "Proofs reported spent by mint".to_string(),
                },
            )
            .await?;
        actions.push(ReconcileAction::MarkedFailed { entry_id });
    }

    Ok(actions)
}

/// Pre-flight reconciliation over the proofs an operation intends to spend
///
/// High severity divergences correct the ledger and then fail the
/// operation with [`Error::ProofStateInconsistency`]; medium and low ones
/// are corrected or logged and the operation proceeds.
#[instrument(skip_all, fields(entries = selection.len()))]
pub async fn preflight(
    handle: &MintHandle,
    store: &LocalStore,
    selection: &[LedgerEntry],
) -> Result<PreflightReport, Error> {
    let local = index_entries(selection);

    if local.is_empty() {
        return Ok(PreflightReport::default());
    }

    let secrets: Vec<String> = local.keys().cloned().collect();
    let response = with_retry(|| {
        handle.post_check_state(CheckStateRequest {
            secrets: secrets.clone(),
        })
    })
    .await?;

    let (discrepancies, counts) = cross_walk(&local, &response.states);

    if counts.high > 0 {
        let actions = apply_corrections(store, &discrepancies).await?;
        let corrected = actions
            .iter()
            .filter(|a| matches!(a, ReconcileAction::MarkedSpent { .. }))
            .count();

        tracing::error!(
            "Pre-flight blocked: {} high severity discrepancies, {} entries corrected",
            counts.high,
            corrected
        );

        return Err(Error::ProofStateInconsistency {
            high: counts.high,
            corrected,
        });
    }

    let actions = if counts.total() > 0 {
        apply_corrections(store, &discrepancies).await?
    } else {
        Vec::new()
    };

    Ok(PreflightReport {
        discrepancies,
        counts,
        actions,
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use purse_common::ledger::{EntryKind, EntryMetadata};
    use purse_common::proofs::Proof;
    use purse_common::protocol::ProofSpendState;
    use purse_common::wallet::WalletId;
    use purse_common::{Amount, MintUrl, UserKey};

    use super::*;
    use crate::client::MintHandle;
    use crate::database::{LedgerDatabase, LedgerMemoryDatabase};
    use crate::test_utils::{FakeMintConnector, FAKE_MINT_URL};

    fn user() -> UserKey {
        UserKey::from_str("7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e")
            .unwrap()
    }

    fn mint_url() -> MintUrl {
        MintUrl::from_str(FAKE_MINT_URL).unwrap()
    }

    fn proof(amount: u64, secret: &str) -> Proof {
        Proof {
            amount: Amount::from(amount),
            secret: secret.to_string(),
            c: "02aa".to_string(),
            keyset_id: "00ad268c4d1f5826".to_string(),
            witness: None,
        }
    }

    fn unspent_entry(amount: u64, secret: &str) -> LedgerEntry {
        LedgerEntry::with_proofs(
            user(),
            WalletId::new(),
            mint_url(),
            TransactionId::new(),
            EntryKind::Minted,
            EntryStatus::Unspent,
            vec![proof(amount, secret)],
            EntryMetadata::from_source("mint"),
        )
    }

    #[test]
    fn test_cross_walk_attaches_ledger_context() {
        let entry = unspent_entry(64, "watched");
        let local = index_entries(std::slice::from_ref(&entry));

        let states = vec![
            ProofStateEntry {
                secret: "watched".to_string(),
                state: ProofSpendState::Spent,
            },
            ProofStateEntry {
                secret: "unknown".to_string(),
                state: ProofSpendState::Unspent,
            },
        ];

        let (discrepancies, counts) = cross_walk(&local, &states);

        assert_eq!(counts.high, 1);
        assert_eq!(counts.low, 1);
        assert_eq!(counts.total(), 2);

        let high = discrepancies
            .iter()
            .find(|d| d.severity == Severity::High)
            .unwrap();
        assert_eq!(high.entry_id, Some(entry.id));
        assert_eq!(high.transaction_id, Some(entry.transaction_id));
        assert_eq!(high.local_status, Some(EntryStatus::Unspent));
        assert_eq!(high.amount, Amount::from(64));

        let low = discrepancies
            .iter()
            .find(|d| d.severity == Severity::Low)
            .unwrap();
        assert_eq!(low.kind, DiscrepancyKind::ProofNotInDb);
        assert_eq!(low.entry_id, None);
    }

    #[tokio::test]
    async fn test_preflight_allows_consistent_selection() {
        let db = LedgerMemoryDatabase::default();
        let store: crate::LocalStore = Arc::new(db.clone());
        let fake = Arc::new(FakeMintConnector::new());

        let entry = unspent_entry(64, "clean");
        db.store_entry(entry.clone()).await.unwrap();

        let handle = MintHandle::open(fake).await.unwrap();
        let report = preflight(&handle, &store, &[entry]).await.unwrap();

        assert!(report.discrepancies.is_empty());
        assert_eq!(report.counts.total(), 0);
    }

    #[tokio::test]
    async fn test_preflight_blocks_and_corrects_on_high() {
        let db = LedgerMemoryDatabase::default();
        let store: crate::LocalStore = Arc::new(db.clone());
        let fake = Arc::new(FakeMintConnector::new());

        let entry = unspent_entry(64, "burned");
        db.store_entry(entry.clone()).await.unwrap();
        fake.set_proof_state("burned", ProofSpendState::Spent).await;

        let handle = MintHandle::open(fake).await.unwrap();
        let result = preflight(&handle, &store, &[entry.clone()]).await;

        assert!(matches!(
            result,
            Err(Error::ProofStateInconsistency {
                high: 1,
                corrected: 1
            })
        ));

        let corrected = db.find_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(corrected.status, EntryStatus::Spent);
    }

    #[tokio::test]
    async fn test_preflight_allows_low_severity() {
        let db = LedgerMemoryDatabase::default();
        let store: crate::LocalStore = Arc::new(db.clone());
        let fake = Arc::new(FakeMintConnector::new());

        let entry = unspent_entry(64, "reserved");
        db.store_entry(entry.clone()).await.unwrap();
        fake.set_proof_state("reserved", ProofSpendState::Pending)
            .await;

        let handle = MintHandle::open(fake).await.unwrap();
        let report = preflight(&handle, &store, &[entry.clone()]).await.unwrap();

        assert_eq!(report.counts.low, 1);
        assert_eq!(report.counts.high, 0);

        // entry untouched, only logged
        let unchanged = db.find_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, EntryStatus::Unspent);
    }

    #[tokio::test]
    async fn test_apply_corrections_dedupes_entries() {
        let db = LedgerMemoryDatabase::default();
        let store: crate::LocalStore = Arc::new(db.clone());

        let entry = LedgerEntry::with_proofs(
            user(),
            WalletId::new(),
            mint_url(),
            TransactionId::new(),
            EntryKind::Minted,
            EntryStatus::Unspent,
            vec![proof(32, "one"), proof(32, "two")],
            EntryMetadata::from_source("mint"),
        );
        db.store_entry(entry.clone()).await.unwrap();

        // both proofs of the same entry diverge; only one correction runs
        let discrepancies: Vec<Discrepancy> = ["one", "two"]
            .iter()
            .map(|secret| Discrepancy {
                secret: secret.to_string(),
                entry_id: Some(entry.id),
                transaction_id: Some(entry.transaction_id),
                local_status: Some(EntryStatus::Unspent),
                oracle_state: ProofSpendState::Spent,
                kind: DiscrepancyKind::DbUnspentMintSpent,
                severity: Severity::High,
                amount: Amount::from(32),
            })
            .collect();

        let actions = apply_corrections(&store, &discrepancies).await.unwrap();
        let marked: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, ReconcileAction::MarkedSpent { .. }))
            .collect();
        assert_eq!(marked.len(), 1);
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(
            classify(Some(EntryStatus::Unspent), ProofSpendState::Spent),
            Some((DiscrepancyKind::DbUnspentMintSpent, Severity::High))
        );
        assert_eq!(
            classify(Some(EntryStatus::Pending), ProofSpendState::Spent),
            Some((DiscrepancyKind::DbPendingMintSpent, Severity::Medium))
        );
        assert_eq!(
            classify(Some(EntryStatus::Spent), ProofSpendState::Unspent),
            Some((DiscrepancyKind::DbSpentMintUnspent, Severity::Medium))
        );
        assert_eq!(
            classify(None, ProofSpendState::Unspent),
            Some((DiscrepancyKind::ProofNotInDb, Severity::Low))
        );
        assert_eq!(
            classify(Some(EntryStatus::Unspent), ProofSpendState::Pending),
            Some((DiscrepancyKind::DbUnspentMintPending, Severity::Low))
        );
    }

    #[test]
    fn test_consistent_pairs_not_flagged() {
        assert_eq!(classify(Some(EntryStatus::Unspent), ProofSpendState::Unspent), None);
        assert_eq!(classify(Some(EntryStatus::Spent), ProofSpendState::Spent), None);
        assert_eq!(classify(Some(EntryStatus::Failed), ProofSpendState::Spent), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
