//! Facade response payloads

use purse_common::ledger::{EntryId, TransactionId};
use purse_common::protocol::QuoteState;
use purse_common::{Amount, MintUrl, Proofs};
use serde::{Deserialize, Serialize};

use crate::monitor::CounterSnapshot;
use crate::reconcile::{Discrepancy, ReconcileAction, SeverityCounts};

/// Wallet surface returned by create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Mint the wallet lives at
    pub mint_url: MintUrl,
    /// Ecash p2pk public key
    pub p2pk_pubkey: String,
}

/// Result of starting a mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintPending {
    /// Mint quote id
    pub quote_id: String,
    /// Lightning invoice to pay
    pub invoice: String,
    /// Operation id
    pub transaction_id: TransactionId,
    /// Quote expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// Result of completing a mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedMint {
    /// Operation id
    pub transaction_id: TransactionId,
    /// Ledger entry now holding the proofs
    pub entry_id: EntryId,
    /// Issued proofs
    pub proofs: Proofs,
    /// Amount issued
    pub total_amount: Amount,
    /// Whether an earlier completion already produced the entry
    #[serde(default)]
    pub already_completed: bool,
}

/// Result of a send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// Encoded token for the recipient
    pub encoded_token: String,
    /// Operation id
    pub transaction_id: TransactionId,
    /// Change returned to the wallet
    pub change_amount: Amount,
}

/// Result of a receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveResult {
    /// Operation id
    pub transaction_id: TransactionId,
    /// Amount received
    pub total_amount: Amount,
}

/// Result of a melt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltResult {
    /// Operation id
    pub transaction_id: TransactionId,
    /// Final payment state
    pub payment_result: QuoteState,
    /// Invoice amount paid
    pub paid_amount: Amount,
    /// Fee reserve charged
    pub fees_paid: Amount,
    /// Unused reserve returned to the wallet
    pub change_amount: Amount,
    /// Payment preimage when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
}

/// Oracle state of one checked proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedProofState {
    /// Proof secret
    pub secret: String,
    /// Oracle state
    pub state: purse_common::protocol::ProofSpendState,
}

/// Report of a proof state check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCheckReport {
    /// Oracle states, one per checked proof
    pub states: Vec<CheckedProofState>,
    /// Divergences between ledger and oracle
    pub discrepancies: Vec<Discrepancy>,
    /// Discrepancy counts by severity
    pub severity_counts: SeverityCounts,
    /// Whether ledger and oracle agree
    pub consistent: bool,
}

/// Result of applying reconciliation corrections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Corrections applied
    pub actions: Vec<ReconcileAction>,
    /// Whether fund-moving operations were blocked
    pub blocked: bool,
    /// Discrepancy counts by severity
    pub summary: SeverityCounts,
}

/// Result of the pending receipt sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReceipts {
    /// Pending mints checked against the oracle
    pub checked: usize,
    /// Mints completed by the sweep
    pub completed: usize,
    /// Completions performed
    pub receipts: Vec<CompletedMint>,
}

/// Result of a pending cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Aged pending entries considered
    pub processed: usize,
    /// Entries transitioned to failed
    pub cleaned: usize,
    /// Entries that could not be transitioned
    pub failed: usize,
    /// Whether this was a dry run
    #[serde(default)]
    pub dry_run: bool,
}

/// Overall coordinator health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Degraded but serving
    Warning,
    /// Requires operator attention
    Critical,
}

/// Health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Operation counters
    pub counters: CounterSnapshot,
    /// Active alerts
    pub alerts: Vec<String>,
}

/// Recovery statistics for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Pending mints on record
    pub total_pending: usize,
    /// Pending mints older than the stuck threshold
    pub stuck_one_hour: usize,
    /// Transactions of the pending mints
    pub transactions: Vec<TransactionId>,
}
