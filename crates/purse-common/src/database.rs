//! Ledger database contract
//!
//! The ledger store is the single source of truth for proof ownership.
//! Implementations must enforce the status machine and value rules on
//! every write and provide the two multi-row atomic units used by send
//! and melt.

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error as ThisError;

use crate::amount::Amount;
use crate::ledger::{
    Balance, CompletionMethod, EntryId, EntryKind, EntryMetadata, EntryStatus, LedgerEntry,
    TransactionId,
};
use crate::mint_url::MintUrl;
use crate::proofs::Proofs;
use crate::user_key::UserKey;
use crate::wallet::WalletRecord;

/// Ledger database error
#[derive(Debug, ThisError)]
pub enum Error {
    /// Wallet uniqueness violated
    #[error("Wallet already exists for user at mint")]
    WalletAlreadyExists,
    /// Wallet not found
    #[error("Wallet not found")]
    WalletNotFound,
    /// Entry id already stored
    #[error("Duplicate entry: `{0}`")]
    DuplicateEntry(EntryId),
    /// Entry not found
    #[error("Entry not found: `{0}`")]
    EntryNotFound(EntryId),
    /// Disallowed status transition attempted
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: EntryStatus,
        /// Requested status
        to: EntryStatus,
    },
    /// Write would break a ledger value rule
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
    /// Not enough unspent funds to cover a selection
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        /// Total unspent available
        available: Amount,
        /// Amount requested
        required: Amount,
    },
    /// Backend failure
    #[error(transparent)]
    Database(Box<dyn std::error::Error + Send + Sync>),
}

/// Window selecting pending mint entries by age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWindow {
    /// Entries created before the cutoff
    OlderThan(u64),
    /// Entries created at or after the cutoff
    NewerThan(u64),
}

/// Resolution applied to a pending entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingUpdate {
    /// Fill the entry with proofs and mark it unspent
    Complete {
        /// Proofs issued by the mint
        proofs: Proofs,
        /// How the completion happened
        method: CompletionMethod,
        /// Amount the mint actually issued
        minted_amount: Amount,
    },
    /// Mark the entry failed
    Fail {
        /// Failure reason recorded in metadata
        reason: String,
    },
}

/// Result of a greedy spend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendSelection {
    /// Entries covering the requested amount, in insertion order
    pub entries: Vec<LedgerEntry>,
    /// Sum over the selected entries
    pub total_selected: Amount,
    /// Overshoot that will come back as change
    pub change_amount: Amount,
}

/// Entries created by an atomic melt commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeltCommit {
    /// Source entries transitioned to spent
    pub spent: usize,
    /// Change entry created from kept proofs
    pub change_entry: Option<LedgerEntry>,
    /// Melt-change entry created from returned fee reserve
    pub melt_change_entry: Option<LedgerEntry>,
}

/// History query filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Page size
    pub limit: usize,
    /// Entries to skip
    pub skip: usize,
    /// Restrict to one entry kind
    pub kind: Option<EntryKind>,
    /// Restrict to one mint
    pub mint_url: Option<MintUrl>,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            limit: 50,
            skip: 0,
            kind: None,
            mint_url: None,
        }
    }
}

/// Pagination info attached to a history page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Valid entries matching the filter
    pub total: usize,
    /// Corrupted rows dropped from the result
    pub invalid_filtered: usize,
    /// Whether more pages exist
    pub has_more: bool,
}

/// One page of ledger history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    /// Entries, newest first
    pub entries: Vec<LedgerEntry>,
    /// Pagination info
    pub pagination: Pagination,
}

/// Ledger database
#[async_trait]
pub trait LedgerDatabase: Debug {
    /// Error type
    type Err: Into<Error> + From<Error>;

    /// Store a new wallet; fails when `(user_key, mint_url)` already exists
    async fn create_wallet(&self, wallet: WalletRecord) -> Result<(), Self::Err>;

    /// Get wallet for user at mint
    async fn find_wallet(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Option<WalletRecord>, Self::Err>;

    /// Store a new ledger entry; validates value rules and uniqueness
    async fn store_entry(&self, entry: LedgerEntry) -> Result<(), Self::Err>;

    /// Get one entry by id
    async fn find_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>, Self::Err>;

    /// All entries for user at mint, any status, in insertion order
    async fn find_entries(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Vec<LedgerEntry>, Self::Err>;

    /// Unspent entries for user at mint, in insertion order
    async fn find_unspent(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Vec<LedgerEntry>, Self::Err>;

    /// All entries sharing a transaction id
    async fn find_by_transaction_id(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<LedgerEntry>, Self::Err>;

    /// Pending mint entries for user within an age window
    async fn find_pending_mints(
        &self,
        user_key: &UserKey,
        window: PendingWindow,
    ) -> Result<Vec<LedgerEntry>, Self::Err>;

    /// Pending mint entries across all users created before the cutoff
    async fn find_pending_older_than(&self, cutoff: u64) -> Result<Vec<LedgerEntry>, Self::Err>;

    /// Count pending mints for user created at or after the cutoff
    async fn count_pending_mints(
        &self,
        user_key: &UserKey,
        newer_than: u64,
    ) -> Result<usize, Self::Err>;

    /// Resolve a pending entry; enforces the allowed transitions
    async fn update_pending(
        &self,
        entry_id: &EntryId,
        update: PendingUpdate,
    ) -> Result<LedgerEntry, Self::Err>;

    /// Transition unspent entries to spent; idempotent, returns the count
    /// actually transitioned
    async fn mark_spent(&self, entry_ids: &[EntryId]) -> Result<usize, Self::Err>;

    /// Greedy selection of unspent entries covering `amount`
    async fn select_for_spend(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
        amount: Amount,
    ) -> Result<SpendSelection, Self::Err>;

    /// Atomic send unit: mark sources spent, store the sent history entry
    /// and the optional change entry in one commit
    async fn execute_atomic_send(
        &self,
        source_entry_ids: &[EntryId],
        sent_entry: LedgerEntry,
        change_entry: Option<LedgerEntry>,
    ) -> Result<(), Self::Err>;

    /// Atomic melt unit: mark sources spent, create a change entry from
    /// `keep_proofs` and a melt-change entry from `melt_change_proofs`,
    /// all in one commit
    async fn execute_atomic_melt(
        &self,
        source_entry_ids: &[EntryId],
        keep_proofs: Proofs,
        melt_change_proofs: Proofs,
        transaction_id: TransactionId,
        common_metadata: EntryMetadata,
    ) -> Result<MeltCommit, Self::Err>;

    /// One page of history, corrupted rows filtered and counted
    async fn get_history(
        &self,
        user_key: &UserKey,
        filter: HistoryFilter,
    ) -> Result<HistoryPage, Self::Err>;

    /// Balance breakdown for user at mint
    async fn get_balance(
        &self,
        user_key: &UserKey,
        mint_url: &MintUrl,
    ) -> Result<Balance, Self::Err>;
}
