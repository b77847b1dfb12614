//! Proof ledger model
//!
//! A ledger entry is the only durable record of proof ownership on the
//! wallet side: a bundle of proofs tied to one user, one wallet and one
//! logical operation. Entries move through a restricted status machine and
//! carry their operation context in structured metadata.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::mint_url::MintUrl;
use crate::proofs::{Proofs, ProofsMethods};
use crate::user_key::UserKey;
use crate::util::unix_time;
use crate::wallet::WalletId;

/// Ledger entry id
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generate a fresh entry id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Client-generated id linking every ledger entry of one logical operation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a fresh transaction id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// What a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Proofs issued against a paid mint quote
    Minted,
    /// Proofs received from an encoded token
    Received,
    /// Proofs sent to another party, preserved for history
    Sent,
    /// Remainder proofs kept back from a send
    Change,
    /// Unused fee reserve returned by a melt
    MeltChange,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minted => write!(f, "minted"),
            Self::Received => write!(f, "received"),
            Self::Sent => write!(f, "sent"),
            Self::Change => write!(f, "change"),
            Self::MeltChange => write!(f, "melt_change"),
        }
    }
}

impl FromStr for EntryKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minted" => Ok(Self::Minted),
            "received" => Ok(Self::Received),
            "sent" => Ok(Self::Sent),
            "change" => Ok(Self::Change),
            "melt_change" => Ok(Self::MeltChange),
            _ => Err(crate::error::Error::Custom(format!(
                "Unknown entry kind: {s}"
            ))),
        }
    }
}

/// Entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Mint awaiting payment; holds no proofs
    Pending,
    /// Proofs spendable by the wallet
    Unspent,
    /// Proofs redeemed at the mint
    Spent,
    /// Operation failed; holds no proofs
    Failed,
}

impl EntryStatus {
    /// Whether the transition `self -> to` is allowed
    pub fn can_transition_to(&self, to: EntryStatus) -> bool {
        matches!(
            (self, to),
            (EntryStatus::Pending, EntryStatus::Unspent)
                | (EntryStatus::Pending, EntryStatus::Failed)
                | (EntryStatus::Unspent, EntryStatus::Spent)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Unspent => write!(f, "unspent"),
            Self::Spent => write!(f, "spent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How a pending mint was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMethod {
    /// Completed by the background poller
    Poller,
    /// Completed by an explicit facade call
    Explicit,
    /// Completed by the pending-receipt sweep
    ReceiptCheck,
}

/// Structured operation context carried by every entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Originating operation tag; mandatory and non-empty
    pub source: String,
    /// Mint or melt quote id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    /// Requested mint amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_amount: Option<Amount>,
    /// Lightning invoice tied to the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    /// Quote expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    /// Melt fee reserve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_reserve: Option<Amount>,
    /// Final payment state of a melt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_result: Option<String>,
    /// Payment preimage of a settled melt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    /// Recipient pubkey of a send
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Why the entry failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the entry failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<u64>,
    /// When a pending mint was completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// How a pending mint was completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_method: Option<CompletionMethod>,
    /// Amount the mint actually issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minted_amount: Option<Amount>,
    /// Number of proofs issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_count: Option<usize>,
    /// Free-form extension fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EntryMetadata {
    /// Metadata with only a source tag
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Metadata for a pending mint entry
    pub fn pending_mint(
        quote_id: String,
        mint_amount: Amount,
        invoice: String,
        expiry: Option<u64>,
    ) -> Self {
        Self {
            source: "mint".to_string(),
            quote_id: Some(quote_id),
            mint_amount: Some(mint_amount),
            invoice: Some(invoice),
            expiry,
            ..Default::default()
        }
    }
}

/// One row of the proof ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id
    pub id: EntryId,
    /// Owning user
    pub user_key: UserKey,
    /// Owning wallet
    pub wallet_id: WalletId,
    /// Mint the proofs belong to
    pub mint_url: MintUrl,
    /// Logical operation this entry belongs to
    pub transaction_id: TransactionId,
    /// What the entry records
    pub kind: EntryKind,
    /// Entry status
    pub status: EntryStatus,
    /// Proof bundle; empty for pending and failed entries
    pub proofs: Proofs,
    /// Sum of proof amounts; zero for pending and failed entries
    pub total_amount: Amount,
    /// Creation time
    pub created_at: u64,
    /// When the proofs were spent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent_at: Option<u64>,
    /// Operation context
    pub metadata: EntryMetadata,
}

impl LedgerEntry {
    /// New pending entry, holding no proofs yet
    pub fn pending(
        user_key: UserKey,
        wallet_id: WalletId,
        mint_url: MintUrl,
        transaction_id: TransactionId,
        kind: EntryKind,
        metadata: EntryMetadata,
    ) -> Self {
        Self {
            id: EntryId::new(),
            user_key,
            wallet_id,
            mint_url,
            transaction_id,
            kind,
            status: EntryStatus::Pending,
            proofs: Vec::new(),
            total_amount: Amount::ZERO,
            created_at: unix_time(),
            spent_at: None,
            metadata,
        }
    }

    /// New proof-bearing entry
    #[allow(clippy::too_many_arguments)]
    pub fn with_proofs(
        user_key: UserKey,
        wallet_id: WalletId,
        mint_url: MintUrl,
        transaction_id: TransactionId,
        kind: EntryKind,
        status: EntryStatus,
        proofs: Proofs,
        metadata: EntryMetadata,
    ) -> Self {
        let total_amount = proofs.total_amount();
        let now = unix_time();

        Self {
            id: EntryId::new(),
            user_key,
            wallet_id,
            mint_url,
            transaction_id,
            kind,
            status,
            proofs,
            total_amount,
            created_at: now,
            spent_at: (status == EntryStatus::Spent).then_some(now),
            metadata,
        }
    }

    /// Check the entry against the ledger value rules
    pub fn validate(&self) -> Result<(), String> {
        if self.metadata.source.trim().is_empty() {
            return Err("metadata.source must be non-empty".to_string());
        }

        match self.status {
            EntryStatus::Pending | EntryStatus::Failed => {
                if !self.proofs.is_empty() {
                    return Err(format!("{} entry must hold no proofs", self.status));
                }
                if self.total_amount != Amount::ZERO {
                    return Err(format!("{} entry must have zero total", self.status));
                }
            }
            EntryStatus::Unspent | EntryStatus::Spent => {
                if self.total_amount != self.proofs.total_amount() {
                    return Err("total_amount must equal proof sum".to_string());
                }
            }
        }

        match self.status {
            EntryStatus::Spent => {
                if self.spent_at.is_none() {
                    return Err("spent entry must record spent_at".to_string());
                }
            }
            _ => {
                if self.spent_at.is_some() {
                    return Err("spent_at is only valid on spent entries".to_string());
                }
            }
        }

        Ok(())
    }
}

/// Per-wallet balance breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable balance; equals the unspent component
    pub total: Amount,
    /// Sum over unspent entries
    pub unspent: Amount,
    /// Sum of requested amounts over pending mints
    pub pending: Amount,
    /// Sum over spent entries
    pub spent: Amount,
}
