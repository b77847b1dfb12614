//! Errors
//!
//! The coordinator is the propagation boundary: components below it raise
//! these typed errors, the facade returns them to callers unchanged.
//! Critical-class errors are never retried automatically.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error as ThisError;

use crate::amount::Amount;
use crate::database;
use crate::ledger::TransactionId;
use crate::protocol::QuoteState;

/// Coordinator error
#[derive(Debug, ThisError)]
pub enum Error {
    /// Malformed user key
    #[error(transparent)]
    UserKey(#[from] crate::user_key::Error),
    /// Amount outside the accepted range
    #[error("Amount {amount} outside [{min}, {max}]")]
    AmountOutOfRange {
        /// Requested amount
        amount: Amount,
        /// Minimum accepted
        min: Amount,
        /// Maximum accepted
        max: Amount,
    },
    /// No wallet for user at mint
    #[error("Wallet not found")]
    WalletNotFound,
    /// Too many unresolved pending mints in the lookback window
    #[error("Pending mint limit reached: {count} of {limit}")]
    PendingLimitExceeded {
        /// Current pending count
        count: usize,
        /// Configured cap
        limit: usize,
    },
    /// Invoice could not be parsed
    #[error(transparent)]
    Invoice(#[from] lightning_invoice::ParseOrSemanticError),
    /// Invoice carries no amount
    #[error("Invoice amount undefined")]
    InvoiceAmountUndefined,

    /// Mint could not be reached
    #[error("Mint transport error: {0}")]
    Transport(String),
    /// Mint refused the request
    #[error("Mint rejected request: {0}")]
    Mint(ErrorResponse),

    /// Quote is not known to the mint
    #[error("Quote unknown")]
    QuoteUnknown,
    /// Quote expired before payment
    #[error("Quote expired")]
    QuoteExpired,
    /// Quote is not in the paid state
    #[error("Quote not paid: {state}")]
    QuoteNotPaid {
        /// State reported by the mint
        state: QuoteState,
    },
    /// Quote state moved away from paid mid-completion
    #[error("Quote state changed during completion: {state}")]
    QuoteStateChanged {
        /// State observed after the change
        state: QuoteState,
    },
    /// Lightning payment did not settle
    #[error("Payment failed: {state}")]
    PaymentFailed {
        /// Final payment state
        state: QuoteState,
    },
    /// Token references a different mint than the wallet
    #[error("Token mint does not match wallet mint")]
    MintMismatch,

    /// Pre-flight reconciliation found high severity discrepancies
    #[error("Proof state inconsistency: {high} high severity discrepancies, {corrected} entries corrected")]
    ProofStateInconsistency {
        /// High severity discrepancy count
        high: usize,
        /// Ledger entries corrected before refusing
        corrected: usize,
    },

    /// Mint consumed proofs but the ledger commit failed
    ///
    /// Carries the identifiers needed to reconcile out of band. Never
    /// retried automatically.
    #[error("Critical: ledger commit failed after mint success (quote {quote_id}, transaction {transaction_id})")]
    DbFailureAfterMintSuccess {
        /// Melt quote that was paid
        quote_id: String,
        /// Operation whose commit failed
        transaction_id: TransactionId,
        /// Payment state reported by the mint
        payment_result: String,
        /// Underlying store error
        detail: String,
    },

    /// Poller exhausted its budget
    #[error("Polling timeout")]
    PollingTimeout,
    /// A poller for the same quote is already active
    #[error("Poller already active for quote `{quote_id}`")]
    PollerAlreadyActive {
        /// Quote already being polled
        quote_id: String,
    },

    /// Ledger store error
    #[error(transparent)]
    Database(#[from] database::Error),
    /// Token error
    #[error(transparent)]
    Token(#[from] crate::token::Error),
    /// Mint url error
    #[error(transparent)]
    MintUrl(#[from] crate::mint_url::Error),
    /// Cipher error
    #[error(transparent)]
    Cipher(#[from] crate::secrets::Error),
    /// Json error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Custom error
    #[error("`{0}`")]
    Custom(String),
}

impl Error {
    /// Transport-kind error from any displayable failure
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether the error requires out-of-band intervention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::DbFailureAfterMintSuccess { .. } | Self::ProofStateInconsistency { .. }
        )
    }
}

/// Error body returned by the mint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Mint error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Human readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// Parse an error body from a response value, falling back to the raw
    /// text when the body is not the expected shape
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<ErrorResponse>(value.clone()) {
            Ok(res) => res,
            Err(_) => Self {
                code: None,
                detail: Some(value.to_string()),
            },
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.detail) {
            (Some(code), Some(detail)) => write!(f, "code {code}: {detail}"),
            (Some(code), None) => write!(f, "code {code}"),
            (None, Some(detail)) => write!(f, "{detail}"),
            (None, None) => write!(f, "unknown mint error"),
        }
    }
}
