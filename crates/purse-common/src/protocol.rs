//! Mint wire protocol
//!
//! Request and response bodies for the mint's REST interface. The mint is
//! authoritative for quote and proof states; the coordinator only maps its
//! answers onto the local ledger.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::proofs::Proofs;

/// State of a mint or melt quote as reported by the mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteState {
    /// Quote has not been paid
    Unpaid,
    /// Quote has been paid
    Paid,
    /// Quote expired before payment
    Expired,
    /// Payment is in flight
    Pending,
}

impl std::fmt::Display for QuoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Paid => write!(f, "PAID"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Pending => write!(f, "PENDING"),
        }
    }
}

/// State of a proof as reported by the mint oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProofSpendState {
    /// Proof has not been redeemed
    Unspent,
    /// Proof has been redeemed
    Spent,
    /// Proof is reserved by an in-flight operation
    Pending,
}

impl std::fmt::Display for ProofSpendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspent => write!(f, "UNSPENT"),
            Self::Spent => write!(f, "SPENT"),
            Self::Pending => write!(f, "PENDING"),
        }
    }
}

/// Mint metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintInfo {
    /// Mint name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Mint software version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Long description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Keyset metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeysetInfo {
    /// Keyset id
    pub id: String,
    /// Keyset unit
    pub unit: String,
    /// Whether the keyset is active for new signatures
    pub active: bool,
}

/// Keysets response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetsResponse {
    /// Keysets of the mint
    pub keysets: Vec<KeysetInfo>,
}

/// Mint quote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteRequest {
    /// Amount to mint
    pub amount: Amount,
    /// Wallet unit
    pub unit: String,
}

/// Mint quote response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteResponse {
    /// Quote id
    pub quote: String,
    /// Lightning invoice to pay
    pub request: String,
    /// Quote state
    pub state: QuoteState,
    /// Unix expiry of the quote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// Mint request, redeeming a paid quote for proofs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    /// Quote id being redeemed
    pub quote: String,
    /// Amount expected
    pub amount: Amount,
}

/// Mint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintResponse {
    /// Freshly signed proofs
    pub proofs: Proofs,
}

/// Melt quote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuoteRequest {
    /// Bolt11 invoice to pay
    pub request: String,
    /// Wallet unit
    pub unit: String,
}

/// Melt quote response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuoteResponse {
    /// Quote id
    pub quote: String,
    /// Invoice amount
    pub amount: Amount,
    /// Fee reserve required on top of the amount
    pub fee_reserve: Amount,
    /// Unix expiry of the quote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// Swap request, trading proofs in for a split of proofs out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Proofs handed to the mint
    pub inputs: Proofs,
    /// Target amount for the send side of the split
    pub amount: Amount,
    /// Whether the split must also cover melt fees
    #[serde(default)]
    pub include_fees: bool,
    /// Pubkey to lock the send side to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
}

/// Swap response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResponse {
    /// Proofs totalling the requested amount
    pub send: Proofs,
    /// Remainder proofs kept by the wallet
    pub keep: Proofs,
}

/// Melt request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltRequest {
    /// Melt quote being paid
    pub quote: String,
    /// Proofs covering amount plus fee reserve
    pub inputs: Proofs,
}

/// Melt response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltResponse {
    /// Payment state
    pub state: QuoteState,
    /// Payment preimage when settled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    /// Unused fee reserve returned as proofs
    #[serde(default)]
    pub change: Proofs,
}

/// Check state request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStateRequest {
    /// Secrets of the proofs to check
    pub secrets: Vec<String>,
}

/// Oracle state of one proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStateEntry {
    /// Proof secret
    pub secret: String,
    /// Oracle state
    pub state: ProofSpendState,
}

/// Check state response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStateResponse {
    /// States, one per requested secret
    pub states: Vec<ProofStateEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_state_wire_form() {
        assert_eq!(
            serde_json::to_string(&QuoteState::Paid).unwrap(),
            "\"PAID\""
        );
        let state: QuoteState = serde_json::from_str("\"UNPAID\"").unwrap();
        assert_eq!(state, QuoteState::Unpaid);
    }

    #[test]
    fn test_proof_state_wire_form() {
        assert_eq!(
            serde_json::to_string(&ProofSpendState::Spent).unwrap(),
            "\"SPENT\""
        );
        let state: ProofSpendState = serde_json::from_str("\"PENDING\"").unwrap();
        assert_eq!(state, ProofSpendState::Pending);
    }

    #[test]
    fn test_melt_response_defaults_change() {
        let res: MeltResponse = serde_json::from_str("{\"state\":\"PAID\"}").unwrap();
        assert!(res.change.is_empty());
        assert!(res.preimage.is_none());
    }
}
