//! Proofs
//!
//! A proof is a single ecash unit issued by the mint: an amount, the secret
//! that identifies it, the mint's blinded commitment over that secret and
//! the id of the keyset that signed it. The mint performs all blinding and
//! splitting; the coordinator only moves finished proofs around.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Keyset id as issued by the mint
pub type KeysetId = String;

/// A single ecash proof
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proof {
    /// Amount in the wallet unit
    pub amount: Amount,
    /// Secret identifying the proof
    pub secret: String,
    /// Blinded commitment from the mint
    #[serde(rename = "C")]
    pub c: String,
    /// Keyset that signed the proof
    #[serde(rename = "id")]
    pub keyset_id: KeysetId,
    /// Unlock witness for p2pk locked proofs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
}

/// Set of proofs
pub type Proofs = Vec<Proof>;

/// Extension methods over a set of proofs
pub trait ProofsMethods {
    /// Sum of proof amounts
    fn total_amount(&self) -> Amount;

    /// Secrets of the proofs, in order
    fn secrets(&self) -> Vec<String>;
}

impl ProofsMethods for Proofs {
    fn total_amount(&self) -> Amount {
        self.iter().map(|p| p.amount).sum()
    }

    fn secrets(&self) -> Vec<String> {
        self.iter().map(|p| p.secret.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(amount: u64, secret: &str) -> Proof {
        Proof {
            amount: Amount::from(amount),
            secret: secret.to_string(),
            c: "02deadbeef".to_string(),
            keyset_id: "00ad268c4d1f5826".to_string(),
            witness: None,
        }
    }

    #[test]
    fn test_total_amount() {
        let proofs = vec![proof(64, "a"), proof(32, "b"), proof(4, "c")];
        assert_eq!(proofs.total_amount(), Amount::from(100));
    }

    #[test]
    fn test_serde_field_names() {
        let p = proof(8, "secret");
        let value = serde_json::to_value(&p).unwrap();
        assert!(value.get("C").is_some());
        assert!(value.get("id").is_some());
        assert!(value.get("keyset_id").is_none());
    }
}
