//! Encoded proof tokens
//!
//! Serialized bundle handed from sender to receiver: the proofs being
//! transferred, the mint they are valid at and an optional recipient pubkey
//! the proofs are locked to.

use core::fmt;
use core::str::FromStr;

use bitcoin::base64::engine::{general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::Amount;
use crate::mint_url::MintUrl;
use crate::proofs::{Proofs, ProofsMethods};

const TOKEN_PREFIX: &str = "purseA";

/// Token error
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported token prefix
    #[error("Unsupported token prefix")]
    UnsupportedToken,
    /// Base64 error
    #[error(transparent)]
    Base64(#[from] bitcoin::base64::DecodeError),
    /// Json error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Token has no proofs
    #[error("Token has no proofs")]
    Empty,
}

/// Transferable proof bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Mint the proofs are valid at
    pub mint: MintUrl,
    /// Proofs being transferred
    pub proofs: Proofs,
    /// Wallet unit
    pub unit: String,
    /// Recipient pubkey the proofs are locked to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    /// Optional memo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Token {
    /// Create a new [`Token`]
    pub fn new(
        mint: MintUrl,
        proofs: Proofs,
        pubkey: Option<String>,
        memo: Option<String>,
    ) -> Result<Self, Error> {
        if proofs.is_empty() {
            return Err(Error::Empty);
        }

        Ok(Self {
            mint,
            proofs,
            unit: "sat".to_string(),
            pubkey,
            memo,
        })
    }

    /// Total amount carried by the token
    pub fn total_amount(&self) -> Amount {
        self.proofs.total_amount()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        let encoded = general_purpose::URL_SAFE.encode(json);
        write!(f, "{TOKEN_PREFIX}{encoded}")
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s.strip_prefix(TOKEN_PREFIX).ok_or(Error::UnsupportedToken)?;

        let decoded = general_purpose::URL_SAFE
            .decode(encoded)
            .or_else(|_| general_purpose::STANDARD.decode(encoded))?;

        let token: Token = serde_json::from_slice(&decoded)?;

        if token.proofs.is_empty() {
            return Err(Error::Empty);
        }

        Ok(token)
    }
}
