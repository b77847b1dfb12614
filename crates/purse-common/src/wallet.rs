//! Wallet records

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mint_url::MintUrl;
use crate::user_key::UserKey;
use crate::util::unix_time;

/// Wallet id
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WalletId(Uuid);

impl WalletId {
    /// Generate a fresh wallet id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WalletId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WalletId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// How a wallet came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletOrigin {
    /// Created by an explicit create call
    Explicit,
    /// Materialized on first use
    OnDemand,
}

/// Unique lookup key of a wallet
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletKey {
    /// Owning user
    pub user_key: UserKey,
    /// Mint url
    pub mint_url: MintUrl,
}

impl WalletKey {
    /// Create new [`WalletKey`]
    pub fn new(user_key: UserKey, mint_url: MintUrl) -> Self {
        Self { user_key, mint_url }
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user: {}, mint_url: {}", self.user_key, self.mint_url)
    }
}

/// Per-user wallet at one mint
///
/// Exactly one active wallet exists per `(user_key, mint_url)`. The p2pk
/// private key is encrypted at rest by the configured [`crate::secrets::SecretCipher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Wallet id
    pub id: WalletId,
    /// Owning user
    pub user_key: UserKey,
    /// Mint url
    pub mint_url: MintUrl,
    /// Wallet unit
    pub unit: String,
    /// Ecash p2pk public key, plaintext
    pub p2pk_pubkey: String,
    /// Ecash p2pk private key, encrypted at rest
    pub p2pk_privkey_enc: String,
    /// How the wallet came to exist
    pub origin: WalletOrigin,
    /// Creation time
    pub created_at: u64,
}

impl WalletRecord {
    /// Create new [`WalletRecord`]
    pub fn new(
        user_key: UserKey,
        mint_url: MintUrl,
        p2pk_pubkey: String,
        p2pk_privkey_enc: String,
        origin: WalletOrigin,
    ) -> Self {
        Self {
            id: WalletId::new(),
            user_key,
            mint_url,
            unit: "sat".to_string(),
            p2pk_pubkey,
            p2pk_privkey_enc,
            origin,
            created_at: unix_time(),
        }
    }

    /// Lookup key of this wallet
    pub fn key(&self) -> WalletKey {
        WalletKey::new(self.user_key.clone(), self.mint_url.clone())
    }
}
