//! User keys
//!
//! Users are identified by their nostr public key, accepted either in npub
//! bech32 form or as 64 hex characters. The key partitions every wallet and
//! ledger record.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// User key error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Bech32 decoding failed
    #[error("Invalid npub: `{0}`")]
    InvalidNpub(String),
    /// Wrong human readable part
    #[error("Expected npub prefix, got `{0}`")]
    WrongPrefix(String),
    /// Payload is not a 32 byte key
    #[error("Invalid key length: {0} bytes")]
    InvalidLength(usize),
    /// Not npub nor 64 character hex
    #[error("User key must be an npub or 64 hex characters")]
    UnrecognizedForm,
}

/// A validated user key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UserKey(String);

impl UserKey {
    /// Key as the form it was supplied in
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("npub1") {
            if rest.is_empty() {
                return Err(Error::InvalidNpub(s.to_string()));
            }
            let (hrp, data) =
                bech32::decode(s).map_err(|_| Error::InvalidNpub(s.to_string()))?;
            if !hrp.as_str().eq_ignore_ascii_case("npub") {
                return Err(Error::WrongPrefix(hrp.to_string()));
            }
            if data.len() != 32 {
                return Err(Error::InvalidLength(data.len()));
            }
            return Ok(Self(s.to_lowercase()));
        }

        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self(s.to_lowercase()));
        }

        Err(Error::UnrecognizedForm)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for UserKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        UserKey::from_str(&s).map_err(serde::de::Error::custom)
    }
}
