//! At-rest encryption seam
//!
//! Key custody lives outside this crate. The coordinator only needs a
//! cipher for the wallet p2pk private key before it touches the ledger
//! store, so the contract is injected by the embedding service.

use std::fmt::Debug;

use bitcoin::base64::engine::{general_purpose, Engine as _};
use thiserror::Error;

/// Cipher error
#[derive(Debug, Error)]
pub enum Error {
    /// Ciphertext could not be decoded
    #[error("Malformed ciphertext")]
    MalformedCiphertext,
    /// Cipher backend failure
    #[error("Cipher failure: {0}")]
    Backend(String),
}

/// Symmetric cipher for wallet secrets at rest
pub trait SecretCipher: Debug + Send + Sync {
    /// Encrypt plaintext for storage
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error>;

    /// Decrypt stored ciphertext
    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, Error>;
}

/// Encoding-only cipher for tests and local development
///
/// Stores secrets base64 encoded without encryption. Production services
/// must supply a real cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureCipher;

impl SecretCipher for InsecureCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        Ok(general_purpose::STANDARD.encode(plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, Error> {
        general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| Error::MalformedCiphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_cipher_round_trip() {
        let cipher = InsecureCipher;
        let ciphertext = cipher.encrypt(b"hello").unwrap();
        assert_ne!(ciphertext.as_bytes(), b"hello");
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn test_rejects_malformed_ciphertext() {
        assert!(InsecureCipher.decrypt("not base64 !!!").is_err());
    }
}
