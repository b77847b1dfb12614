//! Shared types and contracts for the purse ecash wallet coordinator

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod amount;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod mint_url;
pub mod protocol;
pub mod proofs;
pub mod rpc;
pub mod secrets;
pub mod token;
pub mod user_key;
pub mod util;
pub mod wallet;

pub use amount::Amount;
pub use config::Config;
pub use error::Error;
pub use lightning_invoice::Bolt11Invoice;
pub use mint_url::MintUrl;
pub use proofs::{Proof, Proofs, ProofsMethods};
pub use token::Token;
pub use user_key::UserKey;
