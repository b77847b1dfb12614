//! Custodial ecash wallet coordinator
//!
//! Owns per-user proof inventories against a single Cashu-style mint:
//! validates and admits requests, reconciles the local proof ledger with
//! the mint's state oracle before spending, drives mint quote completion
//! through background pollers and keeps every multi-row ledger transition
//! atomic.

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::sync::Arc;

use purse_common::database::LedgerDatabase;

pub mod client;
pub mod coordinator;
pub mod database;
pub mod monitor;
pub mod poller;
pub mod reconcile;
pub mod retry;
pub mod test_utils;
pub mod transport;
pub mod types;
pub mod validation;

pub use coordinator::Coordinator;
#[doc(hidden)]
pub use purse_common::{
    self as common, Amount, Config, Error, MintUrl, Proof, Proofs, ProofsMethods, Token, UserKey,
};

/// Shared handle to the ledger store
pub type LocalStore =
    Arc<dyn LedgerDatabase<Err = purse_common::database::Error> + Send + Sync>;
