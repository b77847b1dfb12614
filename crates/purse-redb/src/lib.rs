//! Redb storage backend for the purse ecash wallet coordinator

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod error;
pub mod ledger;

pub use error::Error;
pub use ledger::LedgerRedbDatabase;
