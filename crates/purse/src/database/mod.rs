//! Ledger store implementations
//!
//! The contract lives in [`purse_common::database`]; this module carries
//! the in-memory implementation used for tests and embedding. The durable
//! redb implementation lives in the `purse-redb` crate.

pub mod memory;

pub use memory::LedgerMemoryDatabase;
pub use purse_common::database::{
    Error, HistoryFilter, HistoryPage, LedgerDatabase, MeltCommit, Pagination, PendingUpdate,
    PendingWindow, SpendSelection,
};
