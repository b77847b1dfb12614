//! Redb Error

use thiserror::Error;

/// Redb Database Error
#[derive(Debug, Error)]
pub enum Error {
    /// Redb Error
    #[error(transparent)]
    Redb(#[from] Box<redb::Error>),
    /// Redb Database Error
    #[error(transparent)]
    Database(#[from] Box<redb::DatabaseError>),
    /// Redb Transaction Error
    #[error(transparent)]
    Transaction(#[from] Box<redb::TransactionError>),
    /// Redb Commit Error
    #[error(transparent)]
    Commit(#[from] Box<redb::CommitError>),
    /// Redb Table Error
    #[error(transparent)]
    Table(#[from] Box<redb::TableError>),
    /// Redb Storage Error
    #[error(transparent)]
    Storage(#[from] Box<redb::StorageError>),
    /// Serde Json Error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Unknown Database Version
    #[error("Unknown database version")]
    UnknownDatabaseVersion,
}

impl From<redb::Error> for Error {
    fn from(err: redb::Error) -> Self {
        Self::Redb(Box::new(err))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Database(Box::new(err))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(err))
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Self::Commit(Box::new(err))
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Self::Table(Box::new(err))
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}

impl From<Error> for purse_common::database::Error {
    fn from(err: Error) -> Self {
        Self::Database(Box::new(err))
    }
}
