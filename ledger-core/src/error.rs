//! Error types for the ledger

use crate::types::{AccountId, ActionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account already registered
    #[error("Account already exists: {0}")]
    AccountExists(AccountId),

    /// Action not found
    #[error("Action not found: {0}")]
    ActionNotFound(ActionId),

    /// Balance cannot cover the requested amount
    #[error("Insufficient balance on {account}: has {available}, needs {requested}")]
    InsufficientBalance {
        /// Account being debited
        account: AccountId,
        /// Balance at the time of the request
        available: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// Amount is zero, negative or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Invariant violation (non-negative balances, profile snapshots, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
