//! Error types for the exchange engine

use ledger_core::AccountId;
use thiserror::Error;

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, Error>;

/// Exchange errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Follow-graph lookup failed in transport; cannot verify now
    #[error("Follow graph unavailable: {0}")]
    OracleUnavailable(String),

    /// Requester has no profile handle registered
    #[error("Account {0} has no profile set")]
    ProfileNotSet(AccountId),

    /// Caller is not an admin
    #[error("Permission denied for account {0}")]
    PermissionDenied(AccountId),

    /// Malformed command or arguments
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Confirm or skip without an outstanding offer
    #[error("No active offer for account {0}")]
    NoActiveOffer(AccountId),

    /// Worker task panicked or was cancelled
    #[error("Worker error: {0}")]
    Worker(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient failures that a later retry may clear
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::OracleUnavailable(_) | Error::Worker(_) | Error::Ledger(ledger_core::Error::Concurrency(_))
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Worker(err.to_string())
    }
}
