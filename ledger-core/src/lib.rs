//! Follow Exchange Ledger Core
//!
//! Account balances, escrow, and the append-only action log behind the
//! mutual-follow exchange.
//!
//! # Architecture
//!
//! - **Single Writer**: One actor task performs every balance mutation
//! - **Atomic Commits**: Each logical mutation is one RocksDB write batch
//! - **Append-only Log**: Actions are never deleted; only `pending → approved`
//!   rewrites a record, and skips are new records that supersede
//!
//! # Invariants
//!
//! - Credit conservation: Σ(balance + pending) changes only through grants
//!   and admin field overrides
//! - Non-negative: every account has `balance >= 0` and `pending >= 0`
//! - Escrow exclusivity: each pending action is settled or reverted at most
//!   once, never both

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod actor;
pub mod clock;
pub mod config;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod storage;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::{Storage, WriteSet};
pub use types::{
    Account, AccountId, Action, ActionId, ActionStatus, Resolution, SettableField,
};
