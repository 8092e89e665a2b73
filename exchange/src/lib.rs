//! Follow Exchange Engine
//!
//! Matching, verification and reconciliation on top of the escrow ledger.
//!
//! # Architecture
//!
//! 1. **Matching**: pick a funded candidate outside the cooldown window that
//!    the requester does not already follow
//! 2. **Escrow**: move one stake from the candidate's balance to pending and
//!    record a pending action
//! 3. **Verification**: ask the follow graph whether the follow happened;
//!    settle on success, leave pending otherwise, revert on skip
//! 4. **Reconciliation**: periodically re-check every pending action
//!
//! Oracle calls run on a bounded worker pool. All balance changes go
//! through the ledger's single writer.
//!
//! # Example
//!
//! ```no_run
//! use follow_exchange::{Config, Exchange, LogNotifier, SnapshotFollowGraph};
//! use ledger_core::{AccountId, Ledger};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> follow_exchange::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config.ledger.clone()).await?;
//!     let exchange = Exchange::new(
//!         config,
//!         ledger,
//!         Arc::new(SnapshotFollowGraph::new()),
//!         Arc::new(LogNotifier),
//!     )?;
//!
//!     let outcome = exchange.on_request_match(AccountId::new(1)).await?;
//!     println!("{:?}", outcome);
//!
//!     exchange.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod command;
pub mod config;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod oracle;
pub mod pool;
pub mod service;
pub mod session;
pub mod sweep;
pub mod workflow;

// Re-exports
pub use command::Command;
pub use config::Config;
pub use error::{Error, Result};
pub use matcher::Matcher;
pub use metrics::Metrics;
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use oracle::{FollowGraph, SnapshotFollowGraph};
pub use pool::WorkerPool;
pub use service::{Exchange, ProfileOutcome, RejectReason, StartOutcome};
pub use session::{Choice, Offer, SessionGuard, SessionStore};
pub use sweep::{ReconciliationSweep, SweepReport, SweepScheduler};
pub use workflow::{FollowOutcome, MatchOutcome, Verification, VerificationWorkflow};
