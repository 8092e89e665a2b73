//! Main ledger orchestration layer
//!
//! This module ties together storage, the clock and the writer actor into a
//! high-level API. Reads go straight to storage; every write goes through
//! the actor.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountId, Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let (account, _created) = ledger.register(AccountId::new(1), None, false).await?;
//!     println!("{}", account);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    clock::{Clock, SystemClock},
    types::{Account, AccountId, Action, ActionId, Resolution, SettableField},
    Config, Error, Result, Storage,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Main ledger interface
#[derive(Clone)]
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Date source shared with the actor
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("storage", &self.storage).finish()
    }
}

impl Ledger {
    /// Open ledger with configuration and the system clock
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Open ledger with an explicit clock
    pub async fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let handle = spawn_ledger_actor(
            storage.clone(),
            clock.clone(),
            config.actor.mailbox_capacity,
        )?;

        tracing::info!(service = %config.service_name, "Ledger opened");

        Ok(Self {
            handle,
            storage,
            clock,
        })
    }

    /// Today's date according to the ledger clock
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    // Reads

    /// Account by id, `None` if never registered
    pub fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.storage.get_account(id)
    }

    /// Account by id
    pub fn account(&self, id: AccountId) -> Result<Account> {
        self.storage.account(id)
    }

    /// All accounts
    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.storage.accounts()
    }

    /// Accounts other than `exclude` whose balance is at least `min_balance`
    pub fn accounts_with_balance(
        &self,
        min_balance: Decimal,
        exclude: AccountId,
    ) -> Result<Vec<Account>> {
        Ok(self
            .storage
            .accounts()?
            .into_iter()
            .filter(|account| account.id != exclude && account.balance >= min_balance)
            .collect())
    }

    /// Action by id
    pub fn action(&self, id: ActionId) -> Result<Action> {
        self.storage.get_action(id)
    }

    /// Full action log, oldest first
    pub fn actions(&self) -> Result<Vec<Action>> {
        self.storage.actions()
    }

    /// Pending actions still awaiting verification
    pub fn open_actions(&self) -> Result<Vec<Action>> {
        self.storage.open_actions()
    }

    /// Whether `id` is pending and not superseded
    pub fn is_open(&self, id: ActionId) -> Result<bool> {
        let action = self.storage.get_action(id)?;
        Ok(action.status == crate::ActionStatus::Pending && self.storage.superseded_by(id)?.is_none())
    }

    /// Most recent action from `follower` towards `followee`
    pub fn latest_action_between(
        &self,
        follower: AccountId,
        followee: AccountId,
    ) -> Result<Option<Action>> {
        self.storage.latest_action_between(follower, followee)
    }

    /// Days since the latest action for the ordered pair, `None` if there is none
    pub fn days_since_last_action(
        &self,
        follower: AccountId,
        followee: AccountId,
    ) -> Result<Option<i64>> {
        let today = self.clock.today();
        Ok(self
            .latest_action_between(follower, followee)?
            .map(|action| action.age_days(today)))
    }

    /// Σ(balance + pending) across all accounts
    pub fn total_credit(&self) -> Result<Decimal> {
        Ok(self.storage.accounts()?.iter().map(Account::total).sum())
    }

    /// Verify no account holds a negative balance or pending amount
    pub fn check_non_negative(&self) -> Result<()> {
        for account in self.storage.accounts()? {
            if account.balance < Decimal::ZERO || account.pending < Decimal::ZERO {
                return Err(Error::InvariantViolation(format!(
                    "account {} has balance {} and pending {}",
                    account.id, account.balance, account.pending
                )));
            }
        }
        Ok(())
    }

    // Writes

    /// Create the account if missing, refreshing the display handle when one
    /// is given; the flag is true when it was created
    pub async fn register(
        &self,
        id: AccountId,
        handle: Option<String>,
        is_admin: bool,
    ) -> Result<(Account, bool)> {
        self.handle.register(id, handle, is_admin).await
    }

    /// Set the profile handle
    pub async fn set_profile(&self, id: AccountId, profile: impl Into<String>) -> Result<Account> {
        self.handle.set_profile(id, profile.into()).await
    }

    /// Admin grant
    pub async fn grant(&self, id: AccountId, amount: Decimal) -> Result<Account> {
        self.handle.grant(id, amount).await
    }

    /// Admin overwrite of a closed set of fields
    pub async fn set_field(
        &self,
        id: AccountId,
        field: SettableField,
        value: Decimal,
    ) -> Result<Account> {
        self.handle.set_field(id, field, value).await
    }

    /// `balance -= amount; pending += amount`
    pub async fn move_to_pending(&self, id: AccountId, amount: Decimal) -> Result<Account> {
        self.handle.move_to_pending(id, amount).await
    }

    /// `payer.pending -= amount; payee.balance += amount`, false if it would underflow
    pub async fn settle(&self, payer: AccountId, payee: AccountId, amount: Decimal) -> Result<bool> {
        self.handle.settle(payer, payee, amount).await
    }

    /// `pending -= amount; balance += amount`, false if it would underflow
    pub async fn revert(&self, id: AccountId, amount: Decimal) -> Result<bool> {
        self.handle.revert(id, amount).await
    }

    /// Escrow `stake` from the followee and record a pending action
    pub async fn open_action(
        &self,
        follower: AccountId,
        followee: AccountId,
        stake: Decimal,
    ) -> Result<Action> {
        self.handle.open_action(follower, followee, stake, stake).await
    }

    /// Like [`Ledger::open_action`], but the followee must still hold
    /// `min_balance` when the writer processes the request
    pub async fn open_action_above(
        &self,
        follower: AccountId,
        followee: AccountId,
        stake: Decimal,
        min_balance: Decimal,
    ) -> Result<Action> {
        self.handle
            .open_action(follower, followee, stake, min_balance)
            .await
    }

    /// Settle a pending action to its follower and mark it approved
    pub async fn approve_action(&self, id: ActionId, stake: Decimal) -> Result<Resolution> {
        self.handle.approve_action(id, stake).await
    }

    /// Return a pending action's stake and record the skip
    pub async fn skip_action(&self, id: ActionId, stake: Decimal) -> Result<Resolution> {
        self.handle.skip_action(id, stake).await
    }

    /// Shutdown ledger
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}
