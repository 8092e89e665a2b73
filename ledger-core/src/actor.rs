//! Actor-based concurrency for the ledger
//!
//! Every mutation of an account's `balance`/`pending` goes through one
//! writer task. Each message is a complete read-validate-write cycle against
//! storage, so concurrent escrow operations on the same account can never
//! interleave, and no caller ever writes back a stale read.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │     Matcher / Verification workers / Sweep tasks      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   load accounts/action → escrow primitive → WriteSet │
//! │                       │                               │
//! │                       ▼                               │
//! │               Storage::commit()                       │
//! │          (atomic write to RocksDB)                    │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::clock::Clock;
use crate::escrow;
use crate::storage::{Storage, WriteSet};
use crate::types::{Account, AccountId, Action, ActionId, ActionStatus, Resolution, SettableField};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Create the account if missing, refresh its display handle otherwise
    Register {
        id: AccountId,
        handle: Option<String>,
        is_admin: bool,
        response: Reply<(Account, bool)>,
    },

    /// Set the social-network profile handle
    SetProfile {
        id: AccountId,
        profile: String,
        response: Reply<Account>,
    },

    /// Admin credit grant
    Grant {
        id: AccountId,
        amount: Decimal,
        response: Reply<Account>,
    },

    /// Admin field overwrite
    SetField {
        id: AccountId,
        field: SettableField,
        value: Decimal,
        response: Reply<Account>,
    },

    /// Escrow primitive: balance → pending
    MoveToPending {
        id: AccountId,
        amount: Decimal,
        response: Reply<Account>,
    },

    /// Escrow primitive: payer.pending → payee.balance
    Settle {
        payer: AccountId,
        payee: AccountId,
        amount: Decimal,
        response: Reply<bool>,
    },

    /// Escrow primitive: pending → balance
    Revert {
        id: AccountId,
        amount: Decimal,
        response: Reply<bool>,
    },

    /// Escrow the followee's stake and record a pending action
    OpenAction {
        follower: AccountId,
        followee: AccountId,
        stake: Decimal,
        min_balance: Decimal,
        response: Reply<Action>,
    },

    /// Settle a pending action and mark it approved
    ApproveAction {
        action_id: ActionId,
        stake: Decimal,
        response: Reply<Resolution>,
    },

    /// Revert a pending action and record the skip
    SkipAction {
        action_id: ActionId,
        stake: Decimal,
        response: Reply<Resolution>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Date source for new actions
    clock: Arc<dyn Clock>,

    /// Id for the next action record
    next_action_id: ActionId,
}

impl LedgerActor {
    /// Create new actor, resuming the action id sequence from storage
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let next_action_id = storage
            .last_action_id()?
            .map(|id| id.next())
            .unwrap_or_else(|| ActionId::new(1));

        Ok(Self {
            storage,
            mailbox,
            clock,
            next_action_id,
        })
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                break;
            }
            self.handle_message(msg);
        }
        tracing::debug!("Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Register {
                id,
                handle,
                is_admin,
                response,
            } => {
                let _ = response.send(self.register(id, handle, is_admin));
            }

            LedgerMessage::SetProfile {
                id,
                profile,
                response,
            } => {
                let _ = response.send(self.update_account(id, |account| {
                    account.profile = Some(profile);
                    Ok(())
                }));
            }

            LedgerMessage::Grant {
                id,
                amount,
                response,
            } => {
                let _ = response.send(self.update_account(id, |account| {
                    escrow::grant(account, amount)
                }));
            }

            LedgerMessage::SetField {
                id,
                field,
                value,
                response,
            } => {
                let _ = response.send(self.update_account(id, |account| {
                    if value < Decimal::ZERO {
                        return Err(Error::InvalidAmount(value));
                    }
                    match field {
                        SettableField::Balance => account.balance = value,
                        SettableField::Pending => account.pending = value,
                    }
                    Ok(())
                }));
            }

            LedgerMessage::MoveToPending {
                id,
                amount,
                response,
            } => {
                let _ = response.send(self.update_account(id, |account| {
                    escrow::move_to_pending(account, amount)
                }));
            }

            LedgerMessage::Settle {
                payer,
                payee,
                amount,
                response,
            } => {
                let _ = response.send(self.settle(payer, payee, amount));
            }

            LedgerMessage::Revert {
                id,
                amount,
                response,
            } => {
                let _ = response.send(self.revert(id, amount));
            }

            LedgerMessage::OpenAction {
                follower,
                followee,
                stake,
                min_balance,
                response,
            } => {
                let _ = response.send(self.open_action(follower, followee, stake, min_balance));
            }

            LedgerMessage::ApproveAction {
                action_id,
                stake,
                response,
            } => {
                let _ = response.send(self.approve_action(action_id, stake));
            }

            LedgerMessage::SkipAction {
                action_id,
                stake,
                response,
            } => {
                let _ = response.send(self.skip_action(action_id, stake));
            }

            LedgerMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }

    fn register(
        &mut self,
        id: AccountId,
        handle: Option<String>,
        is_admin: bool,
    ) -> Result<(Account, bool)> {
        match self.storage.get_account(id)? {
            Some(mut account) => {
                let refreshed = handle.is_some() && account.handle != handle;
                if !refreshed && (account.is_admin || !is_admin) {
                    return Ok((account, false));
                }
                if refreshed {
                    account.handle = handle;
                }
                account.is_admin |= is_admin;
                self.storage.commit(WriteSet::new().put_account(account.clone()))?;
                Ok((account, false))
            }
            None => {
                let account = Account::new(id, handle, is_admin);
                self.storage.commit(WriteSet::new().put_account(account.clone()))?;
                tracing::info!(account_id = %id, is_admin, "Account registered");
                Ok((account, true))
            }
        }
    }

    /// Load, mutate and commit one account; nothing is written if `apply` fails
    fn update_account<F>(&mut self, id: AccountId, apply: F) -> Result<Account>
    where
        F: FnOnce(&mut Account) -> Result<()>,
    {
        let mut account = self.storage.account(id)?;
        apply(&mut account)?;
        self.storage.commit(WriteSet::new().put_account(account.clone()))?;
        Ok(account)
    }

    fn settle(&mut self, payer: AccountId, payee: AccountId, amount: Decimal) -> Result<bool> {
        if payer == payee {
            return Err(Error::InvariantViolation(format!(
                "settle from account {} to itself",
                payer
            )));
        }

        let mut payer_account = self.storage.account(payer)?;
        let mut payee_account = self.storage.account(payee)?;

        if !escrow::settle(&mut payer_account, &mut payee_account, amount) {
            tracing::error!(
                payer = %payer,
                payee = %payee,
                %amount,
                pending = %payer_account.pending,
                "Settle rejected: amount exceeds escrow"
            );
            return Ok(false);
        }

        self.storage.commit(
            WriteSet::new()
                .put_account(payer_account)
                .put_account(payee_account),
        )?;
        Ok(true)
    }

    fn revert(&mut self, id: AccountId, amount: Decimal) -> Result<bool> {
        let mut account = self.storage.account(id)?;

        if !escrow::revert(&mut account, amount) {
            tracing::error!(
                account_id = %id,
                %amount,
                pending = %account.pending,
                "Revert rejected: amount exceeds escrow"
            );
            return Ok(false);
        }

        self.storage.commit(WriteSet::new().put_account(account))?;
        Ok(true)
    }

    fn open_action(
        &mut self,
        follower: AccountId,
        followee: AccountId,
        stake: Decimal,
        min_balance: Decimal,
    ) -> Result<Action> {
        if follower == followee {
            return Err(Error::InvariantViolation(format!(
                "account {} offered to itself",
                follower
            )));
        }

        let follower_account = self.storage.account(follower)?;
        let mut followee_account = self.storage.account(followee)?;

        let follower_profile = follower_account.profile.clone().ok_or_else(|| {
            Error::InvariantViolation(format!("follower {} has no profile", follower))
        })?;
        let followee_profile = followee_account.profile.clone().ok_or_else(|| {
            Error::InvariantViolation(format!("followee {} has no profile", followee))
        })?;

        // Eligibility is re-validated here, not trusted from the matcher's read
        if followee_account.balance < min_balance {
            return Err(Error::InsufficientBalance {
                account: followee,
                available: followee_account.balance,
                requested: min_balance,
            });
        }
        escrow::move_to_pending(&mut followee_account, stake)?;

        let action = Action {
            id: self.next_action_id,
            follower_id: follower,
            follower_profile,
            followee_id: followee,
            followee_profile,
            status: ActionStatus::Pending,
            created_date: self.clock.today(),
            supersedes: None,
        };

        self.storage.commit(
            WriteSet::new()
                .put_account(followee_account)
                .insert_action(action.clone()),
        )?;
        self.next_action_id = action.id.next();

        tracing::info!(
            action_id = %action.id,
            follower = %follower,
            followee = %followee,
            "Action opened, stake escrowed"
        );
        Ok(action)
    }

    /// Pending and not superseded, or the resolution explaining why not
    fn load_open_action(&self, action_id: ActionId) -> Result<std::result::Result<Action, Resolution>> {
        let action = self.storage.get_action(action_id)?;
        if action.status != ActionStatus::Pending {
            return Ok(Err(Resolution::AlreadyResolved));
        }
        if self.storage.superseded_by(action_id)?.is_some() {
            return Ok(Err(Resolution::AlreadyResolved));
        }
        Ok(Ok(action))
    }

    fn approve_action(&mut self, action_id: ActionId, stake: Decimal) -> Result<Resolution> {
        let mut action = match self.load_open_action(action_id)? {
            Ok(action) => action,
            Err(resolution) => return Ok(resolution),
        };

        let mut payer = self.storage.account(action.followee_id)?;
        let mut payee = self.storage.account(action.follower_id)?;

        if !escrow::settle(&mut payer, &mut payee, stake) {
            tracing::error!(
                action_id = %action_id,
                payer = %payer.id,
                pending = %payer.pending,
                %stake,
                "Approval rejected: stake exceeds escrow"
            );
            return Ok(Resolution::Rejected);
        }

        action.status = ActionStatus::Approved;
        self.storage.commit(
            WriteSet::new()
                .put_account(payer)
                .put_account(payee)
                .update_action_status(action, ActionStatus::Pending),
        )?;

        tracing::info!(action_id = %action_id, "Action approved, stake settled");
        Ok(Resolution::Applied)
    }

    fn skip_action(&mut self, action_id: ActionId, stake: Decimal) -> Result<Resolution> {
        let action = match self.load_open_action(action_id)? {
            Ok(action) => action,
            Err(resolution) => return Ok(resolution),
        };

        let mut owner = self.storage.account(action.followee_id)?;
        if !escrow::revert(&mut owner, stake) {
            tracing::error!(
                action_id = %action_id,
                account_id = %owner.id,
                pending = %owner.pending,
                %stake,
                "Skip rejected: stake exceeds escrow"
            );
            return Ok(Resolution::Rejected);
        }

        let skip = Action {
            id: self.next_action_id,
            status: ActionStatus::Skipped,
            created_date: self.clock.today(),
            supersedes: Some(action_id),
            ..action
        };

        self.storage.commit(
            WriteSet::new()
                .put_account(owner)
                .supersede(action_id, skip.id)
                .insert_action(skip.clone()),
        )?;
        self.next_action_id = skip.id.next();

        tracing::info!(action_id = %action_id, skip_id = %skip.id, "Action skipped, stake reverted");
        Ok(Resolution::Applied)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Create or refresh an account; the flag is true when it was created
    pub async fn register(
        &self,
        id: AccountId,
        handle: Option<String>,
        is_admin: bool,
    ) -> Result<(Account, bool)> {
        self.call(|response| LedgerMessage::Register {
            id,
            handle,
            is_admin,
            response,
        })
        .await
    }

    /// Set profile handle
    pub async fn set_profile(&self, id: AccountId, profile: String) -> Result<Account> {
        self.call(|response| LedgerMessage::SetProfile {
            id,
            profile,
            response,
        })
        .await
    }

    /// Grant credit
    pub async fn grant(&self, id: AccountId, amount: Decimal) -> Result<Account> {
        self.call(|response| LedgerMessage::Grant {
            id,
            amount,
            response,
        })
        .await
    }

    /// Overwrite a settable field
    pub async fn set_field(
        &self,
        id: AccountId,
        field: SettableField,
        value: Decimal,
    ) -> Result<Account> {
        self.call(|response| LedgerMessage::SetField {
            id,
            field,
            value,
            response,
        })
        .await
    }

    /// Move balance into escrow
    pub async fn move_to_pending(&self, id: AccountId, amount: Decimal) -> Result<Account> {
        self.call(|response| LedgerMessage::MoveToPending {
            id,
            amount,
            response,
        })
        .await
    }

    /// Pay escrow out to another account
    pub async fn settle(&self, payer: AccountId, payee: AccountId, amount: Decimal) -> Result<bool> {
        self.call(|response| LedgerMessage::Settle {
            payer,
            payee,
            amount,
            response,
        })
        .await
    }

    /// Return escrow to its owner
    pub async fn revert(&self, id: AccountId, amount: Decimal) -> Result<bool> {
        self.call(|response| LedgerMessage::Revert {
            id,
            amount,
            response,
        })
        .await
    }

    /// Escrow and record a pending action if the followee holds at least `min_balance`
    pub async fn open_action(
        &self,
        follower: AccountId,
        followee: AccountId,
        stake: Decimal,
        min_balance: Decimal,
    ) -> Result<Action> {
        self.call(|response| LedgerMessage::OpenAction {
            follower,
            followee,
            stake,
            min_balance,
            response,
        })
        .await
    }

    /// Settle a pending action
    pub async fn approve_action(&self, action_id: ActionId, stake: Decimal) -> Result<Resolution> {
        self.call(|response| LedgerMessage::ApproveAction {
            action_id,
            stake,
            response,
        })
        .await
    }

    /// Revert a pending action
    pub async fn skip_action(&self, action_id: ActionId, stake: Decimal) -> Result<Resolution> {
        self.call(|response| LedgerMessage::SkipAction {
            action_id,
            stake,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    mailbox_capacity: usize,
) -> Result<LedgerHandle> {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, clock)?;

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(LedgerHandle::new(tx))
}
