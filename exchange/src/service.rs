//! Front-end service surface
//!
//! [`Exchange`] is the one object the messaging front-end talks to. It is
//! constructed explicitly from a ledger, a follow graph and a notifier;
//! there is no process-wide state. Workflow steps are dispatched onto the
//! bounded worker pool so the front-end never waits on the oracle inline.

use crate::{
    command::Command,
    config::Config,
    matcher::Matcher,
    metrics::Metrics,
    notify::Notifier,
    oracle::FollowGraph,
    pool::WorkerPool,
    session::SessionStore,
    sweep::{ReconciliationSweep, SchedulerHandle, SweepReport, SweepScheduler},
    workflow::{FollowOutcome, MatchOutcome, VerificationWorkflow},
    Error, Result,
};
use ledger_core::{Account, AccountId, Action, Ledger, SettableField};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Reply to `/start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The account still has to register a profile handle
    NeedsProfile,
    /// The account can start following
    Ready {
        /// Balance needed before the account is offered to others
        min_balance: Decimal,
    },
}

/// Why a profile handle was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Empty or malformed handle
    InvalidHandle,
    /// Profile is private or does not exist
    PrivateOrMissing,
}

/// Answers offered after a rejected profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryChoice {
    /// Send another handle
    Retry,
    /// Abandon registration
    Cancel,
}

/// Reply to a profile submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOutcome {
    /// Handle stored
    Accepted {
        /// Normalized handle
        profile: String,
    },
    /// Handle refused; nothing was written
    Rejected {
        /// Reason
        reason: RejectReason,
        /// Follow-up choices
        choices: [RetryChoice; 2],
    },
}

impl ProfileOutcome {
    fn rejected(reason: RejectReason) -> Self {
        ProfileOutcome::Rejected {
            reason,
            choices: [RetryChoice::Retry, RetryChoice::Cancel],
        }
    }
}

/// Reduce user input to a bare profile handle
pub fn normalize_profile_handle(raw: &str, url_prefix: &str) -> Option<String> {
    let mut handle = raw.trim();
    if !url_prefix.is_empty() {
        handle = handle.strip_prefix(url_prefix).unwrap_or(handle);
    }
    handle = handle.trim_end_matches('/');
    handle = handle.strip_prefix('@').unwrap_or(handle);

    if handle.is_empty() || handle.contains(|c: char| c.is_whitespace() || c == '/') {
        return None;
    }
    Some(handle.to_string())
}

/// One line per account
pub fn render_accounts(accounts: &[Account]) -> String {
    if accounts.is_empty() {
        return "No users to display".to_string();
    }
    accounts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per action
pub fn render_actions(actions: &[Action]) -> String {
    if actions.is_empty() {
        return "No actions to display".to_string();
    }
    actions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Follow exchange service
pub struct Exchange {
    config: Config,
    ledger: Ledger,
    oracle: Arc<dyn FollowGraph>,
    pool: WorkerPool,
    metrics: Metrics,
    workflow: Arc<VerificationWorkflow>,
    sweep: ReconciliationSweep,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("ledger", &self.ledger)
            .field("pool", &self.pool)
            .field("workflow", &self.workflow)
            .finish()
    }
}

impl Exchange {
    /// Wire the engine together
    pub fn new(
        config: Config,
        ledger: Ledger,
        oracle: Arc<dyn FollowGraph>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()?;
        let pool = WorkerPool::new(config.workers.max_concurrent);

        let matcher = Matcher::new(ledger.clone(), oracle.clone(), config.matching.clone());
        let sessions = SessionStore::new(notifier.clone(), config.session.offer_timeout());
        let workflow = Arc::new(VerificationWorkflow::new(
            ledger.clone(),
            oracle.clone(),
            matcher,
            sessions,
            notifier.clone(),
            metrics.clone(),
            config.profile_url_prefix.clone(),
        ));
        // Sweep items queue on their own pool so a large backlog never
        // delays interactive requests
        let sweep = ReconciliationSweep::new(
            ledger.clone(),
            oracle.clone(),
            notifier,
            WorkerPool::new(config.sweep.max_concurrent),
            metrics.clone(),
            config.matching.stake,
        );

        Ok(Self {
            config,
            ledger,
            oracle,
            pool,
            metrics,
            workflow,
            sweep,
        })
    }

    /// Ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Session store
    pub fn sessions(&self) -> &SessionStore {
        self.workflow.sessions()
    }

    /// Start the scheduled sweep if enabled
    pub fn start_scheduler(&self) -> Option<SchedulerHandle> {
        if !self.config.sweep.enabled {
            return None;
        }
        Some(SweepScheduler::new(self.sweep.clone(), self.config.sweep.interval()).start())
    }

    /// First contact: create the account if missing
    pub async fn on_start(&self, id: AccountId, handle: Option<String>) -> Result<StartOutcome> {
        let (account, created) = self
            .ledger
            .register(id, handle, self.config.is_configured_admin(id))
            .await?;
        if created {
            info!(account_id = %id, is_admin = account.is_admin, "New participant");
        }

        Ok(if account.has_profile() {
            StartOutcome::Ready {
                min_balance: self.config.matching.min_balance,
            }
        } else {
            StartOutcome::NeedsProfile
        })
    }

    /// Register a profile handle after checking it is public
    pub async fn on_set_profile(&self, id: AccountId, raw: &str) -> Result<ProfileOutcome> {
        self.ledger.account(id)?;

        let Some(profile) = normalize_profile_handle(raw, &self.config.profile_url_prefix) else {
            info!(account_id = %id, "Rejected malformed profile handle");
            return Ok(ProfileOutcome::rejected(RejectReason::InvalidHandle));
        };

        let oracle = self.oracle.clone();
        let lookup = profile.clone();
        let public = self
            .pool
            .run(async move { oracle.profile_exists_and_is_public(&lookup).await })
            .await
            .map_err(|e| {
                if matches!(e, Error::OracleUnavailable(_)) {
                    self.metrics.oracle_failures_total.inc();
                }
                e
            })?;

        if !public {
            info!(account_id = %id, profile = %profile, "Profile is private or missing");
            return Ok(ProfileOutcome::rejected(RejectReason::PrivateOrMissing));
        }

        let account = self.ledger.set_profile(id, profile).await?;
        let profile = account.profile.unwrap_or_default();
        info!(account_id = %id, profile = %profile, "Profile registered");
        Ok(ProfileOutcome::Accepted { profile })
    }

    /// Next candidate for the requester
    pub async fn on_request_match(&self, id: AccountId) -> Result<MatchOutcome> {
        let workflow = self.workflow.clone();
        self.pool
            .run(async move { workflow.offer_next(id).await })
            .await
    }

    /// Requester claims to have followed the offered candidate
    pub async fn on_confirm_follow(&self, id: AccountId) -> Result<FollowOutcome> {
        let workflow = self.workflow.clone();
        self.pool.run(async move { workflow.confirm(id).await }).await
    }

    /// Requester passes on the offered candidate
    pub async fn on_skip(&self, id: AccountId) -> Result<MatchOutcome> {
        let workflow = self.workflow.clone();
        self.pool.run(async move { workflow.skip(id).await }).await
    }

    fn require_admin(&self, actor: AccountId) -> Result<()> {
        match self.ledger.find_account(actor)? {
            Some(account) if account.is_admin => Ok(()),
            _ => {
                warn!(account_id = %actor, "Admin command refused");
                Err(Error::PermissionDenied(actor))
            }
        }
    }

    /// Credit an account
    pub async fn on_admin_grant(
        &self,
        actor: AccountId,
        target: AccountId,
        amount: Decimal,
    ) -> Result<Account> {
        self.require_admin(actor)?;
        if amount <= Decimal::ZERO {
            return Err(ledger_core::Error::InvalidAmount(amount).into());
        }
        let account = self.ledger.grant(target, amount).await?;
        info!(actor = %actor, account_id = %target, %amount, "Admin grant");
        Ok(account)
    }

    /// Overwrite one account field
    pub async fn on_admin_set_field(
        &self,
        actor: AccountId,
        target: AccountId,
        field: SettableField,
        value: Decimal,
    ) -> Result<Account> {
        self.require_admin(actor)?;
        if value < Decimal::ZERO {
            return Err(ledger_core::Error::InvalidAmount(value).into());
        }
        let account = self.ledger.set_field(target, field, value).await?;
        info!(actor = %actor, account_id = %target, %field, %value, "Admin field set");
        Ok(account)
    }

    /// All accounts
    pub fn on_admin_query_accounts(&self, actor: AccountId) -> Result<Vec<Account>> {
        self.require_admin(actor)?;
        Ok(self.ledger.accounts()?)
    }

    /// Full action log
    pub fn on_admin_query_actions(&self, actor: AccountId) -> Result<Vec<Action>> {
        self.require_admin(actor)?;
        Ok(self.ledger.actions()?)
    }

    /// Run the reconciliation sweep now
    pub async fn on_admin_sweep(&self, actor: AccountId) -> Result<SweepReport> {
        self.require_admin(actor)?;
        info!(actor = %actor, "Manual sweep requested");
        self.sweep.run().await
    }

    /// The caller's own account
    pub fn on_query_balance(&self, id: AccountId) -> Result<Account> {
        Ok(self.ledger.account(id)?)
    }

    /// Parse and run a chat command, returning the reply text
    pub async fn handle_command(&self, actor: AccountId, text: &str) -> Result<String> {
        let command: Command = text.parse()?;
        if command.requires_admin() {
            self.require_admin(actor)?;
        }

        match command {
            Command::Start => Ok(match self.on_start(actor, None).await? {
                StartOutcome::NeedsProfile => {
                    "Send us your profile username to get started.".to_string()
                }
                StartOutcome::Ready { min_balance } => format!(
                    "Follow the profiles we send you and press Followed, or Skip them. \
                     Each verified follow earns you a point. You need at least {} points \
                     to be shown to others.",
                    min_balance
                ),
            }),
            Command::Balance => {
                let account = self.on_query_balance(actor)?;
                Ok(format!(
                    "ID: {}, Username: {}, Profile: {}, Balance: {}",
                    account.id,
                    account.handle.as_deref().unwrap_or("-"),
                    account.profile.as_deref().unwrap_or("-"),
                    account.balance
                ))
            }
            Command::AddPoints { target, amount } => {
                self.on_admin_grant(actor, target, amount).await?;
                Ok(format!("Added {} points to {}'s balance", amount, target))
            }
            Command::Set {
                target,
                field,
                value,
            } => {
                self.on_admin_set_field(actor, target, field, value).await?;
                Ok(format!("Set {} of {} to {}", field, target, value))
            }
            Command::GetUsers => Ok(render_accounts(&self.on_admin_query_accounts(actor)?)),
            Command::GetActions => Ok(render_actions(&self.on_admin_query_actions(actor)?)),
            Command::UpdatePoints => Ok(self.on_admin_sweep(actor).await?.to_string()),
        }
    }

    /// Stop the ledger actor
    pub async fn shutdown(&self) -> Result<()> {
        self.ledger.shutdown().await?;
        Ok(())
    }
}
