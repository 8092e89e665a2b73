//! Requester sessions
//!
//! Each requester has at most one outstanding offer. When an offer timeout
//! is configured, presenting an offer arms a timer keyed by the requester;
//! presenting a new offer or clearing the current one cancels the previous
//! timer. An expired offer is dismissed from the session only. Its action
//! stays pending and is left to the reconciliation sweep.

use crate::notify::Notifier;
use dashmap::DashMap;
use ledger_core::{AccountId, ActionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

/// Button shown with an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Requester claims the follow happened
    Followed,
    /// Requester passes on this candidate
    Skip,
}

impl Choice {
    /// Button label
    pub fn label(&self) -> &'static str {
        match self {
            Choice::Followed => "Followed",
            Choice::Skip => "Skip",
        }
    }
}

/// A candidate surfaced to a requester, backed by a pending action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    /// Escrowing action
    pub action_id: ActionId,

    /// Account asked to follow
    pub requester: AccountId,

    /// Account to be followed
    pub candidate: AccountId,

    /// Candidate profile handle
    pub candidate_profile: String,

    /// Link to the candidate profile
    pub profile_url: String,
}

impl Offer {
    /// Message shown to the requester
    pub fn text(&self) -> String {
        format!("📌 Like & Follow {} to get a 🍪", self.profile_url)
    }

    /// Available answers
    pub fn choices(&self) -> [Choice; 2] {
        [Choice::Followed, Choice::Skip]
    }
}

/// Held while a workflow step runs for one requester.
///
/// The requester's lock entry is dropped with the last guard, so the lock
/// map only holds requesters with a step in flight.
pub struct SessionGuard {
    account: AccountId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<AccountId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("account", &self.account)
            .finish()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the mutex, so the entry survives while any remain
        self.locks
            .remove_if(&self.account, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Outstanding offers, expiry timers and per-requester locks
pub struct SessionStore {
    offers: Arc<DashMap<AccountId, Offer>>,
    timers: Arc<DashMap<AccountId, (ActionId, AbortHandle)>>,
    locks: Arc<DashMap<AccountId, Arc<Mutex<()>>>>,
    notifier: Arc<dyn Notifier>,
    offer_timeout: Option<Duration>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("offers", &self.offers.len())
            .field("timers", &self.timers.len())
            .field("offer_timeout", &self.offer_timeout)
            .finish()
    }
}

impl SessionStore {
    /// Create store; offers never expire when `offer_timeout` is `None`
    pub fn new(notifier: Arc<dyn Notifier>, offer_timeout: Option<Duration>) -> Self {
        Self {
            offers: Arc::new(DashMap::new()),
            timers: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            notifier,
            offer_timeout,
        }
    }

    /// Serialize workflow steps for one requester
    pub async fn lock(&self, account: AccountId) -> SessionGuard {
        let lock = self
            .locks
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SessionGuard {
            account,
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Outstanding offer for `account`
    pub fn current(&self, account: AccountId) -> Option<Offer> {
        self.offers.get(&account).map(|offer| offer.clone())
    }

    /// Number of outstanding offers
    pub fn outstanding(&self) -> usize {
        self.offers.len()
    }

    /// Make `offer` the requester's outstanding offer
    pub fn present(&self, offer: Offer) {
        let account = offer.requester;
        let action_id = offer.action_id;
        self.cancel_timer(account);
        self.offers.insert(account, offer);

        if let Some(timeout) = self.offer_timeout {
            let offers = self.offers.clone();
            let timers = self.timers.clone();
            let notifier = self.notifier.clone();

            let task = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timers.remove_if(&account, |_, (id, _)| *id == action_id);
                if offers
                    .remove_if(&account, |_, offer| offer.action_id == action_id)
                    .is_some()
                {
                    info!(account_id = %account, action_id = action_id.get(), "Offer expired");
                    if let Err(e) = notifier.dismiss(account).await {
                        error!(account_id = %account, "Failed to dismiss expired offer: {}", e);
                    }
                }
            });
            self.timers.insert(account, (action_id, task.abort_handle()));
        }
    }

    /// Drop the outstanding offer if it is still `action_id`
    pub fn clear(&self, account: AccountId, action_id: ActionId) {
        self.cancel_timer(account);
        self.offers
            .remove_if(&account, |_, offer| offer.action_id == action_id);
    }

    fn cancel_timer(&self, account: AccountId) {
        if let Some((_, (action_id, handle))) = self.timers.remove(&account) {
            handle.abort();
            debug!(account_id = %account, action_id = action_id.get(), "Offer timer cancelled");
        }
    }
}
