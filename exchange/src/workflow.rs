//! Verification workflow
//!
//! Drives one requester through the offer loop:
//!
//! ```text
//! AwaitingCandidate --match--> PresentingCandidate
//! PresentingCandidate --followed, confirmed--> settle, AwaitingCandidate
//! PresentingCandidate --followed, unconfirmed--> leave pending, AwaitingCandidate
//! PresentingCandidate --skip--> revert, AwaitingCandidate
//! ```
//!
//! The loop only ends when the matcher runs out of candidates. Steps for
//! one requester are serialized through the session lock; the ledger actor
//! serializes balance changes across requesters.

use crate::{
    matcher::Matcher,
    metrics::Metrics,
    notify::Notifier,
    oracle::FollowGraph,
    session::{Offer, SessionStore},
    Error, Result,
};
use ledger_core::{AccountId, Ledger, Resolution};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Message sent to a followee when a follow is paid out
pub const NEW_FOLLOWER_TEXT: &str = "You just gained a new follower!";

/// Result of asking for a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A candidate is on offer
    Offered(Offer),
    /// Nobody is eligible right now
    NoCandidates,
}

impl MatchOutcome {
    /// Offer, if one was made
    pub fn offer(&self) -> Option<&Offer> {
        match self {
            MatchOutcome::Offered(offer) => Some(offer),
            MatchOutcome::NoCandidates => None,
        }
    }
}

/// What verifying a follow claim did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Follow confirmed and the stake paid out
    Approved,
    /// The action was settled or skipped before this claim
    AlreadyResolved,
    /// Follow confirmed but the escrow guard refused the payout
    Rejected,
    /// Follow not visible yet; the action stays pending for the sweep
    Unconfirmed,
}

/// Result of a follow claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowOutcome {
    /// How the claim was resolved
    pub verification: Verification,

    /// Next offer; `None` if matching failed after the claim was recorded
    pub next: Option<MatchOutcome>,
}

/// Offer, confirm and skip steps for requester sessions
pub struct VerificationWorkflow {
    ledger: Ledger,
    oracle: Arc<dyn FollowGraph>,
    matcher: Matcher,
    sessions: SessionStore,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    profile_url_prefix: String,
}

impl std::fmt::Debug for VerificationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationWorkflow")
            .field("matcher", &self.matcher)
            .field("sessions", &self.sessions)
            .finish()
    }
}

impl VerificationWorkflow {
    /// Create workflow
    pub fn new(
        ledger: Ledger,
        oracle: Arc<dyn FollowGraph>,
        matcher: Matcher,
        sessions: SessionStore,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
        profile_url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            oracle,
            matcher,
            sessions,
            notifier,
            metrics,
            profile_url_prefix: profile_url_prefix.into(),
        }
    }

    /// Session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn stake(&self) -> Decimal {
        self.matcher.rules().stake
    }

    /// Present the next candidate, or re-present the outstanding offer
    pub async fn offer_next(&self, requester: AccountId) -> Result<MatchOutcome> {
        let _session = self.sessions.lock(requester).await;
        self.offer_locked(requester).await
    }

    async fn offer_locked(&self, requester: AccountId) -> Result<MatchOutcome> {
        if let Some(offer) = self.sessions.current(requester) {
            debug!(account_id = %requester, action_id = offer.action_id.get(), "Re-presenting offer");
            return Ok(MatchOutcome::Offered(offer));
        }

        // Every rejected candidate joins `exclude`, so the scan terminates
        let mut exclude = HashSet::new();
        loop {
            let Some(candidate) = self.matcher.next_candidate(requester, &exclude).await? else {
                info!(
                    account_id = %requester,
                    passed_over = exclude.len(),
                    "No candidates available"
                );
                return Ok(MatchOutcome::NoCandidates);
            };

            // The balance read by the matcher may be stale by now
            let rules = self.matcher.rules();
            let action = match self
                .ledger
                .open_action_above(requester, candidate.id, rules.stake, rules.min_balance)
                .await
            {
                Ok(action) => action,
                Err(ledger_core::Error::InsufficientBalance { .. }) => {
                    debug!(
                        account_id = %requester,
                        candidate = %candidate.id,
                        "Candidate balance moved, trying another"
                    );
                    exclude.insert(candidate.id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let offer = Offer {
                action_id: action.id,
                requester,
                candidate: candidate.id,
                profile_url: format!("{}{}", self.profile_url_prefix, action.followee_profile),
                candidate_profile: action.followee_profile,
            };
            self.sessions.present(offer.clone());
            self.metrics.offers_total.inc();

            info!(
                account_id = %requester,
                candidate = %offer.candidate,
                action_id = offer.action_id.get(),
                "Candidate offered"
            );
            return Ok(MatchOutcome::Offered(offer));
        }
    }

    /// Verify the requester's follow claim on the outstanding offer.
    ///
    /// On an oracle transport error the offer stays outstanding and the
    /// error is returned, so the claim can be retried.
    pub async fn confirm(&self, requester: AccountId) -> Result<FollowOutcome> {
        let _session = self.sessions.lock(requester).await;
        let offer = self
            .sessions
            .current(requester)
            .ok_or(Error::NoActiveOffer(requester))?;

        let action = self.ledger.action(offer.action_id)?;
        let verification = if !self.ledger.is_open(action.id)? {
            Verification::AlreadyResolved
        } else {
            let started = Instant::now();
            let following = self
                .oracle
                .is_follower(&action.follower_profile, &action.followee_profile)
                .await;
            self.metrics
                .record_verification(started.elapsed().as_secs_f64());

            let following = following.map_err(|e| {
                self.metrics.oracle_failures_total.inc();
                warn!(
                    account_id = %requester,
                    action_id = action.id.get(),
                    "Cannot verify follow now: {}",
                    e
                );
                e
            })?;

            if following {
                match self.ledger.approve_action(action.id, self.stake()).await? {
                    Resolution::Applied => {
                        self.metrics.settlements_total.inc();
                        info!(
                            account_id = %requester,
                            followee = %action.followee_id,
                            action_id = action.id.get(),
                            "Follow confirmed"
                        );
                        notify_new_follower(self.notifier.as_ref(), action.followee_id).await;
                        Verification::Approved
                    }
                    Resolution::AlreadyResolved => Verification::AlreadyResolved,
                    Resolution::Rejected => Verification::Rejected,
                }
            } else {
                self.metrics.unconfirmed_total.inc();
                info!(
                    account_id = %requester,
                    action_id = action.id.get(),
                    "Follow not visible yet, left pending"
                );
                Verification::Unconfirmed
            }
        };

        self.sessions.clear(requester, offer.action_id);
        let next = match self.offer_locked(requester).await {
            Ok(next) => Some(next),
            Err(e) => {
                warn!(account_id = %requester, "Could not produce next offer: {}", e);
                None
            }
        };

        Ok(FollowOutcome { verification, next })
    }

    /// Pass on the outstanding offer and move to the next candidate
    pub async fn skip(&self, requester: AccountId) -> Result<MatchOutcome> {
        let _session = self.sessions.lock(requester).await;
        let offer = self
            .sessions
            .current(requester)
            .ok_or(Error::NoActiveOffer(requester))?;

        match self.ledger.skip_action(offer.action_id, self.stake()).await? {
            Resolution::Applied => {
                self.metrics.skips_total.inc();
                info!(
                    account_id = %requester,
                    action_id = offer.action_id.get(),
                    "Offer skipped"
                );
            }
            resolution => {
                debug!(
                    account_id = %requester,
                    action_id = offer.action_id.get(),
                    ?resolution,
                    "Skip had nothing to revert"
                );
            }
        }

        self.sessions.clear(requester, offer.action_id);
        self.offer_locked(requester).await
    }
}

/// Tell a followee about a payout; failures are logged only
pub(crate) async fn notify_new_follower(notifier: &dyn Notifier, followee: AccountId) {
    if let Err(e) = notifier.notify(followee, NEW_FOLLOWER_TEXT).await {
        error!(account_id = %followee, "Failed to notify followee: {}", e);
    }
}
