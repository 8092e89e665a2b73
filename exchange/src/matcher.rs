//! Candidate selection
//!
//! # Algorithm
//!
//! 1. Take every account other than the requester with a profile and
//!    `balance >= min_balance`, shuffled so exposure is spread evenly
//! 2. Skip a candidate if the latest action from the requester towards it is
//!    younger than the cooldown
//! 3. Skip a candidate the requester already follows (nothing is logged)
//! 4. The first survivor is the match
//!
//! Oracle transport errors abort the scan; they are never read as "not
//! following".

use crate::{config::MatchingConfig, oracle::FollowGraph, Error, Result};
use ledger_core::{Account, AccountId, Ledger};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Selects the next followee for a requester
#[derive(Clone)]
pub struct Matcher {
    ledger: Ledger,
    oracle: Arc<dyn FollowGraph>,
    rules: MatchingConfig,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher").field("rules", &self.rules).finish()
    }
}

impl Matcher {
    /// Create matcher
    pub fn new(ledger: Ledger, oracle: Arc<dyn FollowGraph>, rules: MatchingConfig) -> Self {
        Self {
            ledger,
            oracle,
            rules,
        }
    }

    /// Matching rules in force
    pub fn rules(&self) -> &MatchingConfig {
        &self.rules
    }

    /// Whether `candidate` is still inside the cooldown window for `requester`
    pub fn in_cooldown(&self, requester: AccountId, candidate: AccountId) -> Result<bool> {
        Ok(self
            .ledger
            .days_since_last_action(requester, candidate)?
            .map_or(false, |days| days < self.rules.cooldown_days))
    }

    /// Next eligible candidate, `None` when the pool is exhausted.
    ///
    /// Accounts in `exclude` are passed over without any lookup.
    pub async fn next_candidate(
        &self,
        requester: AccountId,
        exclude: &HashSet<AccountId>,
    ) -> Result<Option<Account>> {
        let requester_profile = self
            .ledger
            .account(requester)?
            .profile
            .ok_or(Error::ProfileNotSet(requester))?;

        let mut candidates: Vec<Account> = self
            .ledger
            .accounts_with_balance(self.rules.min_balance, requester)?
            .into_iter()
            .filter(|account| account.has_profile() && !exclude.contains(&account.id))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        for candidate in candidates {
            if self.in_cooldown(requester, candidate.id)? {
                debug!(requester = %requester, candidate = %candidate.id, "Candidate in cooldown");
                continue;
            }

            let Some(candidate_profile) = candidate.profile.as_deref() else {
                continue;
            };
            if self
                .oracle
                .is_follower(&requester_profile, candidate_profile)
                .await?
            {
                debug!(requester = %requester, candidate = %candidate.id, "Already following");
                continue;
            }

            return Ok(Some(candidate));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SnapshotFollowGraph;
    use chrono::NaiveDate;
    use ledger_core::{Config, ManualClock};
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: Ledger,
        clock: Arc<ManualClock>,
        graph: Arc<SnapshotFollowGraph>,
        matcher: Matcher,
        _temp: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        let ledger = Ledger::open_with_clock(config, clock.clone()).await.unwrap();
        let graph = Arc::new(SnapshotFollowGraph::new());
        let matcher = Matcher::new(ledger.clone(), graph.clone(), MatchingConfig::default());

        Fixture {
            ledger,
            clock,
            graph,
            matcher,
            _temp: temp,
        }
    }

    async fn account(ledger: &Ledger, id: i64, profile: Option<&str>, balance: i64) -> AccountId {
        let id = AccountId::new(id);
        ledger.register(id, None, false).await.unwrap();
        if let Some(profile) = profile {
            ledger.set_profile(id, profile).await.unwrap();
        }
        if balance > 0 {
            ledger.grant(id, Decimal::from(balance)).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn test_requires_requester_profile() {
        let f = fixture().await;
        let x = account(&f.ledger, 1, None, 0).await;
        account(&f.ledger, 2, Some("y"), 10).await;

        let result = f.matcher.next_candidate(x, &HashSet::new()).await;
        assert!(matches!(result, Err(Error::ProfileNotSet(id)) if id == x));
    }

    #[tokio::test]
    async fn test_only_funded_candidates_with_profiles() {
        let f = fixture().await;
        let x = account(&f.ledger, 1, Some("x"), 50).await;
        account(&f.ledger, 2, Some("poor"), 4).await;
        account(&f.ledger, 3, None, 10).await;
        let z = account(&f.ledger, 4, Some("z"), 5).await;

        for _ in 0..10 {
            let candidate = f.matcher.next_candidate(x, &HashSet::new()).await.unwrap();
            assert_eq!(candidate.map(|a| a.id), Some(z));
        }
    }

    #[tokio::test]
    async fn test_skips_already_following() {
        let f = fixture().await;
        let x = account(&f.ledger, 1, Some("x"), 0).await;
        account(&f.ledger, 2, Some("y"), 10).await;
        f.graph.follow("x", "y");

        assert!(f.matcher.next_candidate(x, &HashSet::new()).await.unwrap().is_none());
        assert!(f.ledger.actions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let f = fixture().await;
        let x = account(&f.ledger, 1, Some("x"), 0).await;
        let y = account(&f.ledger, 2, Some("y"), 10).await;

        let action = f.ledger.open_action(x, y, Decimal::ONE).await.unwrap();
        f.ledger.skip_action(action.id, Decimal::ONE).await.unwrap();

        // Days D through D + 4 are inside the window
        for _ in 0..5 {
            assert!(f.matcher.next_candidate(x, &HashSet::new()).await.unwrap().is_none());
            f.clock.advance_days(1);
        }

        let candidate = f.matcher.next_candidate(x, &HashSet::new()).await.unwrap();
        assert_eq!(candidate.map(|a| a.id), Some(y));
    }

    #[tokio::test]
    async fn test_excluded_candidates() {
        let f = fixture().await;
        let x = account(&f.ledger, 1, Some("x"), 0).await;
        let y = account(&f.ledger, 2, Some("y"), 10).await;

        let exclude: HashSet<_> = [y].into_iter().collect();
        assert!(f.matcher.next_candidate(x, &exclude).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oracle_failure_aborts() {
        let f = fixture().await;
        let x = account(&f.ledger, 1, Some("x"), 0).await;
        account(&f.ledger, 2, Some("y"), 10).await;
        f.graph.set_unavailable(true);

        let result = f.matcher.next_candidate(x, &HashSet::new()).await;
        assert!(matches!(result, Err(Error::OracleUnavailable(_))));
    }
}
