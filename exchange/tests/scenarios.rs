//! End-to-end scenarios for the follow exchange
//!
//! Each test drives the public service surface with an in-memory follow
//! graph and a manual clock.

use chrono::NaiveDate;
use follow_exchange::{
    Config, Error, Exchange, MatchOutcome, ProfileOutcome, RecordingNotifier, SnapshotFollowGraph,
    Verification,
};
use ledger_core::{AccountId, ActionStatus, Ledger, ManualClock};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

const ADMIN: i64 = 1000;

struct Harness {
    exchange: Arc<Exchange>,
    clock: Arc<ManualClock>,
    graph: Arc<SnapshotFollowGraph>,
    notifier: Arc<RecordingNotifier>,
    _temp: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        Self::with_graph(SnapshotFollowGraph::new(), customize).await
    }

    async fn with_graph(graph: SnapshotFollowGraph, customize: impl FnOnce(&mut Config)) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp.path().to_path_buf();
        config.admin_ids = vec![ADMIN];
        config.sweep.enabled = false;
        customize(&mut config);

        let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()));
        let ledger = Ledger::open_with_clock(config.ledger.clone(), clock.clone())
            .await
            .unwrap();
        let graph = Arc::new(graph);
        let notifier = Arc::new(RecordingNotifier::new());
        let exchange = Exchange::new(config, ledger, graph.clone(), notifier.clone()).unwrap();
        exchange.on_start(AccountId::new(ADMIN), None).await.unwrap();

        Self {
            exchange: Arc::new(exchange),
            clock,
            graph,
            notifier,
            _temp: temp,
        }
    }

    fn admin(&self) -> AccountId {
        AccountId::new(ADMIN)
    }

    /// Registered participant with a public profile and starting balance
    async fn participant(&self, id: i64, profile: &str, balance: i64) -> AccountId {
        let id = AccountId::new(id);
        self.exchange
            .on_start(id, Some(format!("tg_{}", profile)))
            .await
            .unwrap();
        self.graph.add_profile(profile, false);
        let outcome = self.exchange.on_set_profile(id, profile).await.unwrap();
        assert!(matches!(outcome, ProfileOutcome::Accepted { .. }));
        if balance > 0 {
            self.exchange
                .on_admin_grant(self.admin(), id, Decimal::from(balance))
                .await
                .unwrap();
        }
        id
    }

    fn balance(&self, id: AccountId) -> (Decimal, Decimal) {
        let account = self.exchange.ledger().account(id).unwrap();
        (account.balance, account.pending)
    }

    async fn shutdown(self) {
        self.exchange.shutdown().await.unwrap();
    }
}

fn offered(outcome: &MatchOutcome) -> AccountId {
    outcome.offer().expect("expected an offer").candidate
}

#[tokio::test]
async fn offer_then_confirmed_follow_settles() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 5).await;
    let y = h.participant(2, "y", 6).await;

    let outcome = h.exchange.on_request_match(x).await.unwrap();
    assert_eq!(offered(&outcome), y);
    assert_eq!(h.balance(x), (Decimal::from(5), Decimal::ZERO));
    assert_eq!(h.balance(y), (Decimal::from(5), Decimal::ONE));

    let actions = h.exchange.ledger().actions().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].status, ActionStatus::Pending);
    assert_eq!((actions[0].follower_id, actions[0].followee_id), (x, y));

    h.graph.follow("x", "y");
    let result = h.exchange.on_confirm_follow(x).await.unwrap();
    assert_eq!(result.verification, Verification::Approved);
    assert_eq!(result.next, Some(MatchOutcome::NoCandidates));

    assert_eq!(h.balance(y), (Decimal::from(5), Decimal::ZERO));
    assert_eq!(h.balance(x), (Decimal::from(6), Decimal::ZERO));
    assert_eq!(
        h.exchange.ledger().action(actions[0].id).unwrap().status,
        ActionStatus::Approved
    );
    assert_eq!(
        h.notifier.messages_for(y),
        vec!["You just gained a new follower!".to_string()]
    );

    h.shutdown().await;
}

#[tokio::test]
async fn skip_reverts_escrow() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 5).await;
    let y = h.participant(2, "y", 6).await;

    h.exchange.on_request_match(x).await.unwrap();
    h.exchange.on_skip(x).await.unwrap();

    assert_eq!(h.balance(y), (Decimal::from(6), Decimal::ZERO));
    assert_eq!(h.balance(x), (Decimal::from(5), Decimal::ZERO));

    let actions = h.exchange.ledger().actions().unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[1].status, ActionStatus::Skipped);
    assert_eq!(actions[1].supersedes, Some(actions[0].id));
    assert!(h.exchange.ledger().open_actions().unwrap().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn grant_to_unknown_account_is_rejected() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 5).await;
    let before = h.exchange.ledger().accounts().unwrap();

    let result = h
        .exchange
        .on_admin_grant(h.admin(), AccountId::new(424242), Decimal::TEN)
        .await;
    assert!(matches!(
        result,
        Err(Error::Ledger(ledger_core::Error::AccountNotFound(_)))
    ));
    assert_eq!(h.exchange.ledger().accounts().unwrap(), before);

    let reply = h
        .exchange
        .handle_command(h.admin(), "/add_points 424242 10")
        .await;
    assert!(reply.is_err());
    assert_eq!(h.balance(x), (Decimal::from(5), Decimal::ZERO));

    h.shutdown().await;
}

#[tokio::test]
async fn cooldown_blocks_reoffer_until_day_five() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 0).await;
    let y = h.participant(2, "y", 20).await;

    assert_eq!(offered(&h.exchange.on_request_match(x).await.unwrap()), y);
    assert_eq!(h.exchange.on_skip(x).await.unwrap(), MatchOutcome::NoCandidates);

    for _ in 0..4 {
        h.clock.advance_days(1);
        assert_eq!(
            h.exchange.on_request_match(x).await.unwrap(),
            MatchOutcome::NoCandidates
        );
    }

    h.clock.advance_days(1);
    assert_eq!(offered(&h.exchange.on_request_match(x).await.unwrap()), y);

    h.shutdown().await;
}

#[tokio::test]
async fn sweep_settles_late_follows_once() {
    let h = Harness::new().await;
    let a = h.participant(1, "a", 0).await;
    let b = h.participant(2, "b", 0).await;
    let y = h.participant(3, "y", 10).await;

    for requester in [a, b] {
        h.exchange.on_request_match(requester).await.unwrap();
        let result = h.exchange.on_confirm_follow(requester).await.unwrap();
        assert_eq!(result.verification, Verification::Unconfirmed);
    }
    assert_eq!(h.balance(y), (Decimal::from(8), Decimal::from(2)));

    h.graph.follow("a", "y");
    h.graph.follow("b", "y");

    let first = h.exchange.on_admin_sweep(h.admin()).await.unwrap();
    assert_eq!((first.checked, first.approved), (2, 2));
    let after_first = h.exchange.ledger().accounts().unwrap();

    let second = h.exchange.on_admin_sweep(h.admin()).await.unwrap();
    assert_eq!((second.checked, second.approved), (0, 0));
    assert_eq!(h.exchange.ledger().accounts().unwrap(), after_first);

    assert_eq!(h.balance(a), (Decimal::ONE, Decimal::ZERO));
    assert_eq!(h.balance(b), (Decimal::ONE, Decimal::ZERO));
    assert_eq!(h.balance(y), (Decimal::from(8), Decimal::ZERO));
    assert_eq!(h.notifier.messages_for(y).len(), 2);

    h.shutdown().await;
}

#[tokio::test]
async fn oracle_outage_creates_no_escrow() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 0).await;
    let y = h.participant(2, "y", 10).await;
    h.graph.set_unavailable(true);

    let result = h.exchange.on_request_match(x).await;
    assert!(matches!(result, Err(Error::OracleUnavailable(_))));
    assert!(h.exchange.ledger().actions().unwrap().is_empty());
    assert_eq!(h.balance(y), (Decimal::TEN, Decimal::ZERO));

    h.graph.set_unavailable(false);
    assert_eq!(offered(&h.exchange.on_request_match(x).await.unwrap()), y);

    h.shutdown().await;
}

#[tokio::test]
async fn admin_commands_require_admin() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 3).await;

    for command in [
        "/get_users",
        "/get_actions",
        "/add_points 1 100",
        "/set 1 balance 100",
        "/update_points",
    ] {
        let result = h.exchange.handle_command(x, command).await;
        assert!(
            matches!(result, Err(Error::PermissionDenied(id)) if id == x),
            "{} was not refused",
            command
        );
    }
    assert_eq!(h.balance(x), (Decimal::from(3), Decimal::ZERO));

    let reply = h.exchange.handle_command(x, "/balance").await.unwrap();
    assert_eq!(reply, "ID: 1, Username: tg_x, Profile: x, Balance: 3");

    h.shutdown().await;
}

#[tokio::test]
async fn already_followed_candidates_are_passed_over() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 0).await;
    let y = h.participant(2, "y", 10).await;
    let z = h.participant(3, "z", 10).await;
    h.graph.follow("x", "y");

    for _ in 0..5 {
        let outcome = h.exchange.on_request_match(x).await.unwrap();
        assert_eq!(offered(&outcome), z);
    }
    assert_eq!(h.exchange.ledger().actions().unwrap().len(), 1);
    assert_eq!(h.balance(y), (Decimal::TEN, Decimal::ZERO));

    h.shutdown().await;
}

#[tokio::test]
async fn confirm_without_offer_is_an_error() {
    let h = Harness::new().await;
    let x = h.participant(1, "x", 0).await;

    assert!(matches!(
        h.exchange.on_confirm_follow(x).await,
        Err(Error::NoActiveOffer(_))
    ));
    assert!(matches!(h.exchange.on_skip(x).await, Err(Error::NoActiveOffer(_))));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn expired_offer_is_left_for_the_sweep() {
    let h = Harness::with_config(|config| config.session.offer_timeout_secs = Some(30)).await;
    let x = h.participant(1, "x", 0).await;
    let y = h.participant(2, "y", 10).await;

    let offer = h.exchange.on_request_match(x).await.unwrap().offer().cloned().unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert!(h.exchange.sessions().current(x).is_none());
    assert!(matches!(
        h.exchange.on_confirm_follow(x).await,
        Err(Error::NoActiveOffer(_))
    ));
    assert!(h.exchange.ledger().is_open(offer.action_id).unwrap());

    h.graph.follow("x", "y");
    let report = h.exchange.on_admin_sweep(h.admin()).await.unwrap();
    assert_eq!(report.approved, 1);
    assert_eq!(h.balance(x), (Decimal::ONE, Decimal::ZERO));
    assert_eq!(h.balance(y), (Decimal::from(9), Decimal::ZERO));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sweep_backlog_does_not_delay_requests() {
    let latency = Duration::from_secs(1);
    let graph = SnapshotFollowGraph::new().with_latency(latency);
    let h = Harness::with_graph(graph, |config| {
        config.workers.max_concurrent = 2;
        config.sweep.max_concurrent = 2;
    })
    .await;
    let y = h.participant(100, "y", 30).await;
    let requester = h.participant(200, "q", 0).await;
    for id in 1..=20 {
        let follower = h.participant(id, &format!("r{}", id), 0).await;
        h.exchange
            .ledger()
            .open_action(follower, y, Decimal::ONE)
            .await
            .unwrap();
    }

    let exchange = h.exchange.clone();
    let sweep = tokio::spawn(async move { exchange.on_admin_sweep(AccountId::new(ADMIN)).await });
    // Let the sweep queue its whole backlog
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = tokio::time::Instant::now();
    let outcome = h.exchange.on_request_match(requester).await.unwrap();
    assert_eq!(outcome.offer().map(|offer| offer.candidate), Some(y));
    assert!(started.elapsed() < latency * 2, "waited {:?}", started.elapsed());

    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.checked, 20);
    assert_eq!(report.still_pending, 20);

    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_conserve_credit() {
    let h = Harness::new().await;
    let y = h.participant(100, "y", 8).await;
    let mut requesters = Vec::new();
    for id in 1..=6 {
        requesters.push(h.participant(id, &format!("r{}", id), 0).await);
    }
    let total = h.exchange.ledger().total_credit().unwrap();

    let tasks: Vec<_> = requesters
        .iter()
        .map(|&requester| {
            let exchange = h.exchange.clone();
            tokio::spawn(async move { exchange.on_request_match(requester).await })
        })
        .collect();

    let mut offers = 0;
    for task in tasks {
        if let MatchOutcome::Offered(offer) = task.await.unwrap().unwrap() {
            assert_eq!(offer.candidate, y);
            offers += 1;
        }
    }

    // Balances 8, 7, 6 and 5 each admit one escrow; the writer rejects
    // the rest even when the matcher read an older balance
    assert_eq!(offers, 4);
    let (balance, pending) = h.balance(y);
    assert_eq!(pending, Decimal::from(4));
    assert_eq!(balance, Decimal::from(4));
    assert_eq!(h.exchange.ledger().total_credit().unwrap(), total);
    h.exchange.ledger().check_non_negative().unwrap();

    h.shutdown().await;
}
