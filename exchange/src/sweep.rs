//! Reconciliation sweep
//!
//! Re-verifies every pending action that has not been superseded. A
//! confirmed follow is settled to the follower; anything else is left for
//! the next pass, since pending escrow never expires. Each action is its own
//! worker task, so one oracle failure only costs that item.
//!
//! Running the sweep twice with no change in the follow graph settles
//! nothing the second time: approval is a no-op for resolved actions.

use crate::{
    metrics::Metrics, notify::Notifier, oracle::FollowGraph, pool::WorkerPool,
    workflow::notify_new_follower, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{Action, Ledger, Resolution};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one sweep pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sweep ID
    pub sweep_id: Uuid,

    /// When the pass started
    pub started_at: DateTime<Utc>,

    /// Pending actions examined
    pub checked: usize,

    /// Actions settled by this pass
    pub approved: usize,

    /// Follows still not visible
    pub still_pending: usize,

    /// Actions settled or skipped elsewhere while the pass ran
    pub already_resolved: usize,

    /// Items that failed (oracle, storage or escrow guard)
    pub failed: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checked {} pending actions: {} approved, {} still pending, {} failed",
            self.checked, self.approved, self.still_pending, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Approved,
    StillPending,
    AlreadyResolved,
    Rejected,
}

/// On-demand reconciliation of pending actions
#[derive(Clone)]
pub struct ReconciliationSweep {
    ledger: Ledger,
    oracle: Arc<dyn FollowGraph>,
    notifier: Arc<dyn Notifier>,
    pool: WorkerPool,
    metrics: Metrics,
    stake: Decimal,
}

impl fmt::Debug for ReconciliationSweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationSweep")
            .field("pool", &self.pool)
            .field("stake", &self.stake)
            .finish()
    }
}

impl ReconciliationSweep {
    /// Create sweep
    pub fn new(
        ledger: Ledger,
        oracle: Arc<dyn FollowGraph>,
        notifier: Arc<dyn Notifier>,
        pool: WorkerPool,
        metrics: Metrics,
        stake: Decimal,
    ) -> Self {
        Self {
            ledger,
            oracle,
            notifier,
            pool,
            metrics,
            stake,
        }
    }

    /// Run one pass over all open actions
    pub async fn run(&self) -> Result<SweepReport> {
        let sweep_id = Uuid::new_v4();
        let started_at = Utc::now();
        let open = self.ledger.open_actions()?;

        info!(%sweep_id, pending = open.len(), "Starting reconciliation sweep");

        let handles: Vec<_> = open
            .into_iter()
            .map(|action| {
                let id = action.id;
                let ledger = self.ledger.clone();
                let oracle = self.oracle.clone();
                let notifier = self.notifier.clone();
                let stake = self.stake;
                let task = self.pool.spawn(async move {
                    verify_item(&ledger, oracle.as_ref(), notifier.as_ref(), action, stake).await
                });
                (id, task)
            })
            .collect();

        let mut report = SweepReport {
            sweep_id,
            started_at,
            checked: handles.len(),
            approved: 0,
            still_pending: 0,
            already_resolved: 0,
            failed: 0,
        };

        for (action_id, handle) in handles {
            match handle.await.map_err(crate::Error::from).and_then(|r| r) {
                Ok(ItemOutcome::Approved) => report.approved += 1,
                Ok(ItemOutcome::StillPending) => report.still_pending += 1,
                Ok(ItemOutcome::AlreadyResolved) => report.already_resolved += 1,
                Ok(ItemOutcome::Rejected) => report.failed += 1,
                Err(e) => {
                    if matches!(e, crate::Error::OracleUnavailable(_)) {
                        self.metrics.oracle_failures_total.inc();
                    }
                    warn!(%sweep_id, action_id = action_id.get(), "Sweep item failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        self.metrics.sweep_runs_total.inc();
        self.metrics
            .sweep_settlements_total
            .inc_by(report.approved as u64);

        info!(
            %sweep_id,
            checked = report.checked,
            approved = report.approved,
            still_pending = report.still_pending,
            failed = report.failed,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }
}

async fn verify_item(
    ledger: &Ledger,
    oracle: &dyn FollowGraph,
    notifier: &dyn Notifier,
    action: Action,
    stake: Decimal,
) -> Result<ItemOutcome> {
    if !oracle
        .is_follower(&action.follower_profile, &action.followee_profile)
        .await?
    {
        debug!(action_id = action.id.get(), "Follow still not visible");
        return Ok(ItemOutcome::StillPending);
    }

    Ok(match ledger.approve_action(action.id, stake).await? {
        Resolution::Applied => {
            info!(
                action_id = action.id.get(),
                follower = %action.follower_id,
                followee = %action.followee_id,
                "Pending follow settled by sweep"
            );
            notify_new_follower(notifier, action.followee_id).await;
            ItemOutcome::Approved
        }
        Resolution::AlreadyResolved => ItemOutcome::AlreadyResolved,
        Resolution::Rejected => ItemOutcome::Rejected,
    })
}

/// Runs the sweep on a fixed interval
#[derive(Debug)]
pub struct SweepScheduler {
    sweep: ReconciliationSweep,
    interval: Duration,
}

/// Running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepScheduler {
    /// Create scheduler
    pub fn new(sweep: ReconciliationSweep, interval: Duration) -> Self {
        Self { sweep, interval }
    }

    /// Start the interval loop; the first pass runs one interval from now
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Starting sweep scheduler");
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + self.interval,
                self.interval,
            );
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep.run().await {
                            error!("Scheduled sweep failed: {}", e);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Sweep scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for an in-flight pass to finish
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await?;
        Ok(())
    }
}
