//! Full re-pack of every job across the healthy part of the pool.
//!
//! Assignments are cleared and first-fit is re-run per job in registry
//! order. Jobs that no longer fit are removed and their subscriptions set
//! inactive. The pass is O(jobs × workers) and rewrites the whole registry,
//! which is fine for the small job counts this pool is sized for.

use std::sync::Arc;

use pollmesh_id::{JobName, WorkerId};
use tracing::{info, instrument, warn};

use crate::command::subscription_id_of;
use crate::counters::JobCounters;
use crate::error::SchedulerResult;
use crate::heartbeat::WorkerHealth;
use crate::lock::{ConfigLock, LockLease};
use crate::placement::{Placement, WorkerLoad};
use crate::registry::{JobEntry, JobRegistry};
use crate::subscriptions::{StatusUpdate, SubscriptionStore};

/// Outcome of one rebalance pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Jobs that kept or received a worker.
    pub placed: usize,
    /// Placed jobs whose worker changed.
    pub moved: Vec<(JobName, WorkerId)>,
    /// Jobs removed for lack of capacity.
    pub dropped: Vec<JobName>,
    /// Per-job follow-up calls (counter or subscription store) that failed.
    /// Each failure is logged and the remaining jobs are still processed.
    pub failed_updates: usize,
}

impl RebalanceReport {
    pub fn changed(&self) -> bool {
        !self.moved.is_empty() || !self.dropped.is_empty()
    }
}

#[derive(Clone)]
pub struct Rebalancer {
    lock: ConfigLock,
    registry: JobRegistry,
    placement: Placement,
    health: WorkerHealth,
    counters: JobCounters,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl Rebalancer {
    pub fn new(
        lock: ConfigLock,
        registry: JobRegistry,
        placement: Placement,
        health: WorkerHealth,
        counters: JobCounters,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            lock,
            registry,
            placement,
            health,
            counters,
            subscriptions,
        }
    }

    /// Takes the config lock, re-packs, and releases it.
    pub async fn rebalance(&self) -> SchedulerResult<RebalanceReport> {
        let lease = self.lock.lock().await;
        let result = self.rebalance_locked(&lease).await;
        self.lock.release(lease).await;
        result
    }

    /// Re-packs under a lock the caller already holds.
    #[instrument(skip_all)]
    pub async fn rebalance_locked(&self, _lease: &LockLease) -> SchedulerResult<RebalanceReport> {
        let entries = self.registry.load().await?;
        let unhealthy = self.health.unhealthy().await?;
        let mut load = WorkerLoad::empty(self.placement.pool());
        let mut report = RebalanceReport::default();

        let mut kept = Vec::with_capacity(entries.len());
        let mut dropped = Vec::new();
        for mut entry in entries {
            let previous = entry.assigned_worker.take();
            match self.placement.strategy().select(&load, &unhealthy) {
                Some(worker) => {
                    load.assign(worker);
                    entry.assigned_worker = Some(worker);
                    if previous != Some(worker) {
                        report.moved.push((entry.name, worker));
                    }
                    kept.push(entry);
                }
                None => {
                    report.dropped.push(entry.name);
                    dropped.push(entry);
                }
            }
        }
        report.placed = kept.len();

        if report.changed() {
            self.registry.replace_jobs(&kept).await?;
        } else {
            info!(jobs = report.placed, "Rebalance found nothing to move");
        }

        // Every placed job is pushed, moved or not, so a push that failed on
        // an earlier pass is repaired by the next one.
        for entry in &kept {
            let Some(worker) = entry.assigned_worker else {
                continue;
            };
            if !self.push_active(entry, worker).await {
                report.failed_updates += 1;
            }
        }

        for entry in &dropped {
            if let Err(e) = self.counters.decrement_active().await {
                warn!(job = %entry.name, error = %e, "Failed to decrement active job counter");
                report.failed_updates += 1;
            }
            if !self.push_inactive(entry).await {
                report.failed_updates += 1;
            }
        }

        info!(
            placed = report.placed,
            moved = report.moved.len(),
            dropped = report.dropped.len(),
            failed_updates = report.failed_updates,
            "Rebalance complete"
        );
        Ok(report)
    }

    async fn push_active(&self, entry: &JobEntry, worker: WorkerId) -> bool {
        let Some(subscription) = subscription_id_of(&entry.command) else {
            warn!(job = %entry.name, "Cannot find subscription id in job command");
            return false;
        };
        let update = StatusUpdate::active(subscription, entry.name, &entry.command, worker);
        match self.subscriptions.set_status(&update).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    job = %entry.name,
                    subscription_id = %subscription,
                    error = %e,
                    "Failed to push new worker to subscription"
                );
                false
            }
        }
    }

    async fn push_inactive(&self, entry: &JobEntry) -> bool {
        let Some(subscription) = subscription_id_of(&entry.command) else {
            warn!(job = %entry.name, "Cannot find subscription id in dropped job command");
            return false;
        };
        let update = StatusUpdate::inactive(subscription, Some(&entry.command));
        match self.subscriptions.set_status(&update).await {
            Ok(()) => {
                info!(job = %entry.name, subscription_id = %subscription, "Job dropped for lack of capacity");
                true
            }
            Err(e) => {
                warn!(
                    job = %entry.name,
                    subscription_id = %subscription,
                    error = %e,
                    "Failed to mark dropped subscription inactive"
                );
                false
            }
        }
    }
}
