//! Health monitor background worker.
//!
//! Every heartbeat interval `H` it compares each worker's last heartbeat
//! against `2H`. Stale workers are flagged and jobs are re-packed away from
//! them; workers whose heartbeats resume are cleared without a re-pack.

use std::time::Duration;

use chrono::{DateTime, Utc};
use pollmesh_id::WorkerId;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SchedulerResult;
use crate::heartbeat::WorkerHealth;
use crate::placement::WorkerPool;
use crate::rebalance::{RebalanceReport, Rebalancer};

/// What one monitor cycle changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub stale: Vec<WorkerId>,
    pub newly_flagged: Vec<WorkerId>,
    pub recovered: Vec<WorkerId>,
    pub rebalance: Option<RebalanceReport>,
}

pub struct HealthMonitor {
    health: WorkerHealth,
    rebalancer: Rebalancer,
    pool: WorkerPool,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(health: WorkerHealth, rebalancer: Rebalancer, pool: WorkerPool, interval: Duration) -> Self {
        Self {
            health,
            rebalancer,
            pool,
            interval,
        }
    }

    /// Run the monitor until shutdown is signaled.
    ///
    /// A cycle in progress is abandoned when shutdown arrives. If it held
    /// the config lock, the token lapses with its TTL.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting health monitor"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            let stop = tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        result = self.run_cycle() => {
                            if let Err(e) = result {
                                error!(error = %e, "Health monitor cycle failed");
                            }
                            false
                        }
                        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                    }
                }
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            };
            if stop {
                info!("Health monitor shutting down");
                break;
            }
        }
    }

    pub async fn run_cycle(&self) -> SchedulerResult<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One cycle evaluated as of `now`.
    ///
    /// Workers with no heartbeat row are not judged. Any stale worker
    /// triggers a rebalance. One pass per cycle covers every stale worker
    /// at once, since the pass already excludes the whole unhealthy set.
    /// Repeating it while a worker stays stale re-pushes every placed job,
    /// which repairs subscriptions whose earlier push failed.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> SchedulerResult<CycleReport> {
        let stale_after = self.interval * 2;
        let heartbeats = self.health.heartbeats().await?;
        let unhealthy = self.health.unhealthy().await?;
        let mut report = CycleReport::default();

        for (worker, seen_at) in heartbeats {
            if !self.pool.contains(worker) {
                debug!(worker = %worker, "Skipping heartbeat from outside the pool");
                continue;
            }
            // Timestamps in the future count as fresh.
            let age = (now - seen_at).to_std().unwrap_or(Duration::ZERO);
            if age > stale_after {
                report.stale.push(worker);
                if self.health.mark_unhealthy(worker).await? {
                    warn!(worker = %worker, age_secs = age.as_secs(), "Worker missed heartbeats, marked unhealthy");
                    report.newly_flagged.push(worker);
                }
            } else if unhealthy.contains(&worker) && self.health.mark_recovered(worker).await? {
                info!(worker = %worker, "Worker heartbeats resumed, marked healthy");
                report.recovered.push(worker);
            }
        }

        if !report.stale.is_empty() {
            report.rebalance = Some(self.rebalancer.rebalance().await?);
        }
        Ok(report)
    }
}
