//! Worker selection for new and re-packed jobs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use pollmesh_id::WorkerId;
use tracing::{debug, warn};

use crate::error::SchedulerResult;
use crate::heartbeat::WorkerHealth;
use crate::registry::{JobEntry, JobRegistry};

/// The fixed worker pool and its per-worker capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    pub max_workers: u32,
    pub max_jobs_per_worker: usize,
}

impl WorkerPool {
    pub fn workers(&self) -> impl Iterator<Item = WorkerId> {
        WorkerId::pool(self.max_workers)
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        worker.in_pool(self.max_workers)
    }
}

/// Jobs assigned to each pool worker.
#[derive(Debug, Clone)]
pub struct WorkerLoad {
    pool: WorkerPool,
    counts: BTreeMap<WorkerId, usize>,
}

impl WorkerLoad {
    pub fn empty(pool: WorkerPool) -> Self {
        Self {
            pool,
            counts: pool.workers().map(|w| (w, 0)).collect(),
        }
    }

    /// Counts assignments in `entries`. Assignments to workers outside the
    /// pool are ignored.
    pub fn from_entries(pool: WorkerPool, entries: &[JobEntry]) -> Self {
        let mut load = Self::empty(pool);
        for entry in entries {
            let Some(worker) = entry.assigned_worker else {
                continue;
            };
            if !load.assign(worker) {
                warn!(job = %entry.name, worker = %worker, "Job assigned to a worker outside the pool");
            }
        }
        load
    }

    pub fn pool(&self) -> WorkerPool {
        self.pool
    }

    pub fn count(&self, worker: WorkerId) -> usize {
        self.counts.get(&worker).copied().unwrap_or(0)
    }

    pub fn has_capacity(&self, worker: WorkerId) -> bool {
        self.pool.contains(worker) && self.count(worker) < self.pool.max_jobs_per_worker
    }

    /// Records one more job on `worker`. Returns false for non-pool workers.
    pub fn assign(&mut self, worker: WorkerId) -> bool {
        match self.counts.get_mut(&worker) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Per-worker counts in pool order.
    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, usize)> + '_ {
        self.counts.iter().map(|(w, c)| (*w, *c))
    }
}

/// Picks a worker for one job given the current load.
pub trait PlacementStrategy: Send + Sync {
    fn select(&self, load: &WorkerLoad, unhealthy: &HashSet<WorkerId>) -> Option<WorkerId>;
}

/// Greedy first-fit: the lowest-numbered healthy worker under capacity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl PlacementStrategy for FirstFit {
    fn select(&self, load: &WorkerLoad, unhealthy: &HashSet<WorkerId>) -> Option<WorkerId> {
        load.pool()
            .workers()
            .find(|w| !unhealthy.contains(w) && load.has_capacity(*w))
    }
}

/// Placement against live registry and health state.
#[derive(Clone)]
pub struct Placement {
    pool: WorkerPool,
    strategy: Arc<dyn PlacementStrategy>,
    registry: JobRegistry,
    health: WorkerHealth,
}

impl Placement {
    pub fn new(
        pool: WorkerPool,
        strategy: Arc<dyn PlacementStrategy>,
        registry: JobRegistry,
        health: WorkerHealth,
    ) -> Self {
        Self {
            pool,
            strategy,
            registry,
            health,
        }
    }

    pub fn pool(&self) -> WorkerPool {
        self.pool
    }

    pub fn strategy(&self) -> &dyn PlacementStrategy {
        self.strategy.as_ref()
    }

    /// Chooses a worker for one new job, or `None` when the pool is full.
    pub async fn place(&self) -> SchedulerResult<Option<WorkerId>> {
        let entries = self.registry.load().await?;
        let unhealthy = self.health.unhealthy().await?;
        let load = WorkerLoad::from_entries(self.pool, &entries);
        let chosen = self.strategy.select(&load, &unhealthy);
        debug!(
            worker = ?chosen.map(|w| w.to_string()),
            jobs = entries.len(),
            unhealthy = unhealthy.len(),
            "Placement decided"
        );
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollmesh_id::JobName;

    const POOL: WorkerPool = WorkerPool {
        max_workers: 3,
        max_jobs_per_worker: 2,
    };

    fn w(n: u32) -> WorkerId {
        WorkerId::new(n).unwrap()
    }

    fn assigned(worker: u32, suffix: u64) -> JobEntry {
        JobEntry {
            name: JobName::new(suffix).unwrap(),
            interval_secs: 5,
            command: "echo".to_string(),
            assigned_worker: Some(w(worker)),
        }
    }

    #[test]
    fn test_first_fit_prefers_lowest_index() {
        let load = WorkerLoad::from_entries(POOL, &[assigned(2, 1)]);
        assert_eq!(FirstFit.select(&load, &HashSet::new()), Some(w(1)));
    }

    #[test]
    fn test_first_fit_is_not_least_loaded() {
        let load = WorkerLoad::from_entries(POOL, &[assigned(1, 1)]);
        // worker-1 has one job and worker-2 none; first-fit still fills worker-1.
        assert_eq!(FirstFit.select(&load, &HashSet::new()), Some(w(1)));
    }

    #[test]
    fn test_first_fit_skips_full_and_unhealthy() {
        let load = WorkerLoad::from_entries(POOL, &[assigned(1, 1), assigned(1, 2)]);
        let unhealthy = HashSet::from([w(2)]);
        assert_eq!(FirstFit.select(&load, &unhealthy), Some(w(3)));
    }

    #[test]
    fn test_first_fit_none_when_full() {
        let entries: Vec<_> = (1..=3)
            .flat_map(|worker| [assigned(worker, worker as u64 * 10), assigned(worker, worker as u64 * 10 + 1)])
            .collect();
        let load = WorkerLoad::from_entries(POOL, &entries);
        assert_eq!(FirstFit.select(&load, &HashSet::new()), None);
    }

    #[test]
    fn test_load_ignores_out_of_pool_assignments() {
        let load = WorkerLoad::from_entries(POOL, &[assigned(7, 1)]);
        assert!(load.iter().all(|(_, count)| count == 0));
        assert!(!load.has_capacity(w(7)));
    }
}
