//! Job name generation and the active job count.
//!
//! Both counters are single atomic keys in the shared store and are not
//! covered by the config lock.

use std::sync::Arc;

use pollmesh_id::JobName;
use pollmesh_store::{StateStore, StoreResult};
use tracing::info;

use crate::registry::JobEntry;

pub const ACTIVE_JOB_COUNTER: &str = "ACTIVE_JOB_COUNTER";
pub const HISTORICAL_JOB_COUNTER: &str = "HISTORICAL_JOB_COUNTER";

#[derive(Clone)]
pub struct JobCounters {
    store: Arc<dyn StateStore>,
}

impl JobCounters {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Issues the next job name.
    ///
    /// The historical counter holds the suffix to hand out next; INCR
    /// reserves it atomically so concurrent callers never collide. Suffix 0
    /// is skipped so an unseeded counter still starts at `job1`.
    pub async fn next_job_name(&self) -> StoreResult<JobName> {
        loop {
            let reserved = self.store.incr(HISTORICAL_JOB_COUNTER).await? - 1;
            if reserved > 0 {
                if let Ok(name) = JobName::new(reserved as u64) {
                    return Ok(name);
                }
            }
        }
    }

    pub async fn increment_active(&self) -> StoreResult<i64> {
        self.store.incr(ACTIVE_JOB_COUNTER).await
    }

    pub async fn decrement_active(&self) -> StoreResult<i64> {
        self.store.decr(ACTIVE_JOB_COUNTER).await
    }

    pub async fn active_count(&self) -> StoreResult<i64> {
        self.read(ACTIVE_JOB_COUNTER).await
    }

    /// The suffix the next [`next_job_name`](Self::next_job_name) will issue.
    pub async fn historical_count(&self) -> StoreResult<i64> {
        self.read(HISTORICAL_JOB_COUNTER).await
    }

    /// Aligns both counters with the registry at process start.
    ///
    /// The active count is overwritten with the number of entries. The
    /// historical counter is raised to `max suffix + 1` but never lowered,
    /// so names issued by an earlier process are not handed out again.
    pub async fn reconcile(&self, entries: &[JobEntry]) -> StoreResult<()> {
        let active = entries.len() as i64;
        self.store
            .set(ACTIVE_JOB_COUNTER, &active.to_string())
            .await?;

        let floor = entries
            .iter()
            .map(|e| e.name.suffix() as i64)
            .max()
            .unwrap_or(0)
            + 1;
        let current = self.historical_count().await?;
        let historical = current.max(floor);
        if historical != current {
            self.store
                .set(HISTORICAL_JOB_COUNTER, &historical.to_string())
                .await?;
        }

        info!(active, historical, "Job counters reconciled from registry");
        Ok(())
    }

    async fn read(&self, key: &str) -> StoreResult<i64> {
        let raw = self.store.get(key).await?;
        match raw {
            None => Ok(0),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| pollmesh_store::StoreError::NotAnInteger {
                    key: key.to_string(),
                    value,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollmesh_store::MemoryStore;

    fn entry(suffix: u64) -> JobEntry {
        JobEntry {
            name: JobName::new(suffix).unwrap(),
            interval_secs: 5,
            command: "echo".to_string(),
            assigned_worker: None,
        }
    }

    #[tokio::test]
    async fn test_names_strictly_increase() {
        let counters = JobCounters::new(Arc::new(MemoryStore::new()));
        let a = counters.next_job_name().await.unwrap();
        let b = counters.next_job_name().await.unwrap();
        let c = counters.next_job_name().await.unwrap();
        assert_eq!(a.to_string(), "job1");
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_reconcile_sets_active_and_raises_historical() {
        let counters = JobCounters::new(Arc::new(MemoryStore::new()));
        counters
            .reconcile(&[entry(3), entry(9), entry(4)])
            .await
            .unwrap();

        assert_eq!(counters.active_count().await.unwrap(), 3);
        assert_eq!(counters.historical_count().await.unwrap(), 10);
        assert_eq!(counters.next_job_name().await.unwrap().to_string(), "job10");
    }

    #[tokio::test]
    async fn test_reconcile_never_lowers_historical() {
        let store = Arc::new(MemoryStore::new());
        store.set(HISTORICAL_JOB_COUNTER, "42").await.unwrap();
        let counters = JobCounters::new(store);

        counters.reconcile(&[entry(2)]).await.unwrap();
        assert_eq!(counters.historical_count().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_active_counter_moves_by_one() {
        let counters = JobCounters::new(Arc::new(MemoryStore::new()));
        counters.increment_active().await.unwrap();
        counters.increment_active().await.unwrap();
        counters.decrement_active().await.unwrap();
        assert_eq!(counters.active_count().await.unwrap(), 1);
    }
}
