//! Worker liveness state: the heartbeat table and the unhealthy set.
//!
//! Both live in the shared store and are written without the config lock.
//! Heartbeats are last-write-wins per worker.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pollmesh_id::WorkerId;
use pollmesh_store::{StateStore, StoreResult};
use tracing::{debug, warn};

pub const WORKER_HEARTBEATS: &str = "WORKER_HEARTBEATS";
pub const UNHEALTHY_WORKERS: &str = "UNHEALTHY_WORKERS";

#[derive(Clone)]
pub struct WorkerHealth {
    store: Arc<dyn StateStore>,
}

impl WorkerHealth {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn record_heartbeat(&self, worker: WorkerId, seen_at: DateTime<Utc>) -> StoreResult<()> {
        self.store
            .hset(WORKER_HEARTBEATS, &worker.to_string(), &seen_at.to_rfc3339())
            .await?;
        debug!(worker = %worker, seen_at = %seen_at, "Heartbeat recorded");
        Ok(())
    }

    /// Last heartbeat per worker. Unparseable rows are skipped with a warning.
    pub async fn heartbeats(&self) -> StoreResult<BTreeMap<WorkerId, DateTime<Utc>>> {
        let raw = self.store.hgetall(WORKER_HEARTBEATS).await?;
        let mut beats = BTreeMap::new();
        for (field, value) in raw {
            let Ok(worker) = field.parse::<WorkerId>() else {
                warn!(field = %field, "Ignoring heartbeat for unknown worker id");
                continue;
            };
            match DateTime::parse_from_rfc3339(&value) {
                Ok(ts) => {
                    beats.insert(worker, ts.with_timezone(&Utc));
                }
                Err(e) => warn!(worker = %worker, value = %value, error = %e, "Ignoring malformed heartbeat"),
            }
        }
        Ok(beats)
    }

    pub async fn unhealthy(&self) -> StoreResult<HashSet<WorkerId>> {
        let members = self.store.smembers(UNHEALTHY_WORKERS).await?;
        Ok(members
            .iter()
            .filter_map(|m| m.parse::<WorkerId>().ok())
            .collect())
    }

    /// Returns true iff the worker was not already flagged.
    pub async fn mark_unhealthy(&self, worker: WorkerId) -> StoreResult<bool> {
        self.store.sadd(UNHEALTHY_WORKERS, &worker.to_string()).await
    }

    /// Returns true iff the worker had been flagged.
    pub async fn mark_recovered(&self, worker: WorkerId) -> StoreResult<bool> {
        self.store.srem(UNHEALTHY_WORKERS, &worker.to_string()).await
    }
}
