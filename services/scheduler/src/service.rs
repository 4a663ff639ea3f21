//! The scheduler service object.
//!
//! Owns every component and exposes the lock-guarded operations the HTTP
//! layer calls. Built once at startup and shared by handlers and the health
//! monitor; nothing here is a process-wide global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pollmesh_id::{ApiId, JobName, SubscriptionId, WorkerId};
use pollmesh_store::StateStore;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::command::CommandTemplate;
use crate::config::Config;
use crate::counters::JobCounters;
use crate::error::{SchedulerError, SchedulerResult};
use crate::heartbeat::WorkerHealth;
use crate::lock::{ConfigLock, LockLease, ReleaseMode};
use crate::monitor::HealthMonitor;
use crate::placement::{FirstFit, Placement, PlacementStrategy, WorkerLoad, WorkerPool};
use crate::rebalance::Rebalancer;
use crate::registry::{EngineGateway, JobEntry, JobRegistry};
use crate::subscriptions::{
    AvailableApi, NewSubscription, StatusUpdate, Subscription, SubscriptionStatus,
    SubscriptionStore, SubscriptionStoreError, UserRef,
};

/// Tunables for [`Scheduler`], usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pool: WorkerPool,
    pub registry_path: PathBuf,
    pub heartbeat_interval: Duration,
    pub lock_ttl: Duration,
    pub lock_retry: Duration,
    pub release_mode: ReleaseMode,
    pub fetch_script: String,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool: WorkerPool {
                max_workers: config.max_workers,
                max_jobs_per_worker: config.max_jobs_per_worker,
            },
            registry_path: config.registry_path.clone(),
            heartbeat_interval: config.heartbeat_interval,
            lock_ttl: config.lock_ttl,
            lock_retry: config.lock_retry,
            release_mode: if config.lock_fenced {
                ReleaseMode::Fenced
            } else {
                ReleaseMode::Unconditional
            },
            fetch_script: config.fetch_script.clone(),
        }
    }
}

/// Who is asking. Services act for anyone; users only for themselves
/// unless they are admins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Service,
    User { id: UserRef, admin: bool },
}

impl Actor {
    pub fn may_act_for(&self, user: &UserRef) -> bool {
        match self {
            Actor::Service => true,
            Actor::User { id, admin } => *admin || id == user,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub user_id: UserRef,
    pub api_id: ApiId,
    pub interval_secs: u64,
}

/// A job that has been placed and registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub subscription_id: SubscriptionId,
    pub job: JobName,
    pub worker: WorkerId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub worker: WorkerId,
    pub jobs: usize,
    pub capacity: usize,
    pub healthy: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub workers: Vec<WorkerStatus>,
    pub workers_in_use: usize,
    pub registered_jobs: usize,
    pub active_jobs: i64,
    pub historical_jobs: i64,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    pool: WorkerPool,
    heartbeat_interval: Duration,
    lock: ConfigLock,
    registry: JobRegistry,
    counters: JobCounters,
    health: WorkerHealth,
    placement: Placement,
    rebalancer: Rebalancer,
    subscriptions: Arc<dyn SubscriptionStore>,
    commands: CommandTemplate,
}

impl Scheduler {
    pub fn new(
        settings: &SchedulerSettings,
        store: Arc<dyn StateStore>,
        engine: Arc<dyn EngineGateway>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self::with_strategy(settings, store, engine, subscriptions, Arc::new(FirstFit))
    }

    pub fn with_strategy(
        settings: &SchedulerSettings,
        store: Arc<dyn StateStore>,
        engine: Arc<dyn EngineGateway>,
        subscriptions: Arc<dyn SubscriptionStore>,
        strategy: Arc<dyn PlacementStrategy>,
    ) -> Self {
        let lock = ConfigLock::new(
            store.clone(),
            settings.lock_ttl,
            settings.lock_retry,
            settings.release_mode,
        );
        let registry = JobRegistry::new(settings.registry_path.clone(), engine);
        let counters = JobCounters::new(store.clone());
        let health = WorkerHealth::new(store.clone());
        let placement = Placement::new(settings.pool, strategy, registry.clone(), health.clone());
        let rebalancer = Rebalancer::new(
            lock.clone(),
            registry.clone(),
            placement.clone(),
            health.clone(),
            counters.clone(),
            subscriptions.clone(),
        );

        Self {
            store,
            pool: settings.pool,
            heartbeat_interval: settings.heartbeat_interval,
            lock,
            registry,
            counters,
            health,
            placement,
            rebalancer,
            subscriptions,
            commands: CommandTemplate::new(settings.fetch_script.clone()),
        }
    }

    pub fn lock(&self) -> &ConfigLock {
        &self.lock
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &JobCounters {
        &self.counters
    }

    pub fn health(&self) -> &WorkerHealth {
        &self.health
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn rebalancer(&self) -> &Rebalancer {
        &self.rebalancer
    }

    pub fn pool(&self) -> WorkerPool {
        self.pool
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.health.clone(),
            self.rebalancer.clone(),
            self.pool,
            self.heartbeat_interval,
        )
    }

    /// Aligns the job counters with the registry. Run once at startup.
    pub async fn bootstrap(&self) -> SchedulerResult<()> {
        let entries = self.registry.load().await?;
        self.counters.reconcile(&entries).await?;
        Ok(())
    }

    /// Creates a subscription and places its job.
    #[instrument(skip(self, actor), fields(api_id = %request.api_id, user_id = %request.user_id))]
    pub async fn subscribe(&self, actor: &Actor, request: SubscribeRequest) -> SchedulerResult<Activation> {
        if request.interval_secs == 0 {
            return Err(SchedulerError::Invalid("interval must be a positive number of seconds".into()));
        }
        if !actor.may_act_for(&request.user_id) {
            return Err(SchedulerError::Forbidden("cannot subscribe on behalf of another user".into()));
        }

        let lease = self.lock.lock().await;
        let result = self.subscribe_locked(&request).await;
        self.lock.release(lease).await;
        result
    }

    async fn subscribe_locked(&self, request: &SubscribeRequest) -> SchedulerResult<Activation> {
        let api = self.available_api(request.api_id).await?;
        let job = self.counters.next_job_name().await?;

        let subscription_id = self
            .subscriptions
            .create_subscription(&NewSubscription {
                user_id: request.user_id.clone(),
                api_id: request.api_id,
                interval: request.interval_secs,
                status: SubscriptionStatus::Inactive,
                job_name: job,
            })
            .await?;

        let activated = match self.placement.place().await {
            Ok(Some(worker)) => {
                let command = self.commands.render(&api, subscription_id);
                self.activate(subscription_id, job, request.interval_secs, command, worker)
                    .await
            }
            Ok(None) => Err(SchedulerError::NoCapacity),
            Err(e) => Err(e),
        };

        if let Err(e) = &activated {
            warn!(subscription_id = %subscription_id, job = %job, error = %e, "Subscribe failed, rolling back subscription");
            if let Err(rollback) = self.subscriptions.delete_subscription(subscription_id).await {
                error!(subscription_id = %subscription_id, error = %rollback, "Failed to roll back subscription");
            }
        }
        activated
    }

    /// Re-activates an inactive subscription under a fresh job name.
    #[instrument(skip(self, actor))]
    pub async fn resubscribe(&self, actor: &Actor, subscription_id: SubscriptionId) -> SchedulerResult<Activation> {
        let lease = self.lock.lock().await;
        let result = self.resubscribe_locked(actor, subscription_id).await;
        self.lock.release(lease).await;
        result
    }

    async fn resubscribe_locked(&self, actor: &Actor, subscription_id: SubscriptionId) -> SchedulerResult<Activation> {
        let subscription = self.subscription_for(actor, subscription_id).await?;
        if subscription.status == SubscriptionStatus::Active {
            return Err(SchedulerError::AlreadyActive(subscription_id));
        }

        let Some(worker) = self.placement.place().await? else {
            return Err(SchedulerError::NoCapacity);
        };

        let command = match subscription.stored_command() {
            Some(command) => command.to_string(),
            None => {
                let api = self.available_api(subscription.api_id).await?;
                self.commands.render(&api, subscription_id)
            }
        };
        let job = self.counters.next_job_name().await?;
        self.activate(subscription_id, job, subscription.interval, command, worker)
            .await
    }

    /// Removes an active subscription's job, then re-packs the pool.
    #[instrument(skip(self, actor))]
    pub async fn unsubscribe(&self, actor: &Actor, subscription_id: SubscriptionId) -> SchedulerResult<JobName> {
        let lease = self.lock.lock().await;
        let result = self.unsubscribe_locked(actor, subscription_id, &lease).await;
        self.lock.release(lease).await;
        result
    }

    async fn unsubscribe_locked(
        &self,
        actor: &Actor,
        subscription_id: SubscriptionId,
        lease: &LockLease,
    ) -> SchedulerResult<JobName> {
        let subscription = self.subscription_for(actor, subscription_id).await?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(SchedulerError::NotActive(subscription_id));
        }
        let Some(job) = subscription.job() else {
            return Err(SchedulerError::NotActive(subscription_id));
        };

        let failure = match self.registry.delete_job(job).await {
            Ok(true) => None,
            Ok(false) => Some(SchedulerError::JobMissing {
                subscription: subscription_id,
                job,
            }),
            Err(e) => Some(SchedulerError::Registry(e)),
        };
        if let Some(failure) = failure {
            error!(job = %job, error = %failure, "Unsubscribe could not remove job, flagging subscription");
            if let Err(e) = self.subscriptions.set_status(&StatusUpdate::errored(&subscription)).await {
                error!(subscription_id = %subscription_id, error = %e, "Failed to flag subscription as errored");
            }
            return Err(failure);
        }

        if let Err(e) = self.counters.decrement_active().await {
            warn!(job = %job, error = %e, "Failed to decrement active job counter");
        }
        // The job is already gone from the registry, so the re-pack runs even
        // when the INACTIVE push fails.
        let status = self
            .subscriptions
            .set_status(&StatusUpdate::inactive(subscription_id, subscription.stored_command()))
            .await;
        if let Err(e) = &status {
            error!(subscription_id = %subscription_id, error = %e, "Failed to mark unsubscribed subscription inactive");
        } else {
            info!(job = %job, subscription_id = %subscription_id, "Unsubscribed");
        }

        if let Err(e) = self.rebalancer.rebalance_locked(lease).await {
            warn!(error = %e, "Rebalance after unsubscribe failed");
        }
        status?;
        Ok(job)
    }

    /// Registers a placed job and marks its subscription active, undoing
    /// the registry write and the counter bump if a later step fails.
    async fn activate(
        &self,
        subscription_id: SubscriptionId,
        job: JobName,
        interval_secs: u64,
        command: String,
        worker: WorkerId,
    ) -> SchedulerResult<Activation> {
        let entry = JobEntry {
            name: job,
            interval_secs,
            command,
            assigned_worker: Some(worker),
        };

        if let Err(e) = self.registry.add_job(&entry).await {
            self.remove_job_quietly(job).await;
            return Err(e.into());
        }

        if let Err(e) = self.counters.increment_active().await {
            self.remove_job_quietly(job).await;
            return Err(e.into());
        }

        let update = StatusUpdate::active(subscription_id, job, &entry.command, worker);
        if let Err(e) = self.subscriptions.set_status(&update).await {
            self.remove_job_quietly(job).await;
            if let Err(e) = self.counters.decrement_active().await {
                warn!(job = %job, error = %e, "Failed to decrement active job counter");
            }
            return Err(e.into());
        }

        info!(job = %job, worker = %worker, subscription_id = %subscription_id, "Job activated");
        Ok(Activation {
            subscription_id,
            job,
            worker,
        })
    }

    async fn remove_job_quietly(&self, job: JobName) {
        if let Err(e) = self.registry.delete_job(job).await {
            error!(job = %job, error = %e, "Failed to remove job while compensating");
        }
    }

    async fn available_api(&self, api_id: ApiId) -> SchedulerResult<AvailableApi> {
        let api = self
            .subscriptions
            .available_api(api_id)
            .await
            .map_err(|e| match e {
                SubscriptionStoreError::NotFound { .. } => SchedulerError::UnknownApi(api_id),
                other => SchedulerError::Upstream(other),
            })?;
        if api.url.trim().is_empty() || api.url.contains(char::is_whitespace) {
            return Err(SchedulerError::Invalid(format!(
                "API {api_id} has an unusable url '{}'",
                api.url
            )));
        }
        Ok(api)
    }

    async fn subscription_for(&self, actor: &Actor, subscription_id: SubscriptionId) -> SchedulerResult<Subscription> {
        let subscription = self
            .subscriptions
            .subscription(subscription_id)
            .await
            .map_err(|e| match e {
                SubscriptionStoreError::NotFound { .. } => {
                    SchedulerError::UnknownSubscription(subscription_id)
                }
                other => SchedulerError::Upstream(other),
            })?;
        if !actor.may_act_for(&subscription.user_id) {
            return Err(SchedulerError::Forbidden(format!(
                "subscription {subscription_id} belongs to another user"
            )));
        }
        Ok(subscription)
    }

    /// Lock-free heartbeat ingestion.
    pub async fn record_heartbeat(&self, worker: WorkerId, seen_at: DateTime<Utc>) -> SchedulerResult<()> {
        if !self.pool.contains(worker) {
            return Err(SchedulerError::Invalid(format!(
                "{worker} is not part of the {}-worker pool",
                self.pool.max_workers
            )));
        }
        self.health.record_heartbeat(worker, seen_at).await?;
        Ok(())
    }

    /// Snapshot of load, health and counters. Reads without the lock.
    pub async fn status(&self) -> SchedulerResult<PoolStatus> {
        let entries = self.registry.load().await?;
        let unhealthy = self.health.unhealthy().await?;
        let heartbeats = self.health.heartbeats().await?;
        let load = WorkerLoad::from_entries(self.pool, &entries);

        let workers: Vec<WorkerStatus> = load
            .iter()
            .map(|(worker, jobs)| WorkerStatus {
                worker,
                jobs,
                capacity: self.pool.max_jobs_per_worker,
                healthy: !unhealthy.contains(&worker),
                last_heartbeat: heartbeats.get(&worker).copied(),
            })
            .collect();

        Ok(PoolStatus {
            workers_in_use: workers.iter().filter(|w| w.jobs > 0).count(),
            workers,
            registered_jobs: entries.len(),
            active_jobs: self.counters.active_count().await?,
            historical_jobs: self.counters.historical_count().await?,
        })
    }

    /// Checks the state store and the registry file are reachable.
    pub async fn readiness(&self) -> (Result<(), String>, Result<(), String>) {
        let store = self.store.ping().await.map_err(|e| e.to_string());
        let registry = self
            .registry
            .load()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        (store, registry)
    }
}
