//! Service-level error taxonomy.

use pollmesh_id::{ApiId, JobName, SubscriptionId};
use pollmesh_store::StoreError;

use crate::registry::RegistryError;
use crate::subscriptions::SubscriptionStoreError;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no worker available")]
    NoCapacity,

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("subscription store error: {0}")]
    Upstream(#[from] SubscriptionStoreError),

    #[error("API {0} does not exist")]
    UnknownApi(ApiId),

    #[error("subscription {0} does not exist")]
    UnknownSubscription(SubscriptionId),

    #[error("subscription {0} is already active")]
    AlreadyActive(SubscriptionId),

    #[error("subscription {0} is not active")]
    NotActive(SubscriptionId),

    #[error("job {job} of subscription {subscription} is missing from the registry")]
    JobMissing {
        subscription: SubscriptionId,
        job: JobName,
    },

    #[error("not permitted: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}
