//! # pollmesh-store
//!
//! The shared key/value substrate behind the scheduler's lock, counters,
//! heartbeat table and unhealthy-worker set.
//!
//! Every operation is a single atomic command on the backing store. Callers
//! that need multi-key consistency take the config lock on top of this.

mod error;
mod memory;
mod redis_store;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Atomic single-key primitives required by the control plane.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Sets `key` only if it is absent, expiring after `ttl`.
    ///
    /// Returns true iff the key was newly set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Deletes `key`, returning whether it existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Deletes `key` only while it still holds `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Increments an integer key, treating a missing key as 0.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Decrements an integer key, treating a missing key as 0.
    async fn decr(&self, key: &str) -> StoreResult<i64>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Adds a set member, returning whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Removes a set member, returning whether it was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>>;

    /// Round-trips to the backing store.
    async fn ping(&self) -> StoreResult<()>;
}
