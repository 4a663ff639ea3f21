//! In-process [`StateStore`] used by tests and single-node development.
//!
//! Expiry is measured on the tokio clock, so tests running with paused time
//! can advance past a TTL deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{StateStore, StoreError, StoreResult};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn live_string(&mut self, key: &str) -> Option<&Entry> {
        let now = Instant::now();
        if self.strings.get(key).is_some_and(|e| !e.is_live(now)) {
            self.strings.remove(key);
        }
        self.strings.get(key)
    }

    fn add(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        let current = match self.live_string(key) {
            Some(entry) => entry
                .value
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value: entry.value.clone(),
                })?,
            None => 0,
        };
        let next = current + delta;
        let expires_at = self.strings.get(key).and_then(|e| e.expires_at);
        self.strings.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}

/// A [`StateStore`] held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.live_string(key).is_some() {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_string(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let existed = inner.live_string(key).is_some();
        inner.strings.remove(key);
        let hash = inner.hashes.remove(key).is_some();
        let set = inner.sets.remove(key).is_some();
        Ok(existed || hash || set)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let held = inner.live_string(key).is_some_and(|e| e.value == expected);
        if held {
            inner.strings.remove(key);
        }
        Ok(held)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.inner.lock().await.add(key, 1)
    }

    async fn decr(&self, key: &str) -> StoreResult<i64> {
        self.inner.lock().await.add(key, -1)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let inner = self.inner.lock().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member)))
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.sets.get(key).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
