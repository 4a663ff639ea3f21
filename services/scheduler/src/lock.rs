//! The config lock: a single TTL-bounded token in the shared store that
//! serializes every job registry mutation system-wide.
//!
//! The TTL only recovers from a crashed holder. It does not bound how long a
//! critical section may run, so a holder that outlives its TTL can overlap
//! with the next holder. With [`ReleaseMode::Unconditional`] (the default)
//! that late holder's `release` also deletes the *next* holder's token.
//! [`ReleaseMode::Fenced`] closes that second hole by deleting the token only
//! while it still carries the caller's owner id.

use std::sync::Arc;
use std::time::Duration;

use pollmesh_store::StateStore;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Store key of the config lock token.
pub const CONFIG_LOCK_KEY: &str = "config_file_lock";

/// Consecutive failed attempts between contention warnings.
const WARN_EVERY_ATTEMPTS: u64 = 20;

/// How [`ConfigLock::release`] removes the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// Delete the token whoever holds it.
    #[default]
    Unconditional,
    /// Compare-and-delete against the lease's owner id.
    Fenced,
}

/// Proof of a successful acquire. Hand it back to [`ConfigLock::release`].
#[derive(Debug)]
#[must_use = "a lease must be released"]
pub struct LockLease {
    owner: String,
    acquired_at: Instant,
}

impl LockLease {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

#[derive(Clone)]
pub struct ConfigLock {
    store: Arc<dyn StateStore>,
    ttl: Duration,
    retry: Duration,
    mode: ReleaseMode,
}

impl ConfigLock {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration, retry: Duration, mode: ReleaseMode) -> Self {
        Self {
            store,
            ttl,
            retry,
            mode,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// One attempt to set the token if absent.
    ///
    /// Store failures count as contention: they are logged and `None` is
    /// returned so the caller simply retries.
    pub async fn acquire(&self) -> Option<LockLease> {
        let owner = Uuid::new_v4().to_string();
        match self.store.set_nx_ex(CONFIG_LOCK_KEY, &owner, self.ttl).await {
            Ok(true) => Some(LockLease {
                owner,
                acquired_at: Instant::now(),
            }),
            Ok(false) => None,
            Err(e) => {
                warn!(error = %e, "Config lock acquire failed");
                None
            }
        }
    }

    /// Acquires the lock, sleeping a fixed backoff between attempts.
    ///
    /// There is no upper bound on attempts: a store outage or a wedged
    /// holder stalls the caller until its TTL lapses. Persistent contention
    /// is logged so it can be alerted on.
    pub async fn lock(&self) -> LockLease {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            if let Some(lease) = self.acquire().await {
                debug!(attempt, "Config lock acquired");
                return lease;
            }
            if attempt % WARN_EVERY_ATTEMPTS == 0 {
                warn!(
                    attempt,
                    waited_ms = (self.retry * attempt as u32).as_millis() as u64,
                    "Still waiting for config lock"
                );
            } else {
                debug!(attempt, "Config lock busy, retrying");
            }
            tokio::time::sleep(self.retry).await;
        }
    }

    /// Releases the lock. Returns true iff a token was deleted.
    pub async fn release(&self, lease: LockLease) -> bool {
        let held_for = lease.held_for();
        if held_for > self.ttl {
            warn!(
                held_ms = held_for.as_millis() as u64,
                ttl_ms = self.ttl.as_millis() as u64,
                mode = ?self.mode,
                "Config lock held past its TTL; another holder may have overlapped"
            );
        }

        let result = match self.mode {
            ReleaseMode::Unconditional => self.store.del(CONFIG_LOCK_KEY).await,
            ReleaseMode::Fenced => self.store.del_if_eq(CONFIG_LOCK_KEY, &lease.owner).await,
        };

        match result {
            Ok(deleted) => {
                debug!(deleted, "Config lock released");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Config lock release failed; token will expire with its TTL");
                false
            }
        }
    }
}
