use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::error::ConfigError;
use crate::failsafe::swallow;
use crate::owner::OwnerId;
use crate::quorum::{RetryingQuorumExecutor, WaitStrategy};

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_TTL: Duration = Duration::from_secs(10);
const MIN_TTL: Duration = Duration::from_millis(2);

/// A leased slot out of a bounded pool of `max_leases`, distributed across N
/// independent backends with the same quorum discipline as [`RedLock`](crate::lock::RedLock).
///
/// Before each acquire attempt, a best-effort cleanup pass removes leases
/// whose holder is presumed dead (its companion marker key has expired),
/// freeing slots that would otherwise sit occupied until the lease's own TTL.
pub struct Semaphore {
    backends: Vec<Arc<dyn Backend>>,
    owner: OwnerId,
    max_leases: u32,
    executor: RetryingQuorumExecutor,
}

impl Semaphore {
    pub fn new(backends: Vec<Arc<dyn Backend>>, max_leases: u32) -> Result<Self, ConfigError> {
        Self::with_retry(backends, max_leases, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry(
        backends: Vec<Arc<dyn Backend>>,
        max_leases: u32,
        retry_count: u32,
        retry_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::EmptyBackends);
        }
        if max_leases < 1 {
            return Err(ConfigError::NonPositiveMaxLeases(max_leases));
        }
        let executor = RetryingQuorumExecutor::new(retry_count, retry_delay)?;
        Ok(Self {
            backends,
            owner: OwnerId::new(),
            max_leases,
            executor,
        })
    }

    /// The companion marker namespace used to detect crashed holders. Kept
    /// deterministic (derived from `key`) so every backend prunes the same
    /// logical set of markers.
    fn cleanup_key(key: &str) -> String {
        format!("{key}:cleanup")
    }

    /// Acquire one of `max_leases` slots across a majority of backends.
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<bool, ConfigError> {
        if ttl <= MIN_TTL {
            return Err(ConfigError::TtlTooShort(ttl));
        }

        self.clean_up(key).await;

        let owner = self.owner.clone();
        let key_owned = key.to_owned();
        let max_leases = self.max_leases;
        let results: Vec<bool> = self
            .executor
            .run(&self.backends, ttl, WaitStrategy::All, move |index, backend| {
                let key = key_owned.clone();
                let owner = owner.clone();
                async move {
                    swallow(
                        "set_semaphore_lock",
                        index,
                        backend.set_semaphore_lock(&key, owner.as_str(), max_leases, ttl),
                    )
                    .await
                    .filter(|ok| *ok)
                }
            })
            .await;

        if results.is_empty() {
            self.unlock(key).await;
            return Ok(false);
        }
        Ok(true)
    }

    /// `lock` with the default 10s TTL.
    pub async fn lock_default(&self, key: &str) -> Result<bool, ConfigError> {
        self.lock(key, DEFAULT_TTL).await
    }

    /// Release the held slot on every backend. Best-effort, no quorum check.
    pub async fn unlock(&self, key: &str) {
        let owner = self.owner.clone();
        let futures = self.backends.iter().cloned().enumerate().map(|(index, backend)| {
            let owner = owner.clone();
            let key = key.to_owned();
            async move {
                let _ = swallow(
                    "remove_semaphore_lock",
                    index,
                    backend.remove_semaphore_lock(&key, owner.as_str()),
                )
                .await;
            }
        });
        futures::future::join_all(futures).await;
    }

    async fn clean_up(&self, key: &str) {
        let cleanup_key = Self::cleanup_key(key);
        let futures = self.backends.iter().cloned().enumerate().map(|(index, backend)| {
            let key = key.to_owned();
            let cleanup_key = cleanup_key.clone();
            async move {
                let _ = swallow(
                    "clean_up_expired_semaphore_locks",
                    index,
                    backend.clean_up_expired_semaphore_locks(&key, &cleanup_key),
                )
                .await;
            }
        });
        futures::future::join_all(futures).await;
    }
}
