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

fn check_ttl(ttl: Duration) -> Result<(), ConfigError> {
    if ttl > MIN_TTL {
        Ok(())
    } else {
        Err(ConfigError::TtlTooShort(ttl))
    }
}

/// Mutual exclusion against a single backend: `SET key owner NX PX ttl`
/// followed by owner-checked conditional delete on unlock.
///
/// Goes through the same retrying wrapper as [`RedLock`] so its failure
/// semantics (bounded retries, swallowed backend errors) match the quorum
/// lock's, even though a single backend has no quorum decision to make.
pub struct SimpleLock {
    backend: Arc<dyn Backend>,
    owner: OwnerId,
    retry_count: u32,
    retry_delay: Duration,
}

impl SimpleLock {
    pub fn new(backend: Arc<dyn Backend>) -> Result<Self, ConfigError> {
        Self::with_retry(backend, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry(
        backend: Arc<dyn Backend>,
        retry_count: u32,
        retry_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if retry_count < 1 {
            return Err(ConfigError::NonPositiveRetryCount(retry_count));
        }
        if retry_delay.is_zero() {
            return Err(ConfigError::NonPositiveRetryDelay);
        }
        Ok(Self {
            backend,
            owner: OwnerId::new(),
            retry_count,
            retry_delay,
        })
    }

    /// Acquire the lock, retrying up to `retry_count` times with
    /// `retry_delay` between attempts. Returns `false` once every attempt
    /// has been exhausted.
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<bool, ConfigError> {
        check_ttl(ttl)?;

        for attempt in 1..=self.retry_count {
            let acquired = swallow("set_lock", 0, self.backend.set_lock(key, self.owner.as_str(), ttl))
                .await
                .unwrap_or(false);
            if acquired {
                return Ok(true);
            }
            if attempt < self.retry_count {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Ok(false)
    }

    /// `lock` with the default 10s TTL.
    pub async fn lock_default(&self, key: &str) -> Result<bool, ConfigError> {
        self.lock(key, DEFAULT_TTL).await
    }

    /// Release the lock. A no-op (never panics, never raises) if this
    /// instance does not currently own `key`.
    pub async fn unlock(&self, key: &str) {
        let _ = swallow("remove_lock", 0, self.backend.remove_lock(key, self.owner.as_str())).await;
    }
}

/// Redlock-style mutual exclusion across N independent backends.
///
/// `lock` succeeds only when a majority of backends grant the lease within
/// the timing budget enforced by the quorum executor; on any other outcome
/// it performs a best-effort `unlock` across all backends before returning
/// `false`, so a lease granted on a minority of backends does not strand the
/// resource until TTL expiry.
pub struct RedLock {
    backends: Vec<Arc<dyn Backend>>,
    owner: OwnerId,
    executor: RetryingQuorumExecutor,
}

impl RedLock {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Result<Self, ConfigError> {
        Self::with_retry(backends, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry(
        backends: Vec<Arc<dyn Backend>>,
        retry_count: u32,
        retry_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::EmptyBackends);
        }
        let executor = RetryingQuorumExecutor::new(retry_count, retry_delay)?;
        Ok(Self {
            backends,
            owner: OwnerId::new(),
            executor,
        })
    }

    /// Acquire the lock across a majority of backends. On a quorum or
    /// validity miss, rolls back any tentative writes across all backends
    /// and returns `false`.
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<bool, ConfigError> {
        check_ttl(ttl)?;

        let owner = self.owner.clone();
        let key_owned = key.to_owned();
        let results: Vec<bool> = self
            .executor
            .run(&self.backends, ttl, WaitStrategy::All, move |index, backend| {
                let key = key_owned.clone();
                let owner = owner.clone();
                async move {
                    swallow("set_lock", index, backend.set_lock(&key, owner.as_str(), ttl))
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

    /// Fire `remove_lock` on every backend in parallel. Best-effort: no
    /// quorum check, no retry — a minority of failures here just leaves
    /// those keys to expire on their own TTL.
    pub async fn unlock(&self, key: &str) {
        let owner = self.owner.clone();
        let futures = self.backends.iter().cloned().enumerate().map(|(index, backend)| {
            let owner = owner.clone();
            let key = key.to_owned();
            async move {
                let _ = swallow("remove_lock", index, backend.remove_lock(&key, owner.as_str())).await;
            }
        });
        futures::future::join_all(futures).await;
    }
}
