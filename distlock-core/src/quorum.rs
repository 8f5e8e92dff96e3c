use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::error::ConfigError;

/// Default clock drift allowance added on top of the proportional (1% of
/// timeout) term, per the base spec's `defaultDrift`.
pub const DEFAULT_CLOCK_DRIFT: Duration = Duration::from_millis(3);

/// How a [`QuorumExecutor`] decides when the fan-out is "done".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Await every backend task's completion. Used by acquisitions, which
    /// need every verdict to decide quorum vs. rollback.
    All,
    /// Await until the first task produces a non-null result, then cancel
    /// the rest. Used by the latch's `wait`, where any backend's "open"
    /// notification suffices.
    Any,
}

/// `⌈timeout · 0.01⌉ + default_drift`, the clock-drift allowance subtracted
/// from the TTL when computing operation validity.
#[must_use]
pub fn clock_drift_allowance(timeout: Duration, default_drift: Duration) -> Duration {
    let one_percent_ms = timeout.as_millis().div_ceil(100);
    Duration::from_millis(u64::try_from(one_percent_ms).unwrap_or(u64::MAX)) + default_drift
}

/// Fan out a fallible operation to every backend concurrently and collect a
/// quorum of results under a wall-clock deadline.
///
/// See the base spec's Quorum Executor section for the full contract. This
/// type performs a single attempt; [`RetryingQuorumExecutor`] wraps it with
/// bounded retries.
pub struct QuorumExecutor {
    default_drift: Duration,
}

impl QuorumExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_drift: DEFAULT_CLOCK_DRIFT,
        }
    }

    #[must_use]
    pub fn with_default_drift(default_drift: Duration) -> Self {
        Self { default_drift }
    }

    /// Run `f` against every backend, honoring `strategy`, and return the
    /// non-null results iff they meet quorum and the elapsed time (plus
    /// clock drift) still fits inside `timeout`. Otherwise returns an empty
    /// vector. Never panics or propagates per-backend failures: `f` is
    /// expected to have already swallowed those into `None`.
    pub async fn run<F, Fut, R>(
        &self,
        backends: &[Arc<dyn Backend>],
        timeout: Duration,
        strategy: WaitStrategy,
        f: F,
    ) -> Vec<R>
    where
        F: Fn(usize, Arc<dyn Backend>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<R>> + Send + 'static,
        R: Send + 'static,
    {
        let n = backends.len();
        let quorum = n / 2 + 1;
        let clock_drift = clock_drift_allowance(timeout, self.default_drift);

        let results: Arc<Mutex<Vec<R>>> = Arc::new(Mutex::new(Vec::with_capacity(n)));
        let start = Instant::now();
        let f = Arc::new(f);

        let mut tasks = JoinSet::new();
        for (index, backend) in backends.iter().cloned().enumerate() {
            let results = Arc::clone(&results);
            let f = Arc::clone(&f);
            tasks.spawn(async move {
                if let Some(r) = f(index, backend).await {
                    results.lock().expect("quorum result sink poisoned").push(r);
                }
            });
        }

        match strategy {
            WaitStrategy::All => {
                while tasks.join_next().await.is_some() {}
            }
            WaitStrategy::Any => {
                while tasks.join_next().await.is_some() {
                    if !results.lock().expect("quorum result sink poisoned").is_empty() {
                        break;
                    }
                }
                tasks.abort_all();
            }
        }

        let elapsed = start.elapsed();
        let validity = timeout
            .checked_sub(elapsed)
            .and_then(|remaining| remaining.checked_sub(clock_drift));

        let out = std::mem::take(&mut *results.lock().expect("quorum result sink poisoned"));

        if out.len() >= quorum && validity.is_some() {
            out
        } else {
            Vec::new()
        }
    }
}

impl Default for QuorumExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`QuorumExecutor`] wrapped with bounded retries: any attempt returning
/// an empty result triggers a retry after `retry_delay`; the first
/// non-empty attempt returns immediately.
pub struct RetryingQuorumExecutor {
    executor: QuorumExecutor,
    retry_count: u32,
    retry_delay: Duration,
}

impl RetryingQuorumExecutor {
    pub fn new(retry_count: u32, retry_delay: Duration) -> Result<Self, ConfigError> {
        if retry_count < 1 {
            return Err(ConfigError::NonPositiveRetryCount(retry_count));
        }
        if retry_delay.is_zero() {
            return Err(ConfigError::NonPositiveRetryDelay);
        }
        Ok(Self {
            executor: QuorumExecutor::new(),
            retry_count,
            retry_delay,
        })
    }

    pub async fn run<F, Fut, R>(
        &self,
        backends: &[Arc<dyn Backend>],
        timeout: Duration,
        strategy: WaitStrategy,
        f: F,
    ) -> Vec<R>
    where
        F: Fn(usize, Arc<dyn Backend>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Option<R>> + Send + 'static,
        R: Send + 'static,
    {
        for attempt in 1..=self.retry_count {
            let result = self
                .executor
                .run(backends, timeout, strategy, f.clone())
                .await;
            if !result.is_empty() {
                return result;
            }
            if attempt < self.retry_count {
                tracing::debug!(attempt, retry_count = self.retry_count, "quorum attempt missed, retrying");
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn clock_drift_rounds_up() {
        let drift = clock_drift_allowance(Duration::from_millis(150), Duration::from_millis(3));
        // ceil(150 * 0.01) = 2ms + 3ms default = 5ms
        assert_eq!(drift, Duration::from_millis(5));
    }

    #[test]
    fn clock_drift_exact_percent() {
        let drift = clock_drift_allowance(Duration::from_millis(1000), Duration::from_millis(3));
        assert_eq!(drift, Duration::from_millis(13));
    }
}
