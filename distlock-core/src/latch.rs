use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::error::ConfigError;
use crate::failsafe::swallow;
use crate::owner::OwnerId;
use crate::quorum::{clock_drift_allowance, RetryingQuorumExecutor, WaitStrategy, DEFAULT_CLOCK_DRIFT};

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a lock/semaphore/latch operation that has no further detail to
/// report beyond "it worked" or "it didn't".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Success,
    Failed,
}

impl LockResult {
    #[must_use]
    pub fn from_bool(ok: bool) -> Self {
        if ok { Self::Success } else { Self::Failed }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A one-shot barrier that opens once `count` distinct participants have
/// called [`count_down`](Self::count_down) against a majority of backends.
///
/// The instance's own contribution to the shared cardinality is tracked
/// locally (`current_count`), decremented only when a `count_down` attempt
/// actually reaches quorum, so a failed attempt can be retried without
/// double-counting (the token written to the backend is `owner ∥ count`,
/// unique per attempt).
pub struct ListeningCountDownLatch {
    name: String,
    backends: Vec<Arc<dyn Backend>>,
    owner: OwnerId,
    minimal_count: i64,
    max_duration: Duration,
    current_count: Mutex<i64>,
    executor: RetryingQuorumExecutor,
}

impl ListeningCountDownLatch {
    pub fn new(name: impl Into<String>, count: u64, backends: Vec<Arc<dyn Backend>>) -> Result<Self, ConfigError> {
        Self::with_retry(name, count, backends, DEFAULT_MAX_DURATION, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry(
        name: impl Into<String>,
        count: u64,
        backends: Vec<Arc<dyn Backend>>,
        max_duration: Duration,
        retry_count: u32,
        retry_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::EmptyBackends);
        }
        if count < 1 {
            return Err(ConfigError::CountBelowOne(count));
        }
        let min_max_duration = clock_drift_allowance(max_duration, DEFAULT_CLOCK_DRIFT) * 2;
        if max_duration < min_max_duration {
            return Err(ConfigError::MaxDurationTooShort {
                min: min_max_duration,
                got: max_duration,
            });
        }
        let executor = RetryingQuorumExecutor::new(retry_count, retry_delay)?;

        let minimal_count = i64::try_from(count).unwrap_or(i64::MAX);
        Ok(Self {
            name: name.into(),
            backends,
            owner: OwnerId::new(),
            minimal_count,
            max_duration,
            current_count: Mutex::new(minimal_count),
            executor,
        })
    }

    /// Credit this instance's contribution toward the latch opening.
    ///
    /// Idempotent once the instance's local count reaches zero. Decrements
    /// `current_count` only after the quorum executor confirms a majority of
    /// backends recorded the token; a quorum miss leaves `current_count`
    /// untouched and rolls the attempt back via best-effort `undo_count`, so
    /// a retried `count_down` cannot be credited twice.
    pub async fn count_down(&self) -> LockResult {
        let mut current_count = self.current_count.lock().await;
        if *current_count <= 0 {
            return LockResult::Success;
        }
        let count = *current_count;

        let owner = self.owner.clone();
        let latch_key = self.name.clone();
        let channel = self.name.clone();
        let minimal_count = self.minimal_count;
        let max_duration = self.max_duration;

        let results: Vec<bool> = self
            .executor
            .run(&self.backends, max_duration, WaitStrategy::All, move |index, backend| {
                let owner = owner.clone();
                let latch_key = latch_key.clone();
                let channel = channel.clone();
                async move {
                    swallow(
                        "count",
                        index,
                        backend.count(&latch_key, &channel, owner.as_str(), count, minimal_count, max_duration),
                    )
                    .await
                    .filter(|ok| *ok)
                }
            })
            .await;

        if results.is_empty() {
            self.rollback(count).await;
            return LockResult::Failed;
        }

        *current_count -= 1;
        LockResult::Success
    }

    async fn rollback(&self, count: i64) {
        let owner = self.owner.clone();
        let latch_key = self.name.clone();
        let futures = self.backends.iter().cloned().enumerate().map(|(index, backend)| {
            let owner = owner.clone();
            let latch_key = latch_key.clone();
            async move {
                let _ = swallow("undo_count", index, backend.undo_count(&latch_key, owner.as_str(), count)).await;
            }
        });
        futures::future::join_all(futures).await;
    }

    /// Block until the latch opens or `timeout` elapses.
    ///
    /// Races a fast-path cardinality check, a pub/sub subscription on every
    /// backend, and a safety-net poll on a `timeout / 10` interval (floored
    /// at [`MIN_POLL_INTERVAL`]) against the deadline; whichever observes the
    /// threshold first decides.
    pub async fn wait(&self, timeout: Duration) -> LockResult {
        if let Some(count) = self.observe_count().await {
            if count >= self.minimal_count {
                return LockResult::Success;
            }
        }

        let deadline = Instant::now() + timeout;
        let poll_interval = (timeout / 10).max(MIN_POLL_INTERVAL);

        let (opened_tx, mut opened_rx) = mpsc::channel::<()>(1);
        let mut subscriptions = JoinSet::new();
        for (index, backend) in self.backends.iter().cloned().enumerate() {
            let opened_tx = opened_tx.clone();
            let channel = self.name.clone();
            subscriptions.spawn(async move {
                let Some(mut stream) = swallow("listen", index, backend.listen(&channel)).await else {
                    return;
                };
                while let Some(message) = stream.next().await {
                    if message == "open" {
                        let _ = opened_tx.send(()).await;
                        return;
                    }
                }
            });
        }
        drop(opened_tx);

        let mut poll_timer = tokio::time::interval(poll_interval);
        poll_timer.tick().await;

        // Once every subscription has dropped its sender, `opened_rx.recv()`
        // resolves immediately with `None` forever; polling that arm after
        // the channel closes would busy-loop until `deadline`, so it is
        // dropped from the select once closed and the poll timer becomes the
        // only remaining safety net.
        let mut channel_open = true;

        let result = loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => break LockResult::Failed,
                received = opened_rx.recv(), if channel_open => {
                    match received {
                        Some(()) => break LockResult::Success,
                        None => channel_open = false,
                    }
                }
                _ = poll_timer.tick() => {
                    if let Some(count) = self.observe_count().await {
                        if count >= self.minimal_count {
                            break LockResult::Success;
                        }
                    }
                }
            }
        };

        subscriptions.abort_all();
        result
    }

    /// `wait` with the latch's configured `max_duration` as the timeout.
    pub async fn wait_default(&self) -> LockResult {
        self.wait(self.max_duration).await
    }

    /// Remaining participants needed before the latch opens, from the
    /// perspective of one backend's observed cardinality. Conservative on
    /// backend failure: reports as if nobody had counted down yet.
    pub async fn get_count(&self) -> i64 {
        match self.observe_count().await {
            Some(observed) => (self.minimal_count - observed).max(0),
            None => self.minimal_count,
        }
    }

    async fn observe_count(&self) -> Option<i64> {
        let backend = self.backends.first()?;
        swallow("check_count", 0, backend.check_count(&self.name)).await
    }

    /// Blocking variant of [`wait`](Self::wait) for callers outside a Tokio
    /// runtime.
    ///
    /// Spawns a dedicated OS thread carrying its own Tokio runtime, runs
    /// `wait(timeout)` on it, and the calling thread rejoins with a hard
    /// deadline via [`std::sync::mpsc::Receiver::recv_timeout`] — the
    /// "dedicated thread with hard interrupt at timeout" fallback the base
    /// spec calls out for runtimes that cannot forcefully cancel a blocking
    /// subscription. A caller already inside an async context should use
    /// [`wait`](Self::wait) directly; this exists for the non-async
    /// embedding case (a sync worker thread, a plain `main` with no
    /// executor of its own).
    #[cfg(feature = "blocking")]
    pub fn wait_blocking(&self, timeout: Duration) -> LockResult {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .build()
                    .expect("failed to start latch wait runtime");
                let result = runtime.block_on(self.wait(timeout));
                let _ = tx.send(result);
            });
            rx.recv_timeout(timeout + Duration::from_millis(50))
                .unwrap_or(LockResult::Failed)
        })
    }

    /// `wait_blocking` with the latch's configured `max_duration` as the
    /// timeout.
    #[cfg(feature = "blocking")]
    pub fn wait_blocking_default(&self) -> LockResult {
        self.wait_blocking(self.max_duration)
    }
}
