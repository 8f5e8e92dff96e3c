//! End-to-end tests for the quorum executor and the composite algorithms
//! (`RedLock`, `Semaphore`, `ListeningCountDownLatch`) built on it, driven
//! against real `MemoryBackend` instances instead of constructor
//! preconditions only.
//!
//! Covers the quorum matrix (majority rule across backend-OK subsets) and
//! the end-to-end scenarios from the design notes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use distlock_core::{Backend, BackendError, BackendStream, LockResult, ListeningCountDownLatch, RedLock, Semaphore};
use distlock_memory::MemoryBackend;

/// Wraps a [`MemoryBackend`] and counts calls to `set_lock`/`remove_lock`,
/// for asserting fan-out and rollback behavior without instrumenting the
/// library itself.
#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    set_lock_calls: AtomicUsize,
    remove_lock_calls: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self::default()
    }

    fn set_lock_calls(&self) -> usize {
        self.set_lock_calls.load(Ordering::SeqCst)
    }

    fn remove_lock_calls(&self) -> usize {
        self.remove_lock_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn set_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.set_lock_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.set_lock(key, owner, ttl).await
    }

    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError> {
        self.remove_lock_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_lock(key, owner).await
    }

    async fn set_semaphore_lock(&self, key: &str, owner: &str, max_leases: u32, ttl: Duration) -> Result<bool, BackendError> {
        self.inner.set_semaphore_lock(key, owner, max_leases, ttl).await
    }

    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError> {
        self.inner.remove_semaphore_lock(key, owner).await
    }

    async fn clean_up_expired_semaphore_locks(&self, key: &str, cleanup_key: &str) -> Result<(), BackendError> {
        self.inner.clean_up_expired_semaphore_locks(key, cleanup_key).await
    }

    async fn count(
        &self,
        latch_key: &str,
        channel: &str,
        client_id: &str,
        count: i64,
        initial_count: i64,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.inner.count(latch_key, channel, client_id, count, initial_count, ttl).await
    }

    async fn undo_count(&self, latch_key: &str, client_id: &str, count: i64) -> Result<i64, BackendError> {
        self.inner.undo_count(latch_key, client_id, count).await
    }

    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError> {
        self.inner.check_count(latch_key).await
    }

    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError> {
        self.inner.listen(channel).await
    }
}

/// A backend whose `set_lock` always reports "not granted" (`Ok(false)`),
/// used to model a minority of backends that lose the race rather than
/// fail outright.
#[derive(Default)]
struct AlwaysDeniesLock {
    inner: MemoryBackend,
    set_lock_calls: AtomicUsize,
    remove_lock_calls: AtomicUsize,
}

#[async_trait]
impl Backend for AlwaysDeniesLock {
    async fn set_lock(&self, _key: &str, _owner: &str, _ttl: Duration) -> Result<bool, BackendError> {
        self.set_lock_calls.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError> {
        self.remove_lock_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_lock(key, owner).await
    }

    async fn set_semaphore_lock(&self, key: &str, owner: &str, max_leases: u32, ttl: Duration) -> Result<bool, BackendError> {
        self.inner.set_semaphore_lock(key, owner, max_leases, ttl).await
    }

    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError> {
        self.inner.remove_semaphore_lock(key, owner).await
    }

    async fn clean_up_expired_semaphore_locks(&self, key: &str, cleanup_key: &str) -> Result<(), BackendError> {
        self.inner.clean_up_expired_semaphore_locks(key, cleanup_key).await
    }

    async fn count(
        &self,
        latch_key: &str,
        channel: &str,
        client_id: &str,
        count: i64,
        initial_count: i64,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.inner.count(latch_key, channel, client_id, count, initial_count, ttl).await
    }

    async fn undo_count(&self, latch_key: &str, client_id: &str, count: i64) -> Result<i64, BackendError> {
        self.inner.undo_count(latch_key, client_id, count).await
    }

    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError> {
        self.inner.check_count(latch_key).await
    }

    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError> {
        self.inner.listen(channel).await
    }
}

/// A backend whose `set_lock` sleeps past its caller's timing budget before
/// delegating, used to exercise the clock-drift validity miss.
struct SlowLock {
    inner: MemoryBackend,
    delay: Duration,
}

impl SlowLock {
    fn new(delay: Duration) -> Self {
        Self { inner: MemoryBackend::new(), delay }
    }
}

#[async_trait]
impl Backend for SlowLock {
    async fn set_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_lock(key, owner, ttl).await
    }

    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError> {
        self.inner.remove_lock(key, owner).await
    }

    async fn set_semaphore_lock(&self, key: &str, owner: &str, max_leases: u32, ttl: Duration) -> Result<bool, BackendError> {
        self.inner.set_semaphore_lock(key, owner, max_leases, ttl).await
    }

    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError> {
        self.inner.remove_semaphore_lock(key, owner).await
    }

    async fn clean_up_expired_semaphore_locks(&self, key: &str, cleanup_key: &str) -> Result<(), BackendError> {
        self.inner.clean_up_expired_semaphore_locks(key, cleanup_key).await
    }

    async fn count(
        &self,
        latch_key: &str,
        channel: &str,
        client_id: &str,
        count: i64,
        initial_count: i64,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.inner.count(latch_key, channel, client_id, count, initial_count, ttl).await
    }

    async fn undo_count(&self, latch_key: &str, client_id: &str, count: i64) -> Result<i64, BackendError> {
        self.inner.undo_count(latch_key, client_id, count).await
    }

    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError> {
        self.inner.check_count(latch_key).await
    }

    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError> {
        self.inner.listen(channel).await
    }
}

/// A backend whose `count` fails outright (`BackendError`) the first
/// `fail_times` calls, then delegates — used to drive the latch's
/// retry path and assert a retried `count_down` does not double-count.
struct FlakyCount {
    inner: MemoryBackend,
    fail_times: AtomicUsize,
}

impl FlakyCount {
    fn new(fail_times: usize) -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_times: AtomicUsize::new(fail_times),
        }
    }
}

#[async_trait]
impl Backend for FlakyCount {
    async fn set_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.inner.set_lock(key, owner, ttl).await
    }

    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError> {
        self.inner.remove_lock(key, owner).await
    }

    async fn set_semaphore_lock(&self, key: &str, owner: &str, max_leases: u32, ttl: Duration) -> Result<bool, BackendError> {
        self.inner.set_semaphore_lock(key, owner, max_leases, ttl).await
    }

    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError> {
        self.inner.remove_semaphore_lock(key, owner).await
    }

    async fn clean_up_expired_semaphore_locks(&self, key: &str, cleanup_key: &str) -> Result<(), BackendError> {
        self.inner.clean_up_expired_semaphore_locks(key, cleanup_key).await
    }

    async fn count(
        &self,
        latch_key: &str,
        channel: &str,
        client_id: &str,
        count: i64,
        initial_count: i64,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let mut remaining = self.fail_times.load(Ordering::SeqCst);
        loop {
            if remaining == 0 {
                break;
            }
            match self.fail_times.compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Err(BackendError::Backend("injected count failure".into())),
                Err(actual) => remaining = actual,
            }
        }
        self.inner.count(latch_key, channel, client_id, count, initial_count, ttl).await
    }

    async fn undo_count(&self, latch_key: &str, client_id: &str, count: i64) -> Result<i64, BackendError> {
        self.inner.undo_count(latch_key, client_id, count).await
    }

    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError> {
        self.inner.check_count(latch_key).await
    }

    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError> {
        self.inner.listen(channel).await
    }
}

fn memory_backends(n: usize) -> Vec<Arc<dyn Backend>> {
    (0..n).map(|_| Arc::new(MemoryBackend::new()) as Arc<dyn Backend>).collect()
}

// -- RedLock end-to-end scenarios --

mod red_lock {
    use super::*;

    /// Scenario 1: every backend grants the lease. `lock` succeeds, and
    /// each backend sees exactly one `set_lock` and zero `remove_lock`
    /// calls (no rollback on a clean majority).
    #[tokio::test]
    async fn all_backends_ok_grants_lock_with_no_rollback() {
        let backends: Vec<Arc<CountingBackend>> = (0..3).map(|_| Arc::new(CountingBackend::new())).collect();
        let as_dyn: Vec<Arc<dyn Backend>> = backends.iter().map(|b| Arc::clone(b) as Arc<dyn Backend>).collect();

        let lock = RedLock::new(as_dyn).unwrap();
        let granted = lock.lock("resource", Duration::from_secs(10)).await.unwrap();
        assert!(granted);

        for backend in &backends {
            assert_eq!(backend.set_lock_calls(), 1);
            assert_eq!(backend.remove_lock_calls(), 0);
        }
    }

    /// Scenario 2: only a minority (1 of 3) of backends grant the lease.
    /// `lock` fails, retries `retry_count` times, and rolls back on every
    /// attempt — 3 `set_lock` and 3 `remove_lock` calls per backend with
    /// `retry_count = 3`.
    #[tokio::test]
    async fn minority_quorum_fails_and_rolls_back_every_attempt() {
        let ok_backend = Arc::new(CountingBackend::new());
        let deny_a = Arc::new(AlwaysDeniesLock::default());
        let deny_b = Arc::new(AlwaysDeniesLock::default());

        let backends: Vec<Arc<dyn Backend>> =
            vec![Arc::clone(&ok_backend) as Arc<dyn Backend>, Arc::clone(&deny_a) as Arc<dyn Backend>, Arc::clone(&deny_b) as Arc<dyn Backend>];

        let lock = RedLock::with_retry(backends, 3, Duration::from_millis(20)).unwrap();
        let granted = lock.lock("resource", Duration::from_secs(10)).await.unwrap();
        assert!(!granted, "a minority of grants must not satisfy quorum");

        assert_eq!(ok_backend.set_lock_calls(), 3);
        assert_eq!(ok_backend.remove_lock_calls(), 3, "every failed attempt should roll back the tentative grant");
        assert_eq!(deny_a.set_lock_calls.load(Ordering::SeqCst), 3);
        assert_eq!(deny_b.set_lock_calls.load(Ordering::SeqCst), 3);
    }

    /// A backend whose response blows past the timing budget (ttl minus
    /// clock drift) counts as a validity miss even if it eventually says
    /// "OK" — the quorum executor must not grant the lock on late results.
    #[tokio::test]
    async fn slow_backend_response_is_a_validity_miss() {
        let fast_a = Arc::new(MemoryBackend::new()) as Arc<dyn Backend>;
        let fast_b = Arc::new(MemoryBackend::new()) as Arc<dyn Backend>;
        let slow = Arc::new(SlowLock::new(Duration::from_millis(200))) as Arc<dyn Backend>;

        let lock = RedLock::with_retry(vec![fast_a, fast_b, slow], 1, Duration::from_millis(20)).unwrap();
        let granted = lock.lock("resource", Duration::from_millis(50)).await.unwrap();
        assert!(!granted, "a ttl too small for the slow backend's latency should miss quorum on timing alone");
    }

    #[tokio::test]
    async fn unlock_releases_across_all_backends() {
        let backends = memory_backends(3);
        let lock = RedLock::new(backends.clone()).unwrap();

        assert!(lock.lock("resource", Duration::from_secs(10)).await.unwrap());
        lock.unlock("resource").await;

        // Released: a fresh lock instance can now acquire it.
        let other = RedLock::new(backends).unwrap();
        assert!(other.lock("resource", Duration::from_secs(10)).await.unwrap());
    }
}

// -- Semaphore end-to-end scenarios --

mod semaphore {
    use super::*;

    /// Scenario 6: `max_leases = 2`, three concurrent holders contend for
    /// the same key — exactly two should succeed.
    #[tokio::test]
    async fn only_max_leases_holders_succeed_under_contention() {
        let backends = memory_backends(3);

        let sem_a = Semaphore::new(backends.clone(), 2).unwrap();
        let sem_b = Semaphore::new(backends.clone(), 2).unwrap();
        let sem_c = Semaphore::new(backends, 2).unwrap();

        let (a, b, c) = tokio::join!(
            sem_a.lock("pool", Duration::from_secs(10)),
            sem_b.lock("pool", Duration::from_secs(10)),
            sem_c.lock("pool", Duration::from_secs(10)),
        );

        let granted = [a.unwrap(), b.unwrap(), c.unwrap()].into_iter().filter(|ok| *ok).count();
        assert_eq!(granted, 2, "exactly max_leases holders should be granted a slot");
    }

    #[tokio::test]
    async fn releasing_a_slot_admits_a_waiting_holder() {
        let backends = memory_backends(3);
        let holder_a = Semaphore::new(backends.clone(), 1).unwrap();
        let holder_b = Semaphore::new(backends, 1).unwrap();

        assert!(holder_a.lock("pool", Duration::from_secs(10)).await.unwrap());
        assert!(!holder_b.lock("pool", Duration::from_secs(10)).await.unwrap());

        holder_a.unlock("pool").await;
        assert!(holder_b.lock("pool", Duration::from_secs(10)).await.unwrap());
    }
}

// -- ListeningCountDownLatch end-to-end scenarios --

mod latch {
    use super::*;

    /// Scenario 3: three participants count down, a fourth instance
    /// `wait`s and observes success once quorum across backends is met.
    #[tokio::test]
    async fn latch_opens_once_count_reached() {
        let backends = memory_backends(3);

        let waiter = ListeningCountDownLatch::new("barrier", 3, backends.clone()).unwrap();

        for _ in 0..3 {
            let participant = ListeningCountDownLatch::new("barrier", 3, backends.clone()).unwrap();
            assert_eq!(participant.count_down().await, LockResult::Success);
        }

        assert_eq!(waiter.wait(Duration::from_secs(1)).await, LockResult::Success);
    }

    /// Scenario 4: only 2 of 3 required count-downs happen; `wait` times
    /// out and reports `Failed`.
    #[tokio::test]
    async fn latch_times_out_when_short_of_count() {
        let backends = memory_backends(3);
        let waiter = ListeningCountDownLatch::new("barrier-short", 3, backends.clone()).unwrap();

        for _ in 0..2 {
            let participant = ListeningCountDownLatch::new("barrier-short", 3, backends.clone()).unwrap();
            assert_eq!(participant.count_down().await, LockResult::Success);
        }

        assert_eq!(waiter.wait(Duration::from_millis(200)).await, LockResult::Failed);
    }

    /// Scenario 5: two latches with different names do not contaminate
    /// each other's cardinality.
    #[tokio::test]
    async fn different_latch_names_do_not_cross_contaminate() {
        let backends = memory_backends(3);

        let waiter_a = ListeningCountDownLatch::new("latch-a", 1, backends.clone()).unwrap();
        let waiter_b = ListeningCountDownLatch::new("latch-b", 1, backends.clone()).unwrap();

        let participant_a = ListeningCountDownLatch::new("latch-a", 1, backends.clone()).unwrap();
        assert_eq!(participant_a.count_down().await, LockResult::Success);

        assert_eq!(waiter_a.wait(Duration::from_secs(1)).await, LockResult::Success);
        assert_eq!(waiter_b.wait(Duration::from_millis(200)).await, LockResult::Failed, "latch-b never had a count_down");
    }

    /// `wait` returns immediately (without ever subscribing) when the
    /// fast-path cardinality check already meets the threshold.
    #[tokio::test]
    async fn wait_fast_path_short_circuits_when_already_satisfied() {
        let backends = memory_backends(3);
        let participant = ListeningCountDownLatch::new("already-open", 1, backends.clone()).unwrap();
        assert_eq!(participant.count_down().await, LockResult::Success);

        let waiter = ListeningCountDownLatch::new("already-open", 1, backends).unwrap();
        assert_eq!(waiter.wait(Duration::from_millis(50)).await, LockResult::Success);
    }

    /// A `count_down` attempt that only reaches a minority of backends
    /// (quorum miss) rolls back via `undo_count` and leaves the instance's
    /// local count untouched, so retrying it is safe. A flaky backend that
    /// fails once then succeeds must not let the cardinality double-count
    /// across the failed-then-retried attempts.
    #[tokio::test]
    async fn retried_count_down_does_not_double_count() {
        let flaky = Arc::new(FlakyCount::new(1));
        let plain_a = Arc::new(MemoryBackend::new());
        let plain_b = Arc::new(MemoryBackend::new());

        let backends: Vec<Arc<dyn Backend>> =
            vec![Arc::clone(&flaky) as Arc<dyn Backend>, Arc::clone(&plain_a) as Arc<dyn Backend>, Arc::clone(&plain_b) as Arc<dyn Backend>];

        // retry_count = 2 so the quorum executor's own retry absorbs the
        // first attempt's failure on `flaky` before `count_down` returns.
        let participant = ListeningCountDownLatch::with_retry(
            "no-double-count",
            1,
            backends.clone(),
            Duration::from_secs(5),
            2,
            Duration::from_millis(20),
        )
        .unwrap();

        assert_eq!(participant.count_down().await, LockResult::Success);

        let cardinality = plain_a.check_count("no-double-count").await.unwrap();
        assert_eq!(cardinality, 1, "a retried count_down must be credited exactly once, not once per attempt");
    }
}

// -- QuorumExecutor direct tests --

mod quorum_executor {
    use distlock_core::{QuorumExecutor, WaitStrategy};

    use super::*;

    /// `WaitStrategy::Any` returns as soon as the first backend produces a
    /// result and aborts the rest — a still-sleeping task must never be
    /// allowed to complete afterward.
    #[tokio::test]
    async fn wait_any_cancels_outstanding_tasks_after_first_result() {
        let completed = Arc::new(AtomicUsize::new(0));

        let backends = memory_backends(2);
        let executor = QuorumExecutor::new();

        let completed_clone = Arc::clone(&completed);
        let results = executor
            .run(&backends, Duration::from_secs(5), WaitStrategy::Any, move |index, _backend| {
                let completed = Arc::clone(&completed_clone);
                async move {
                    if index == 0 {
                        Some(true)
                    } else {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        completed.fetch_add(1, Ordering::SeqCst);
                        Some(true)
                    }
                }
            })
            .await;

        assert_eq!(results, vec![true]);

        // Give the aborted task a chance to run if it were (incorrectly)
        // still alive; it must not have incremented the counter.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0, "the slower task should have been aborted, not merely outraced");
    }

    /// Quorum matrix: with 5 backends, a bare majority (3) of `Some`
    /// results meets quorum; one fewer (2) does not.
    #[tokio::test]
    async fn quorum_matrix_majority_across_five_backends() {
        let backends = memory_backends(5);
        let executor = QuorumExecutor::new();

        let majority_ok = Arc::new(AtomicUsize::new(0));
        let ok_count = Arc::clone(&majority_ok);
        let results = executor
            .run(&backends, Duration::from_secs(5), WaitStrategy::All, move |index, _backend| {
                let ok_count = Arc::clone(&ok_count);
                async move {
                    if index < 3 {
                        ok_count.fetch_add(1, Ordering::SeqCst);
                        Some(())
                    } else {
                        None
                    }
                }
            })
            .await;
        assert_eq!(results.len(), 3, "3 of 5 is a majority and should meet quorum");

        let results = executor
            .run(&backends, Duration::from_secs(5), WaitStrategy::All, move |index, _backend| async move {
                if index < 2 { Some(()) } else { None }
            })
            .await;
        assert!(results.is_empty(), "2 of 5 falls short of a majority and must not meet quorum");
    }
}
