use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::backend::{Backend, BackendStream};
use crate::error::BackendError;

/// Run the full backend conformance test suite against a fresh instance.
///
/// Call this from your backend's own test module, as done in
/// `distlock-memory` and (behind the `integration` feature) in
/// `distlock-redis`.
///
/// # Errors
///
/// Returns an error if any conformance assertion fails.
pub async fn run_backend_conformance_tests(backend: &dyn Backend) -> Result<(), BackendError> {
    test_lock_roundtrip(backend).await?;
    test_lock_contention(backend).await?;
    test_remove_lock_wrong_owner_is_noop(backend).await?;
    test_semaphore_bound(backend).await?;
    test_latch_count_and_check(backend).await?;
    test_latch_undo_count(backend).await?;
    test_listen_receives_published_open(backend).await?;
    Ok(())
}

async fn test_lock_roundtrip(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:lock:roundtrip";
    let owner = "owner-a";
    let granted = backend.set_lock(key, owner, Duration::from_secs(10)).await?;
    assert!(granted, "set_lock on a free key should succeed");

    let released = backend.remove_lock(key, owner).await?;
    assert!(released, "remove_lock by the owner should succeed");
    Ok(())
}

async fn test_lock_contention(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:lock:contention";
    let first = backend.set_lock(key, "owner-a", Duration::from_secs(10)).await?;
    assert!(first);

    let second = backend.set_lock(key, "owner-b", Duration::from_secs(10)).await?;
    assert!(!second, "set_lock while held by another owner should fail");

    backend.remove_lock(key, "owner-a").await?;
    Ok(())
}

async fn test_remove_lock_wrong_owner_is_noop(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:lock:wrong-owner";
    backend.set_lock(key, "owner-a", Duration::from_secs(10)).await?;

    let removed = backend.remove_lock(key, "owner-b").await?;
    assert!(!removed, "remove_lock by a non-owner must not delete the key");

    let still_locked = !backend.set_lock(key, "owner-c", Duration::from_secs(10)).await?;
    assert!(still_locked, "original owner's lock should still be held");

    backend.remove_lock(key, "owner-a").await?;
    Ok(())
}

async fn test_semaphore_bound(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:semaphore:bound";
    let cleanup_key = "conformance:semaphore:bound:cleanup";
    let ttl = Duration::from_secs(10);

    let a = backend.set_semaphore_lock(key, "sem-a", 2, ttl).await?;
    let b = backend.set_semaphore_lock(key, "sem-b", 2, ttl).await?;
    let c = backend.set_semaphore_lock(key, "sem-c", 2, ttl).await?;
    assert!(a && b, "both slots should be grantable");
    assert!(!c, "a third holder must not exceed max_leases");

    backend.remove_semaphore_lock(key, "sem-a").await?;
    let d = backend.set_semaphore_lock(key, "sem-d", 2, ttl).await?;
    assert!(d, "releasing a slot should free it for another holder");

    backend.remove_semaphore_lock(key, "sem-b").await?;
    backend.remove_semaphore_lock(key, "sem-d").await?;
    backend
        .clean_up_expired_semaphore_locks(key, cleanup_key)
        .await?;
    Ok(())
}

async fn test_latch_count_and_check(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:latch:count";
    let channel = "conformance:latch:count:channel";
    let ttl = Duration::from_secs(60);

    assert_eq!(backend.check_count(key).await?, 0);

    backend.count(key, channel, "client-1", 1, 3, ttl).await?;
    backend.count(key, channel, "client-2", 1, 3, ttl).await?;
    assert_eq!(backend.check_count(key).await?, 2);

    backend.count(key, channel, "client-3", 1, 3, ttl).await?;
    assert_eq!(backend.check_count(key).await?, 3, "cardinality should reach initial_count");
    Ok(())
}

async fn test_latch_undo_count(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:latch:undo";
    let channel = "conformance:latch:undo:channel";
    let ttl = Duration::from_secs(60);

    backend.count(key, channel, "client-1", 1, 5, ttl).await?;
    backend.count(key, channel, "client-2", 1, 5, ttl).await?;

    let remaining = backend.undo_count(key, "client-1", 1).await?;
    assert_eq!(remaining, 1, "undo_count should remove exactly one token");
    Ok(())
}

async fn test_listen_receives_published_open(backend: &dyn Backend) -> Result<(), BackendError> {
    let key = "conformance:latch:listen";
    let channel = "conformance:latch:listen:channel";
    let ttl = Duration::from_secs(60);

    let mut stream = backend.listen(channel).await?;
    backend.count(key, channel, "client-1", 1, 1, ttl).await?;

    let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .ok()
        .flatten();
    assert_eq!(message.as_deref(), Some("open"), "reaching initial_count should publish \"open\"");
    Ok(())
}

/// A [`Backend`] every method of which panics if called.
///
/// Used by precondition tests that never exercise the backend, only the
/// constructor validation in front of it.
pub struct UnimplementedBackend;

#[async_trait]
impl Backend for UnimplementedBackend {
    async fn set_lock(&self, _key: &str, _owner: &str, _ttl: Duration) -> Result<bool, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn remove_lock(&self, _key: &str, _owner: &str) -> Result<bool, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn set_semaphore_lock(
        &self,
        _key: &str,
        _owner: &str,
        _max_leases: u32,
        _ttl: Duration,
    ) -> Result<bool, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn remove_semaphore_lock(&self, _key: &str, _owner: &str) -> Result<(), BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn clean_up_expired_semaphore_locks(
        &self,
        _key: &str,
        _cleanup_key: &str,
    ) -> Result<(), BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn count(
        &self,
        _latch_key: &str,
        _channel: &str,
        _client_id: &str,
        _count: i64,
        _initial_count: i64,
        _ttl: Duration,
    ) -> Result<bool, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn undo_count(&self, _latch_key: &str, _client_id: &str, _count: i64) -> Result<i64, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn check_count(&self, _latch_key: &str) -> Result<i64, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }

    async fn listen(&self, _channel: &str) -> Result<BackendStream, BackendError> {
        unreachable!("UnimplementedBackend should never be called")
    }
}

#[must_use]
pub fn noop_backend() -> std::sync::Arc<dyn Backend> {
    std::sync::Arc::new(UnimplementedBackend)
}
