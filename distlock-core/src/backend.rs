use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::BackendError;

/// A cancel-on-drop stream of pub/sub messages.
///
/// Dropping the stream unsubscribes from the underlying channel (or, for
/// backends where unsubscription can itself fail, best-effort attempts to and
/// logs a warning on failure rather than propagating an error — per the base
/// spec, "subscription errors on unsubscribe are logged informationally and
/// swallowed").
pub struct BackendStream(Pin<Box<dyn Stream<Item = String> + Send>>);

impl BackendStream {
    pub fn new(inner: impl Stream<Item = String> + Send + 'static) -> Self {
        Self(Box::pin(inner))
    }
}

impl Stream for BackendStream {
    type Item = String;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.0.as_mut().poll_next(cx)
    }
}

/// The capability set every concrete key-value backend must implement.
///
/// Every method here absorbs its own connection/protocol failures into a
/// [`BackendError`]; it never panics. The quorum executor and the failsafe
/// wrapper are responsible for converting those into the "this backend did
/// not participate" outcome the higher-level algorithms expect — this trait
/// itself makes no retry or quorum decisions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `SET key owner NX PX ttl`. Returns `true` iff the key was newly set.
    async fn set_lock(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Delete `key` iff its current value equals `owner`. Returns `true` iff
    /// deleted.
    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError>;

    /// Add `owner` to the bounded set at `key` iff its cardinality is below
    /// `max_leases`, then refresh the key's TTL. Returns `true` iff the lease
    /// was granted.
    async fn set_semaphore_lock(
        &self,
        key: &str,
        owner: &str,
        max_leases: u32,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Remove `owner` from the set at `key` and delete its companion marker.
    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError>;

    /// Prune entries from the set at `key` whose companion marker (addressed
    /// by `cleanup_key`) has expired, releasing slots held by crashed owners.
    async fn clean_up_expired_semaphore_locks(
        &self,
        key: &str,
        cleanup_key: &str,
    ) -> Result<(), BackendError>;

    /// Add the unique token `(client_id, count)` to the set at `latch_key`,
    /// refresh its TTL monotonically (never shrinking it), and publish
    /// `"open"` on `channel` once the set's cardinality reaches
    /// `initial_count`. Returns `true` on success.
    #[allow(clippy::too_many_arguments)]
    async fn count(
        &self,
        latch_key: &str,
        channel: &str,
        client_id: &str,
        count: i64,
        initial_count: i64,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Remove the token `(client_id, count)` from the set at `latch_key`.
    /// Returns the set's cardinality after removal.
    async fn undo_count(
        &self,
        latch_key: &str,
        client_id: &str,
        count: i64,
    ) -> Result<i64, BackendError>;

    /// Return the cardinality of the set at `latch_key`.
    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError>;

    /// Subscribe to `channel`. The returned stream yields each message
    /// received until it is dropped or the backend connection is lost.
    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError>;
}
