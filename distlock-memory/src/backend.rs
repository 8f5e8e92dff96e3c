use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use distlock_core::{Backend, BackendError, BackendStream};

#[derive(Debug, Clone)]
struct LockEntry {
    owner: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
struct SemaphoreMember {
    expires_at: Instant,
}

impl SemaphoreMember {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct LatchState {
    tokens: HashSet<String>,
    expires_at: Option<Instant>,
}

impl LatchState {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process [`Backend`] backed by [`DashMap`]s, one per concern (locks,
/// semaphore membership, latch tokens) plus a [`broadcast`] channel per
/// pub/sub channel name.
///
/// Expiry is lazy, evaluated against [`Instant`] deadlines at the next
/// access to the same key rather than via a background sweep — the same
/// convention this backend family uses for its lock primitives.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    locks: DashMap<String, LockEntry>,
    semaphore_members: DashMap<String, DashMap<String, SemaphoreMember>>,
    latches: DashMap<String, LatchState>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn set_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.locks.remove_if(key, |_, entry| entry.is_expired());
        match self.locks.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    owner: owner.to_owned(),
                    expires_at: Instant::now() + ttl,
                });
                Ok(true)
            }
        }
    }

    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError> {
        Ok(self.locks.remove_if(key, |_, entry| entry.owner == owner).is_some())
    }

    async fn set_semaphore_lock(
        &self,
        key: &str,
        owner: &str,
        max_leases: u32,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let members = self.semaphore_members.entry(key.to_owned()).or_default();
        members.retain(|_, member| !member.is_expired());

        let occupied = u32::try_from(members.len()).unwrap_or(u32::MAX);
        if occupied >= max_leases && !members.contains_key(owner) {
            return Ok(false);
        }

        members.insert(owner.to_owned(), SemaphoreMember { expires_at: Instant::now() + ttl });
        Ok(true)
    }

    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError> {
        if let Some(members) = self.semaphore_members.get(key) {
            members.remove(owner);
        }
        Ok(())
    }

    async fn clean_up_expired_semaphore_locks(
        &self,
        key: &str,
        _cleanup_key: &str,
    ) -> Result<(), BackendError> {
        if let Some(members) = self.semaphore_members.get(key) {
            members.retain(|_, member| !member.is_expired());
        }
        Ok(())
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
        let token = format!("{client_id}:{count}");
        let new_deadline = Instant::now() + ttl;

        let cardinality = {
            let mut latch = self.latches.entry(latch_key.to_owned()).or_default();
            latch.tokens.insert(token);
            latch.expires_at = Some(match latch.expires_at {
                Some(existing) if existing > new_deadline => existing,
                _ => new_deadline,
            });
            latch.tokens.len()
        };

        if i64::try_from(cardinality).unwrap_or(i64::MAX) >= initial_count {
            let _ = self.channel(channel).send("open".to_owned());
        }
        Ok(true)
    }

    async fn undo_count(&self, latch_key: &str, client_id: &str, count: i64) -> Result<i64, BackendError> {
        let token = format!("{client_id}:{count}");
        let cardinality = self
            .latches
            .get_mut(latch_key)
            .map(|mut latch| {
                latch.tokens.remove(&token);
                latch.tokens.len()
            })
            .unwrap_or(0);
        Ok(i64::try_from(cardinality).unwrap_or(i64::MAX))
    }

    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError> {
        let cardinality = self
            .latches
            .get(latch_key)
            .filter(|latch| !latch.is_expired())
            .map_or(0, |latch| latch.tokens.len());
        Ok(i64::try_from(cardinality).unwrap_or(i64::MAX))
    }

    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError> {
        let receiver = self.channel(channel).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(BackendStream::new(stream))
    }
}
