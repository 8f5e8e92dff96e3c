use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;
use redis::{AsyncCommands, Script};

use distlock_core::{Backend, BackendError, BackendStream};

use crate::config::RedisConfig;
use crate::scripts;

fn to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// `Backend` implementation over a single Redis-compatible endpoint.
///
/// Every mutating operation is a Lua script invoked through a pooled
/// `deadpool-redis` connection, guaranteeing the atomicity the base
/// algorithms assume. `listen` opens its own dedicated client connection,
/// since a pub/sub subscription occupies a connection for the stream's
/// lifetime and cannot be returned to the pool.
pub struct RedisBackend {
    pool: Pool,
    client: redis::Client,
    prefix: String,
}

impl RedisBackend {
    /// Create a new `RedisBackend` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Connection`] if the pool or client cannot be
    /// constructed.
    pub fn new(config: &RedisConfig) -> Result<Self, BackendError> {
        let url = config.effective_url();

        let client = redis::Client::open(url.as_str()).map_err(|e| BackendError::Connection(e.to_string()))?;

        let pool = Config::from_url(&url)
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| BackendError::Connection(e.to_string()))?
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            client,
            prefix: config.prefix.clone(),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// The per-owner marker key a held semaphore slot is paired with, used
    /// by `clean_up_expired_semaphore_locks` to detect crashed holders.
    fn marker_prefix(&self, key: &str) -> String {
        format!("{}:markers", self.prefixed(key))
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, BackendError> {
        self.pool.get().await.map_err(|e| BackendError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn set_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, BackendError> {
        let mut conn = self.conn().await?;
        let result: i64 = Script::new(scripts::SET_LOCK)
            .key(self.prefixed(key))
            .arg(owner)
            .arg(to_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn remove_lock(&self, key: &str, owner: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn().await?;
        let result: i64 = Script::new(scripts::REMOVE_LOCK)
            .key(self.prefixed(key))
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn set_semaphore_lock(
        &self,
        key: &str,
        owner: &str,
        max_leases: u32,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let marker_key = format!("{}:{owner}", self.marker_prefix(key));
        let mut conn = self.conn().await?;
        let result: i64 = Script::new(scripts::SET_SEMAPHORE_LOCK)
            .key(self.prefixed(key))
            .key(marker_key)
            .arg(owner)
            .arg(max_leases)
            .arg(to_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn remove_semaphore_lock(&self, key: &str, owner: &str) -> Result<(), BackendError> {
        let marker_key = format!("{}:{owner}", self.marker_prefix(key));
        let mut conn = self.conn().await?;
        let _: i64 = Script::new(scripts::REMOVE_SEMAPHORE_LOCK)
            .key(self.prefixed(key))
            .key(marker_key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clean_up_expired_semaphore_locks(
        &self,
        key: &str,
        _cleanup_key: &str,
    ) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        let _: i64 = Script::new(scripts::CLEAN_UP_EXPIRED_SEMAPHORE_LOCKS)
            .key(self.prefixed(key))
            .arg(self.marker_prefix(key))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
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
        let mut conn = self.conn().await?;
        let _: i64 = Script::new(scripts::COUNT)
            .key(self.prefixed(latch_key))
            .arg(token)
            .arg(to_millis(ttl))
            .arg(initial_count)
            .arg(self.prefixed(channel))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(true)
    }

    async fn undo_count(&self, latch_key: &str, client_id: &str, count: i64) -> Result<i64, BackendError> {
        let token = format!("{client_id}:{count}");
        let mut conn = self.conn().await?;
        let remaining: i64 = Script::new(scripts::UNDO_COUNT)
            .key(self.prefixed(latch_key))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(remaining)
    }

    async fn check_count(&self, latch_key: &str) -> Result<i64, BackendError> {
        let mut conn = self.conn().await?;
        let cardinality: i64 = conn
            .scard(self.prefixed(latch_key))
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;
        Ok(cardinality)
    }

    async fn listen(&self, channel: &str) -> Result<BackendStream, BackendError> {
        let channel = self.prefixed(channel);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| BackendError::Backend(e.to_string()))?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(BackendStream::new(stream))
    }
}
