//! Redis-backed [`Backend`](distlock_core::Backend) for distlock.
//!
//! Every atomic operation the core algorithms require — lock set/remove,
//! bounded semaphore membership, latch token accounting, and the "open"
//! pub/sub notification — is implemented as a Lua script invoked through a
//! pooled `deadpool-redis` connection. See [`scripts`] for the script text.
//!
//! # Example
//!
//! ```ignore
//! use distlock_redis::{RedisBackend, RedisConfig};
//!
//! let config = RedisConfig::default();
//! let backend = RedisBackend::new(&config)?;
//! ```

mod backend;
mod config;
mod scripts;

pub use backend::RedisBackend;
pub use config::RedisConfig;
