pub mod backend;
pub mod error;
pub mod failsafe;
pub mod latch;
pub mod lock;
pub mod owner;
pub mod quorum;
pub mod semaphore;
pub mod testing;

pub use backend::{Backend, BackendStream};
pub use error::{BackendError, ConfigError};
pub use latch::{LockResult, ListeningCountDownLatch};
pub use lock::{RedLock, SimpleLock};
pub use owner::OwnerId;
pub use quorum::{QuorumExecutor, RetryingQuorumExecutor, WaitStrategy};
pub use semaphore::Semaphore;
