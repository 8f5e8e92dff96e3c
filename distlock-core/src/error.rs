use thiserror::Error;

/// Errors raised by a [`Backend`](crate::backend::Backend) implementation.
///
/// Per-backend failures of this kind are never surfaced to callers of
/// `RedLock`/`Semaphore`/`ListeningCountDownLatch` directly: the retry/failsafe
/// layer swallows them and treats the call as if the backend had returned its
/// "condition not met" outcome, per the quorum executor's contract.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Precondition violations raised synchronously at construction or call time.
///
/// This is the only error this library ever raises for the caller to handle;
/// everything else is modeled as a boolean/enum outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one backend is required")]
    EmptyBackends,

    #[error("retry_count must be >= 1, got {0}")]
    NonPositiveRetryCount(u32),

    #[error("retry_delay must be > 0")]
    NonPositiveRetryDelay,

    #[error("ttl must be greater than 2ms, got {0:?}")]
    TtlTooShort(std::time::Duration),

    #[error("max_leases must be >= 1, got {0}")]
    NonPositiveMaxLeases(u32),

    #[error("count must be >= 1, got {0}")]
    CountBelowOne(u64),

    #[error("max_duration must be at least twice the clock drift allowance ({min:?}), got {got:?}")]
    MaxDurationTooShort {
        min: std::time::Duration,
        got: std::time::Duration,
    },
}
