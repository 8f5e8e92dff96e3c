use std::fmt;

/// A random identifier unique to one lock/semaphore/latch instance.
///
/// Stored as the value under a lock key; it is the sole token the backend's
/// conditional delete accepts, which is what prevents a client from releasing
/// (or stealing) a lease it does not hold. It is generated once, at
/// construction, and never changes for the lifetime of the instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
    /// Generate a new, random owner id (UUIDv4 rendered as text).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
