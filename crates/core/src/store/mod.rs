// Session key/value store
// Decision: Whole-value get/put/delete per key; no cross-key transactions
// Decision: TTL is advisory; every put resets the key's expiry
// Decision: Unavailability is an error, never an empty result
//
// The store is injected as `Arc<dyn SessionStore>` so handlers and the registry
// can run against the in-memory backend in dev mode and tests, and against Redis
// when several processes must share sessions.

use std::time::Duration;

use async_trait::async_trait;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemorySessionStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisSessionStore;

/// Error type for session store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or rejected the command
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// Backend requested by configuration is not compiled in
    #[error("session store backend not supported: {0}")]
    Unsupported(String),
}

/// Key/value store with per-key expiry
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Store `value` under `key`, replacing any previous value and resetting its expiry
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Fetch the value under `key`; `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove `key` only if it currently holds `expected`
    ///
    /// Returns whether the key was removed. The default implementation is a
    /// non-atomic read then delete; backends that can do better override it.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        match self.get(key).await? {
            Some(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Short backend name for health output and logs
    fn backend(&self) -> &'static str;
}
