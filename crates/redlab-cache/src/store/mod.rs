//! Store abstraction for cache entries.
//!
//! The cache wrappers only ever talk to these traits, so the Redis
//! implementations can be swapped for the in-process [`MemoryStore`] in
//! tests or when no server is around.

mod async_redis;
mod memory;
mod redis_sync;

pub use async_redis::AsyncRedisStore;
pub use memory::MemoryStore;
pub use redis_sync::RedisStore;

use async_trait::async_trait;
use redlab_core::{CacheError, CacheResult};
use std::time::Duration;

/// Blocking store operations.
///
/// Every method is one round trip; failures of any kind are reported as
/// [`CacheError::StoreUnavailable`].
#[cfg_attr(test, mockall::automock)]
pub trait CacheStore: Send + Sync {
    /// Returns the raw bytes stored under `key`, `None` if absent or expired.
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Returns the bytes for several keys, in the same order.
    fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// Stores bytes under `key`. `None` means no expiry.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Stores several entries with the same TTL.
    fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> CacheResult<()>;

    /// Deletes keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Deletes every key matching a Redis glob pattern.
    fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Checks if a key exists.
    fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Round trip to check the store answers.
    fn ping(&self) -> CacheResult<()>;
}

/// Non-blocking store operations.
///
/// Same contract as [`CacheStore`]; calls suspend the current task only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsyncCacheStore: Send + Sync {
    /// Returns the raw bytes stored under `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Returns the bytes for several keys, in the same order.
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// Stores bytes under `key`. `None` means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Stores several entries with the same TTL.
    async fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> CacheResult<()>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Deletes every key matching a Redis glob pattern.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Checks if a key exists.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Round trip to check the store answers.
    async fn ping(&self) -> CacheResult<()>;
}

/// Number of keys requested per SCAN page.
pub(crate) const SCAN_COUNT: usize = 100;

/// Whole seconds for SETEX, rounded up; Redis rejects zero.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

pub(crate) fn store_error(operation: &str, target: &str, err: impl std::fmt::Display) -> CacheError {
    CacheError::StoreUnavailable(format!("Failed to {} '{}': {}", operation, target, err))
}
