//! # Redlab Cache
//!
//! Cache-aside helpers over Redis.
//!
//! - [`store`]: blocking and async store traits with Redis and in-memory
//!   implementations
//! - [`serializer`]: JSON and MessagePack encoding of cached values
//! - [`key`]: deterministic cache keys from function identity and arguments
//! - [`cached`] / [`async_cached`]: wrappers that cache results and
//!   invalidate entries after mutating calls
//! - [`provider`]: process-wide store handles and the [`CacheContext`]
//!
//! ```
//! use redlab_cache::{function_id, CacheLayer, CacheOptions, Invalidation, KeyBuilder, MemoryStore};
//! use redlab_core::CacheError;
//! use std::sync::Arc;
//!
//! let layer = CacheLayer::new(Arc::new(MemoryStore::new()), KeyBuilder::default(), None);
//!
//! let get_user = layer.cached(function_id!(get_user), CacheOptions::json(), |(id,): (u64,)| {
//!     Ok::<_, CacheError>(format!("User_{}", id))
//! });
//! let rename_user = layer.invalidating(
//!     Invalidation::new().call_of(function_id!(get_user), |(id, _): &(u64, String)| (*id,)),
//!     |(_id, _name): (u64, String)| Ok::<_, CacheError>(()),
//! );
//!
//! assert_eq!(get_user.call((42,)).unwrap(), "User_42");
//! rename_user.call((42, "Ada".to_string())).unwrap();
//! ```

pub mod async_cached;
pub mod cached;
mod finite;
pub mod invalidation;
pub mod key;
pub mod metrics;
pub mod provider;
pub mod serializer;
pub mod store;

pub use async_cached::{AsyncCacheLayer, AsyncCachedFn, AsyncInvalidatingFn};
pub use cached::{CacheLayer, CacheOptions, CachedFn, InvalidatingFn};
pub use invalidation::{Invalidation, ResolvedInvalidation};
pub use key::{CacheKey, FunctionId, KeyBuilder, DEFAULT_NAMESPACE};
pub use crate::metrics::{register_metrics, CacheMetrics};
pub use provider::{CacheContext, ConnectionProvider};
pub use serializer::SerializationFormat;
pub use store::{AsyncCacheStore, AsyncRedisStore, CacheStore, MemoryStore, RedisStore};
