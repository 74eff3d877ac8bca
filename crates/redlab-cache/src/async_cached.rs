//! Cache-aside wrappers over a non-blocking store.
//!
//! Same contract as [`crate::cached`]; store calls suspend the current task
//! only and no lock is held while waiting.

use crate::cached::CacheOptions;
use crate::invalidation::{Invalidation, ResolvedInvalidation};
use crate::key::{CacheKey, FunctionId, KeyBuilder};
use crate::metrics::CacheMetrics;
use crate::store::AsyncCacheStore;
use redlab_config::RedisSettings;
use redlab_core::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Caching and invalidation over an [`AsyncCacheStore`].
#[derive(Clone)]
pub struct AsyncCacheLayer {
    store: Arc<dyn AsyncCacheStore>,
    keys: KeyBuilder,
    default_ttl: Option<Duration>,
}

impl AsyncCacheLayer {
    #[must_use]
    pub fn new(store: Arc<dyn AsyncCacheStore>, keys: KeyBuilder, default_ttl: Option<Duration>) -> Self {
        Self {
            store,
            keys,
            default_ttl,
        }
    }

    #[must_use]
    pub fn from_settings(store: Arc<dyn AsyncCacheStore>, settings: &RedisSettings) -> Self {
        Self::new(
            store,
            KeyBuilder::new(settings.key_prefix.clone()),
            Some(settings.default_ttl()),
        )
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AsyncCacheStore> {
        &self.store
    }

    #[must_use]
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Returns the cached result of `function(args)`, awaiting `compute` on
    /// a miss.
    pub async fn get_or_compute<A, T, E, F, Fut>(
        &self,
        function: FunctionId,
        args: &A,
        options: CacheOptions,
        compute: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.keys.derive(function, args)?;
        self.fetch_or_compute(function, &key, options, compute).await
    }

    async fn fetch_or_compute<T, E, F, Fut>(
        &self,
        function: FunctionId,
        key: &CacheKey,
        options: CacheOptions,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let format = options.format;
        let ttl = options.resolve_ttl(self.default_ttl)?;

        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => {
                debug!("Cache hit for key '{}'", key);
                CacheMetrics::hit(function);
                Ok(format.decode(&bytes)?)
            }
            Ok(None) => {
                debug!("Cache miss for key '{}'", key);
                let started = Instant::now();
                let value = compute().await?;
                CacheMetrics::miss(function, started.elapsed());

                let bytes = format.encode(&value)?;
                if let Err(e) = self.store.set(key.as_str(), &bytes, ttl).await {
                    warn!("Failed to cache key '{}', returning uncached result: {}", key, e);
                    CacheMetrics::bypass("set");
                }
                Ok(value)
            }
            Err(e) => {
                warn!("Cache lookup for key '{}' failed, calling through: {}", key, e);
                CacheMetrics::bypass("get");
                compute().await
            }
        }
    }

    /// Awaits `mutate` and, if it succeeds, deletes what `invalidation`
    /// resolves to for `args`.
    pub async fn invalidate_after<A, T, E, F, Fut>(
        &self,
        invalidation: &Invalidation<A>,
        args: &A,
        mutate: F,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let targets = invalidation.resolve(args, &self.keys)?;
        let result = mutate().await?;
        self.delete_targets(&targets).await;
        Ok(result)
    }

    /// Deletes the cached result of `function(args)`.
    pub async fn invalidate<A: Serialize + ?Sized>(&self, function: FunctionId, args: &A) -> CacheResult<bool> {
        let key = self.keys.derive(function, args)?;
        let deleted = self.store.delete(&[key.into_string()]).await?;
        CacheMetrics::invalidated(deleted);
        Ok(deleted > 0)
    }

    /// Deletes every cached result of `function`.
    pub async fn invalidate_function(&self, function: FunctionId) -> CacheResult<u64> {
        let deleted = self
            .store
            .delete_pattern(&self.keys.function_pattern(function))
            .await?;
        CacheMetrics::invalidated(deleted);
        Ok(deleted)
    }

    async fn delete_targets(&self, targets: &ResolvedInvalidation) -> u64 {
        let mut deleted = 0;

        if !targets.keys.is_empty() {
            match self.store.delete(&targets.keys).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    warn!("Failed to invalidate keys {:?}, entries may stay stale until expiry: {}", targets.keys, e);
                    CacheMetrics::bypass("delete");
                }
            }
        }

        for pattern in &targets.patterns {
            match self.store.delete_pattern(pattern).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    warn!("Failed to invalidate pattern '{}', entries may stay stale until expiry: {}", pattern, e);
                    CacheMetrics::bypass("delete_pattern");
                }
            }
        }

        debug!("Invalidated {} cache entries", deleted);
        CacheMetrics::invalidated(deleted);
        deleted
    }

    /// Wraps the async function `f` so its results are cached under
    /// `function`.
    pub fn cached<A, F, Fut>(&self, function: FunctionId, options: CacheOptions, f: F) -> AsyncCachedFn<A, F>
    where
        F: Fn(A) -> Fut,
    {
        AsyncCachedFn {
            layer: self.clone(),
            function,
            options,
            f,
            _marker: PhantomData,
        }
    }

    /// Wraps the async function `f` so every successful call invalidates
    /// `invalidation`.
    pub fn invalidating<A, F, Fut>(&self, invalidation: Invalidation<A>, f: F) -> AsyncInvalidatingFn<A, F>
    where
        F: Fn(A) -> Fut,
    {
        AsyncInvalidatingFn {
            layer: self.clone(),
            invalidation,
            f,
        }
    }
}

/// An async function whose results are cached. Built by
/// [`AsyncCacheLayer::cached`].
pub struct AsyncCachedFn<A, F> {
    layer: AsyncCacheLayer,
    function: FunctionId,
    options: CacheOptions,
    f: F,
    _marker: PhantomData<fn(A)>,
}

impl<A: Serialize, F> AsyncCachedFn<A, F> {
    pub async fn call<T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.layer.keys.derive(self.function, &args)?;
        self.layer
            .fetch_or_compute(self.function, &key, self.options, || (self.f)(args))
            .await
    }

    pub fn key_for(&self, args: &A) -> CacheResult<CacheKey> {
        self.layer.keys.derive(self.function, args)
    }

    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.function
    }
}

/// An async mutating function that invalidates cache entries on success.
/// Built by [`AsyncCacheLayer::invalidating`].
pub struct AsyncInvalidatingFn<A, F> {
    layer: AsyncCacheLayer,
    invalidation: Invalidation<A>,
    f: F,
}

impl<A, F> AsyncInvalidatingFn<A, F> {
    pub async fn call<T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        E: From<CacheError>,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let targets = self.invalidation.resolve(&args, &self.layer.keys)?;
        let result = (self.f)(args).await?;
        self.layer.delete_targets(&targets).await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CacheStore, MemoryStore, MockAsyncCacheStore};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GET_USER: FunctionId = FunctionId::new("tests::get_user");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[derive(Debug, PartialEq, thiserror::Error)]
    enum TestError {
        #[error("cache: {0}")]
        Cache(String),
        #[error("rejected")]
        Rejected,
    }

    impl From<CacheError> for TestError {
        fn from(err: CacheError) -> Self {
            Self::Cache(err.to_string())
        }
    }

    fn layer(store: Arc<dyn AsyncCacheStore>) -> AsyncCacheLayer {
        AsyncCacheLayer::new(store, KeyBuilder::new("test"), Some(Duration::from_secs(60)))
    }

    async fn load_user(id: u64, calls: &AtomicUsize) -> Result<User, TestError> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(User {
            id,
            name: format!("User_{}", id),
        })
    }

    #[tokio::test]
    async fn test_get_user_scenario() {
        let store = Arc::new(MemoryStore::new());
        let layer = layer(store.clone());
        let calls = AtomicUsize::new(0);
        let options = CacheOptions::json().with_ttl(Duration::from_secs(60));

        let first = layer
            .get_or_compute(GET_USER, &(42,), options, || load_user(42, &calls))
            .await
            .unwrap();
        let second = layer
            .get_or_compute(GET_USER, &(42,), options, || load_user(42, &calls))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.advance(Duration::from_secs(61));
        layer
            .get_or_compute(GET_USER, &(42,), options, || load_user(42, &calls))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected_before_the_store() {
        let store = Arc::new(MemoryStore::new());
        let layer = layer(store.clone());
        let calls = AtomicUsize::new(0);

        let result = layer
            .get_or_compute(
                GET_USER,
                &(42,),
                CacheOptions::json().with_ttl(Duration::ZERO),
                || load_user(42, &calls),
            )
            .await;
        assert!(matches!(result, Err(TestError::Cache(message)) if message.contains("TTL")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wrapped_functions() {
        let store = Arc::new(MemoryStore::new());
        let layer = layer(store.clone());
        let calls = AtomicUsize::new(0);

        let get_user = layer.cached(GET_USER, CacheOptions::msgpack(), |(id,): (u64,)| {
            load_user(id, &calls)
        });
        let update_user = layer.invalidating(
            Invalidation::new().same_call_of(GET_USER),
            |(id,): (u64,)| async move {
                if id == 0 {
                    Err(TestError::Rejected)
                } else {
                    Ok(())
                }
            },
        );

        get_user.call((1,)).await.unwrap();
        get_user.call((1,)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        update_user.call((1,)).await.unwrap();
        get_user.call((1,)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(update_user.call((0,)).await.unwrap_err(), TestError::Rejected);
        assert!(CacheStore::exists(store.as_ref(), get_user.key_for(&(1,)).unwrap().as_str()).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_store_calls_through() {
        let mut mock = MockAsyncCacheStore::new();
        mock.expect_get()
            .returning(|_| Err(CacheError::store_unavailable("connection refused")));
        mock.expect_set().never();
        mock.expect_delete()
            .returning(|_| Err(CacheError::store_unavailable("connection refused")));
        let layer = layer(Arc::new(mock));
        let calls = AtomicUsize::new(0);

        let user = layer
            .get_or_compute(GET_USER, &(3,), CacheOptions::json(), || load_user(3, &calls))
            .await
            .unwrap();
        assert_eq!(user.id, 3);

        let invalidation = Invalidation::new().same_call_of(GET_USER);
        let saved = layer
            .invalidate_after(&invalidation, &(3_u64,), || async { Ok::<_, TestError>(true) })
            .await
            .unwrap();
        assert!(saved);
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_the_same_value() {
        let store = Arc::new(MemoryStore::new());
        let layer = layer(store);
        let calls = AtomicUsize::new(0);
        let args = (9_u64,);

        let results = futures::future::join_all((0..8).map(|_| {
            layer.get_or_compute(GET_USER, &args, CacheOptions::json(), || load_user(9, &calls))
        }))
        .await;

        for result in results {
            assert_eq!(result.unwrap().id, 9);
        }
        assert!(layer.invalidate(GET_USER, &args).await.unwrap());
    }
}
