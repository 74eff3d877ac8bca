//! Cache-aside wrappers over a blocking store.

use crate::invalidation::{Invalidation, ResolvedInvalidation};
use crate::key::{CacheKey, FunctionId, KeyBuilder};
use crate::metrics::CacheMetrics;
use crate::serializer::SerializationFormat;
use crate::store::CacheStore;
use redlab_config::RedisSettings;
use redlab_core::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-call cache options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Entry lifetime. `None` uses the layer default.
    pub ttl: Option<Duration>,
    pub format: SerializationFormat,
}

impl CacheOptions {
    #[must_use]
    pub fn json() -> Self {
        Self {
            ttl: None,
            format: SerializationFormat::Json,
        }
    }

    #[must_use]
    pub fn msgpack() -> Self {
        Self {
            ttl: None,
            format: SerializationFormat::MessagePack,
        }
    }

    /// Sets the entry lifetime. A zero TTL fails the cached call with
    /// [`CacheError::Configuration`]; Redis has no zero-second expiry.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Lifetime to store with, falling back to `default`.
    pub(crate) fn resolve_ttl(&self, default: Option<Duration>) -> CacheResult<Option<Duration>> {
        match self.ttl.or(default) {
            Some(ttl) if ttl.is_zero() => Err(CacheError::configuration("cache TTL must be greater than zero")),
            ttl => Ok(ttl),
        }
    }
}

/// Caching and invalidation over a [`CacheStore`].
///
/// Store failures never reach the caller: reads fall through to the wrapped
/// function and writes or deletes are skipped, both with a warning. Errors
/// of the wrapped function are returned unchanged and never cached.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    keys: KeyBuilder,
    default_ttl: Option<Duration>,
}

impl CacheLayer {
    /// `default_ttl` of `None` stores entries without expiry.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, keys: KeyBuilder, default_ttl: Option<Duration>) -> Self {
        Self {
            store,
            keys,
            default_ttl,
        }
    }

    /// Uses the namespace and default TTL from settings.
    #[must_use]
    pub fn from_settings(store: Arc<dyn CacheStore>, settings: &RedisSettings) -> Self {
        Self::new(
            store,
            KeyBuilder::new(settings.key_prefix.clone()),
            Some(settings.default_ttl()),
        )
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
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

    /// Returns the cached result of `function(args)`, computing and storing
    /// it on a miss.
    ///
    /// ```
    /// use redlab_cache::{function_id, CacheLayer, CacheOptions, KeyBuilder, MemoryStore};
    /// use redlab_core::CacheError;
    /// use std::sync::Arc;
    ///
    /// let layer = CacheLayer::new(Arc::new(MemoryStore::new()), KeyBuilder::default(), None);
    /// let square = |n: u64| -> Result<u64, CacheError> {
    ///     layer.get_or_compute(function_id!(square), &(n,), CacheOptions::json(), || Ok(n * n))
    /// };
    /// assert_eq!(square(12).unwrap(), 144);
    /// ```
    pub fn get_or_compute<A, T, E, F>(
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
        F: FnOnce() -> Result<T, E>,
    {
        let key = self.keys.derive(function, args)?;
        self.fetch_or_compute(function, &key, options, compute)
    }

    pub(crate) fn fetch_or_compute<T, E, F>(
        &self,
        function: FunctionId,
        key: &CacheKey,
        options: CacheOptions,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        let format = options.format;
        let ttl = options.resolve_ttl(self.default_ttl)?;

        match self.store.get(key.as_str()) {
            Ok(Some(bytes)) => {
                debug!("Cache hit for key '{}'", key);
                CacheMetrics::hit(function);
                Ok(format.decode(&bytes)?)
            }
            Ok(None) => {
                debug!("Cache miss for key '{}'", key);
                let started = Instant::now();
                let value = compute()?;
                CacheMetrics::miss(function, started.elapsed());

                let bytes = format.encode(&value)?;
                if let Err(e) = self.store.set(key.as_str(), &bytes, ttl) {
                    warn!("Failed to cache key '{}', returning uncached result: {}", key, e);
                    CacheMetrics::bypass("set");
                }
                Ok(value)
            }
            Err(e) => {
                warn!("Cache lookup for key '{}' failed, calling through: {}", key, e);
                CacheMetrics::bypass("get");
                compute()
            }
        }
    }

    /// Runs `mutate` and, if it succeeds, deletes what `invalidation`
    /// resolves to for `args`.
    ///
    /// Targets are resolved before `mutate` runs, so an underivable key
    /// fails the call before anything changes.
    pub fn invalidate_after<A, T, E, F>(
        &self,
        invalidation: &Invalidation<A>,
        args: &A,
        mutate: F,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        let targets = invalidation.resolve(args, &self.keys)?;
        let result = mutate()?;
        self.delete_targets(&targets);
        Ok(result)
    }

    /// Deletes the cached result of `function(args)`.
    pub fn invalidate<A: Serialize + ?Sized>(&self, function: FunctionId, args: &A) -> CacheResult<bool> {
        let key = self.keys.derive(function, args)?;
        let deleted = self.store.delete(&[key.into_string()])?;
        CacheMetrics::invalidated(deleted);
        Ok(deleted > 0)
    }

    /// Deletes every cached result of `function`.
    pub fn invalidate_function(&self, function: FunctionId) -> CacheResult<u64> {
        let deleted = self.store.delete_pattern(&self.keys.function_pattern(function))?;
        CacheMetrics::invalidated(deleted);
        Ok(deleted)
    }

    /// Best-effort delete; failures are logged and skipped.
    fn delete_targets(&self, targets: &ResolvedInvalidation) -> u64 {
        let mut deleted = 0;

        if !targets.keys.is_empty() {
            match self.store.delete(&targets.keys) {
                Ok(count) => deleted += count,
                Err(e) => {
                    warn!("Failed to invalidate keys {:?}, entries may stay stale until expiry: {}", targets.keys, e);
                    CacheMetrics::bypass("delete");
                }
            }
        }

        for pattern in &targets.patterns {
            match self.store.delete_pattern(pattern) {
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

    /// Wraps `f` so its results are cached under `function`.
    pub fn cached<A, T, E, F>(&self, function: FunctionId, options: CacheOptions, f: F) -> CachedFn<A, T, E, F>
    where
        F: Fn(A) -> Result<T, E>,
    {
        CachedFn {
            layer: self.clone(),
            function,
            options,
            f,
            _marker: PhantomData,
        }
    }

    /// Wraps `f` so every successful call invalidates `invalidation`.
    pub fn invalidating<A, T, E, F>(&self, invalidation: Invalidation<A>, f: F) -> InvalidatingFn<A, T, E, F>
    where
        F: Fn(A) -> Result<T, E>,
    {
        InvalidatingFn {
            layer: self.clone(),
            invalidation,
            f,
            _marker: PhantomData,
        }
    }
}

/// A function whose results are cached. Built by [`CacheLayer::cached`].
pub struct CachedFn<A, T, E, F> {
    layer: CacheLayer,
    function: FunctionId,
    options: CacheOptions,
    f: F,
    _marker: PhantomData<fn(A) -> Result<T, E>>,
}

impl<A, T, E, F> CachedFn<A, T, E, F>
where
    A: Serialize,
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: Fn(A) -> Result<T, E>,
{
    pub fn call(&self, args: A) -> Result<T, E> {
        let key = self.layer.keys.derive(self.function, &args)?;
        self.layer
            .fetch_or_compute(self.function, &key, self.options, || (self.f)(args))
    }

    /// Key the result of `args` is stored under.
    pub fn key_for(&self, args: &A) -> CacheResult<CacheKey> {
        self.layer.keys.derive(self.function, args)
    }

    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.function
    }
}

/// A mutating function that invalidates cache entries on success. Built by
/// [`CacheLayer::invalidating`].
pub struct InvalidatingFn<A, T, E, F> {
    layer: CacheLayer,
    invalidation: Invalidation<A>,
    f: F,
    _marker: PhantomData<fn(A) -> Result<T, E>>,
}

impl<A, T, E, F> InvalidatingFn<A, T, E, F>
where
    E: From<CacheError>,
    F: Fn(A) -> Result<T, E>,
{
    pub fn call(&self, args: A) -> Result<T, E> {
        let targets = self.invalidation.resolve(&args, &self.layer.keys)?;
        let result = (self.f)(args)?;
        self.layer.delete_targets(&targets);
        Ok(result)
    }
}
