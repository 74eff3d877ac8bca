//! Store handles built once per process.

use crate::async_cached::AsyncCacheLayer;
use crate::cached::CacheLayer;
use crate::key::KeyBuilder;
use crate::store::{AsyncRedisStore, RedisStore};
use redlab_config::RedisSettings;
use redlab_core::CacheResult;
use std::sync::Arc;
use tracing::info;

/// Lazily builds one blocking and one pooled async Redis handle.
///
/// Each handle is created on first use and then shared; concurrent first
/// callers wait for the same construction instead of racing their own.
pub struct ConnectionProvider {
    settings: Arc<RedisSettings>,
    sync_store: once_cell::sync::OnceCell<Arc<RedisStore>>,
    async_store: tokio::sync::OnceCell<Arc<AsyncRedisStore>>,
}

impl ConnectionProvider {
    #[must_use]
    pub fn new(settings: Arc<RedisSettings>) -> Self {
        Self {
            settings,
            sync_store: once_cell::sync::OnceCell::new(),
            async_store: tokio::sync::OnceCell::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RedisSettings {
        &self.settings
    }

    /// The blocking handle.
    pub fn sync_store(&self) -> CacheResult<Arc<RedisStore>> {
        self.sync_store
            .get_or_try_init(|| {
                info!("Creating blocking Redis handle for {}", self.settings.redacted_url());
                RedisStore::from_settings(&self.settings).map(Arc::new)
            })
            .cloned()
    }

    /// The pooled async handle.
    pub async fn async_store(&self) -> CacheResult<Arc<AsyncRedisStore>> {
        self.async_store
            .get_or_try_init(|| async {
                info!(
                    "Creating Redis pool of {} for {}",
                    self.settings.pool_size,
                    self.settings.redacted_url()
                );
                AsyncRedisStore::from_settings(&self.settings).map(Arc::new)
            })
            .await
            .cloned()
    }
}

/// Everything a component needs to use the cache.
///
/// Built once at startup and passed by reference.
pub struct CacheContext {
    provider: ConnectionProvider,
    keys: KeyBuilder,
}

impl CacheContext {
    #[must_use]
    pub fn new(settings: RedisSettings) -> Self {
        let keys = KeyBuilder::new(settings.key_prefix.clone());
        Self {
            provider: ConnectionProvider::new(Arc::new(settings)),
            keys,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RedisSettings {
        self.provider.settings()
    }

    #[must_use]
    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    #[must_use]
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Blocking cache layer over the shared blocking handle.
    pub fn sync_layer(&self) -> CacheResult<CacheLayer> {
        let store = self.provider.sync_store()?;
        Ok(CacheLayer::new(
            store,
            self.keys.clone(),
            Some(self.settings().default_ttl()),
        ))
    }

    /// Async cache layer over the shared pool.
    pub async fn async_layer(&self) -> CacheResult<AsyncCacheLayer> {
        let store = self.provider.async_store().await?;
        Ok(AsyncCacheLayer::new(
            store,
            self.keys.clone(),
            Some(self.settings().default_ttl()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn settings() -> RedisSettings {
        let mut settings = RedisSettings::new("app", "s3cret/pass");
        // Nothing listens here; handles are built without connecting.
        settings.internal_port = 1;
        settings.key_prefix = "ctx".to_string();
        settings
    }

    #[test]
    fn test_sync_store_is_built_once() {
        let provider = Arc::new(ConnectionProvider::new(Arc::new(settings())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                thread::spawn(move || provider.sync_store().unwrap())
            })
            .collect();
        let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for store in &stores {
            assert!(Arc::ptr_eq(store, &stores[0]));
        }
        assert!(Arc::ptr_eq(&provider.sync_store().unwrap(), &stores[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_store_is_built_once() {
        let provider = Arc::new(ConnectionProvider::new(Arc::new(settings())));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.async_store().await.unwrap() })
            })
            .collect();

        let mut stores = Vec::new();
        for task in tasks {
            stores.push(task.await.unwrap());
        }
        for store in &stores {
            assert!(Arc::ptr_eq(store, &stores[0]));
        }
    }

    #[tokio::test]
    async fn test_context_layers_share_handles() {
        let context = CacheContext::new(settings());
        assert_eq!(context.keys().namespace(), "ctx");

        let first = context.sync_layer().unwrap();
        let second = context.sync_layer().unwrap();
        assert!(Arc::ptr_eq(first.store(), second.store()));
        assert_eq!(first.default_ttl(), Some(context.settings().default_ttl()));

        let first = context.async_layer().await.unwrap();
        let second = context.async_layer().await.unwrap();
        assert!(Arc::ptr_eq(first.store(), second.store()));
    }

    #[test]
    fn test_unreachable_store_degrades_to_direct_calls() {
        let context = CacheContext::new(settings());
        let layer = context.sync_layer().unwrap();

        let value = layer
            .get_or_compute(
                crate::function_id!(answer),
                &(),
                crate::CacheOptions::json(),
                || Ok::<_, redlab_core::CacheError>(42),
            )
            .unwrap();
        assert_eq!(value, 42);
    }
}
