//! Pooled async Redis store.

use super::{store_error, ttl_secs, AsyncCacheStore, SCAN_COUNT};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use redlab_config::RedisSettings;
use redlab_core::{CacheError, CacheResult};
use std::time::Duration;
use tracing::debug;

/// Redis store backed by a `deadpool-redis` connection pool.
pub struct AsyncRedisStore {
    pool: Pool,
}

impl AsyncRedisStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates a pool for `url`. Connections are opened on demand.
    pub fn from_url(url: &str, pool_size: usize, timeout: Duration) -> CacheResult<Self> {
        let mut pool_config = PoolConfig::new(pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(timeout),
            create: Some(timeout),
            recycle: Some(timeout),
        };

        let mut config = Config::from_url(url);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::configuration(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Creates a pool from validated settings.
    pub fn from_settings(settings: &RedisSettings) -> CacheResult<Self> {
        Self::from_url(
            &settings.connection_url()?,
            settings.pool_size as usize,
            settings.connect_timeout(),
        )
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> CacheResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::store_unavailable(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl AsyncCacheStore for AsyncRedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.get_conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| store_error("get key", key, e))?;

        match &value {
            Some(_) => debug!("Cache hit for key '{}'", key),
            None => debug!("Cache miss for key '{}'", key),
        }

        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.get_conn().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("get keys", &keys.join(","), e))?;

        Ok(values)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.get_conn().await?;

        let result: redis::RedisResult<()> = match ttl {
            Some(ttl) => conn.set_ex(key, value, ttl_secs(ttl)).await,
            None => conn.set(key, value).await,
        };
        result.map_err(|e| store_error("set key", key, e))?;

        debug!("Cached key '{}' with TTL {:?}", key, ttl);
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        match ttl {
            Some(ttl) => {
                let secs = ttl_secs(ttl);
                for (key, value) in entries {
                    pipe.set_ex(key, value.as_slice(), secs).ignore();
                }
            }
            None => {
                pipe.mset(entries).ignore();
            }
        }

        let mut conn = self.get_conn().await?;
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("set keys", &format!("{} entries", entries.len()), e))?;

        debug!("Cached {} keys with TTL {:?}", entries.len(), ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn().await?;
        let deleted: u64 = conn
            .del(keys)
            .await
            .map_err(|e| store_error("delete keys", &keys.join(","), e))?;

        debug!("Deleted {} of {} keys", deleted, keys.len());
        Ok(deleted)
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut conn = self.get_conn().await?;

        let mut cursor: u64 = 0;
        let mut keys: Vec<String> = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("scan keys", pattern, e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| store_error("delete keys", pattern, e))?;

        debug!("Deleted {} keys matching pattern '{}'", deleted, pattern);
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_conn().await?;
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| store_error("check key", key, e))?;

        Ok(exists)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.get_conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("ping", "server", e))?;
        Ok(())
    }
}
