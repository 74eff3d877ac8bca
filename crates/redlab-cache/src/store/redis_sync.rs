//! Blocking Redis store.

use super::{store_error, ttl_secs, CacheStore, SCAN_COUNT};
use parking_lot::Mutex;
use redis::{Commands, Connection, RedisError, RedisResult};
use redlab_config::RedisSettings;
use redlab_core::{CacheError, CacheResult};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocking Redis store over a single connection.
///
/// The connection is opened on first use and reopened on the next call
/// after an I/O failure. Callers on different threads take turns on it.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<Connection>>,
    timeout: Duration,
}

impl RedisStore {
    /// Creates a store for `url`. No connection is made yet.
    pub fn open(url: &str, timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::configuration(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout,
        })
    }

    /// Creates a store from validated settings.
    pub fn from_settings(settings: &RedisSettings) -> CacheResult<Self> {
        Self::open(&settings.connection_url()?, settings.connect_timeout())
    }

    fn connect(&self) -> CacheResult<Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(|e| CacheError::store_unavailable(format!("Failed to connect to Redis: {}", e)))?;

        conn.set_read_timeout(Some(self.timeout))
            .and_then(|()| conn.set_write_timeout(Some(self.timeout)))
            .map_err(|e| CacheError::store_unavailable(format!("Failed to set socket timeouts: {}", e)))?;

        info!("Blocking Redis connection established");
        Ok(conn)
    }

    /// Runs `op` on the shared connection, opening it if needed.
    fn with_connection<T>(
        &self,
        operation: &str,
        target: &str,
        op: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> CacheResult<T> {
        let mut guard = self.connection.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(CacheError::internal("Redis connection missing after connect"));
        };

        op(conn).map_err(|e| {
            if is_broken(&e) {
                warn!("Dropping broken Redis connection: {}", e);
                *guard = None;
            }
            store_error(operation, target, e)
        })
    }
}

/// Errors after which the connection cannot be trusted anymore.
fn is_broken(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_timeout()
}

impl CacheStore for RedisStore {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self.with_connection("get key", key, |conn| conn.get(key))?;

        match &value {
            Some(_) => debug!("Cache hit for key '{}'", key),
            None => debug!("Cache miss for key '{}'", key),
        }

        Ok(value)
    }

    fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        self.with_connection("get keys", &keys.join(","), |conn| {
            redis::cmd("MGET").arg(keys).query(conn)
        })
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.with_connection("set key", key, |conn| match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)),
            None => conn.set::<_, _, ()>(key, value),
        })?;

        debug!("Cached key '{}' with TTL {:?}", key, ttl);
        Ok(())
    }

    fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> CacheResult<()> {
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

        self.with_connection("set keys", &format!("{} entries", entries.len()), |conn| {
            pipe.query::<()>(conn)
        })?;

        debug!("Cached {} keys with TTL {:?}", entries.len(), ttl);
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = self.with_connection("delete keys", &keys.join(","), |conn| conn.del(keys))?;

        debug!("Deleted {} of {} keys", deleted, keys.len());
        Ok(deleted)
    }

    fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        // Collect first: the pattern must not see keys we add meanwhile,
        // and DEL cannot share the connection with an open cursor.
        let keys = self.with_connection("scan keys", pattern, |conn| {
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(conn)?;
                keys.extend(batch);
                if next == 0 {
                    return Ok(keys);
                }
                cursor = next;
            }
        })?;

        let deleted = self.delete(&keys)?;
        debug!("Deleted {} keys matching pattern '{}'", deleted, pattern);
        Ok(deleted)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        self.with_connection("check key", key, |conn| conn.exists(key))
    }

    fn ping(&self) -> CacheResult<()> {
        let _: String = self.with_connection("ping", "server", |conn| redis::cmd("PING").query(conn))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_does_not_connect() {
        // Nothing listens on port 1; opening must still succeed.
        let store = RedisStore::open("redis://127.0.0.1:1/0", Duration::from_millis(200));
        assert!(store.is_ok());
    }

    #[test]
    fn test_open_rejects_bad_url() {
        let err = RedisStore::open("http://localhost", Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_unreachable_server_is_store_unavailable() {
        let store = RedisStore::open("redis://127.0.0.1:1/0", Duration::from_millis(200)).unwrap();
        let err = store.get("k").unwrap_err();
        assert!(err.is_store_unavailable());

        // A later call tries again instead of sticking to the failure.
        assert!(store.ping().unwrap_err().is_store_unavailable());
    }

    #[test]
    fn test_empty_batches_skip_the_server() {
        let store = RedisStore::open("redis://127.0.0.1:1/0", Duration::from_millis(200)).unwrap();
        assert_eq!(store.get_many(&[]).unwrap(), Vec::<Option<Vec<u8>>>::new());
        assert_eq!(store.delete(&[]).unwrap(), 0);
        assert!(store.set_many(&[], None).is_ok());
    }
}
