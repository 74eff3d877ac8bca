//! In-process store with Redis-like expiry.

use super::{AsyncCacheStore, CacheStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use redlab_core::{CacheError, CacheResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    /// Added to the wall clock, so tests can expire entries without sleeping.
    offset: Duration,
}

impl State {
    fn now(&self) -> Instant {
        Instant::now() + self.offset
    }

    /// Returns the live entry for `key`, dropping it if expired.
    fn live(&mut self, key: &str) -> Option<&Entry> {
        let now = self.now();
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn purge_expired(&mut self) {
        let now = self.now();
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }

    fn insert(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| self.now() + ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
    }
}

/// Store kept in process memory.
///
/// Behaves like a single Redis database: entries expire after their TTL and
/// pattern deletes use Redis glob syntax. Time can be moved forward with
/// [`advance`](Self::advance) and outages simulated with
/// [`set_available`](Self::set_available).
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                offset: Duration::ZERO,
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Moves the store clock forward.
    pub fn advance(&self, by: Duration) {
        self.state.lock().offset += by;
    }

    /// While unavailable every operation fails with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        state.purge_expired();
        state.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of `key`; `None` if absent or without expiry.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock();
        let now = state.now();
        state
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check(&self) -> CacheResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::store_unavailable("Memory store is offline"))
        }
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.state.lock().live(key).map(|entry| entry.value.clone()))
    }

    fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        self.check()?;
        let mut state = self.state.lock();
        Ok(keys
            .iter()
            .map(|key| state.live(key).map(|entry| entry.value.clone()))
            .collect())
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        self.state.lock().insert(key, value, ttl);
        Ok(())
    }

    fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        let mut state = self.state.lock();
        for (key, value) in entries {
            state.insert(key, value, ttl);
        }
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.check()?;
        let mut state = self.state.lock();
        state.purge_expired();
        let deleted = keys
            .iter()
            .filter(|key| state.entries.remove(key.as_str()).is_some())
            .count();
        Ok(deleted as u64)
    }

    fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.check()?;
        let mut state = self.state.lock();
        state.purge_expired();
        let before = state.entries.len();
        state.entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - state.entries.len()) as u64)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.state.lock().live(key).is_some())
    }

    fn ping(&self) -> CacheResult<()> {
        self.check()
    }
}

#[async_trait]
impl AsyncCacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        CacheStore::get(self, key)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        CacheStore::get_many(self, keys)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        CacheStore::set(self, key, value, ttl)
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Option<Duration>) -> CacheResult<()> {
        CacheStore::set_many(self, entries, ttl)
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        CacheStore::delete(self, keys)
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        CacheStore::delete_pattern(self, pattern)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        CacheStore::exists(self, key)
    }

    async fn ping(&self) -> CacheResult<()> {
        CacheStore::ping(self)
    }
}

/// Matches `text` against a Redis glob: `*`, `?`, `[abc]`, `[^a-z]` and `\`
/// escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_at(&pattern, &text)
}

fn glob_match_at(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Where to resume after the last `*`: (pattern index, text index).
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some('?') => Some(p + 1),
            Some('[') => match_class(pattern, p, text[t]),
            Some('\\') if p + 1 < pattern.len() => (pattern[p + 1] == text[t]).then_some(p + 2),
            Some(&c) => (c == text[t]).then_some(p + 1),
            None => None,
        };

        match (step, backtrack) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((star_p, star_t))) => {
                backtrack = Some((star_p, star_t + 1));
                p = star_p;
                t = star_t + 1;
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Matches `c` against the class opening at `pattern[start]`, returning the
/// index after the closing `]`.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<usize> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    // Unterminated class: Redis treats the end of pattern as the close.
    let next = if i < pattern.len() { i + 1 } else { i };
    (matched != negate).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_set_get_without_ttl() {
        let store = MemoryStore::new();
        CacheStore::set(&store, "a", b"1", None).unwrap();
        assert_eq!(CacheStore::get(&store, "a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.ttl("a"), None);

        store.advance(Duration::from_secs(86_400));
        assert!(CacheStore::exists(&store, "a").unwrap());
    }

    #[test]
    fn test_entries_expire() {
        let store = MemoryStore::new();
        CacheStore::set(&store, "a", b"1", Some(Duration::from_secs(60))).unwrap();
        assert!(store.ttl("a").unwrap() <= Duration::from_secs(60));

        store.advance(Duration::from_secs(59));
        assert!(CacheStore::exists(&store, "a").unwrap());

        store.advance(Duration::from_secs(1));
        assert_eq!(CacheStore::get(&store, "a").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_batch_operations() {
        let store = MemoryStore::new();
        let entries = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ];
        CacheStore::set_many(&store, &entries, Some(Duration::from_secs(5))).unwrap();

        let values = CacheStore::get_many(&store, &keys(&["a", "missing", "b"])).unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]);

        assert_eq!(CacheStore::delete(&store, &keys(&["a", "missing"])).unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_pattern() {
        let store = MemoryStore::new();
        for key in ["ns:get_user:[1]", "ns:get_user:[2]", "ns:list:[]", "other:get_user:[1]"] {
            CacheStore::set(&store, key, b"x", None).unwrap();
        }

        assert_eq!(CacheStore::delete_pattern(&store, "ns:get_user:*").unwrap(), 2);
        assert!(CacheStore::exists(&store, "ns:list:[]").unwrap());
        assert!(CacheStore::exists(&store, "other:get_user:[1]").unwrap());
    }

    #[test]
    fn test_expired_keys_are_not_counted_as_deleted() {
        let store = MemoryStore::new();
        CacheStore::set(&store, "a", b"1", Some(Duration::from_secs(1))).unwrap();
        store.advance(Duration::from_secs(2));
        assert_eq!(CacheStore::delete(&store, &keys(&["a"])).unwrap(), 0);
    }

    #[test]
    fn test_unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        CacheStore::set(&store, "a", b"1", None).unwrap();
        store.set_available(false);

        assert!(CacheStore::get(&store, "a").unwrap_err().is_store_unavailable());
        assert!(CacheStore::set(&store, "b", b"2", None).unwrap_err().is_store_unavailable());
        assert!(CacheStore::delete(&store, &keys(&["a"])).unwrap_err().is_store_unavailable());
        assert!(CacheStore::ping(&store).unwrap_err().is_store_unavailable());

        store.set_available(true);
        assert_eq!(CacheStore::get(&store, "a").unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_async_operations_share_state() {
        let store = MemoryStore::new();
        AsyncCacheStore::set(&store, "a", b"1", None).await.unwrap();
        assert_eq!(CacheStore::get(&store, "a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(AsyncCacheStore::delete_pattern(&store, "*").await.unwrap(), 1);
        assert!(AsyncCacheStore::ping(&store).await.is_ok());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "abd"));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(!glob_match("h[a-c]llo", "hdllo"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("ns\\[1\\]:*", "ns[1]:key"));
        assert!(glob_match("*:[[]42]", "f:[42]"));
    }
}
