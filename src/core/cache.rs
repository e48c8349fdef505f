//! Shared TTL store used for usage counters and sync locks

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::Result;

/// Integer-valued cache with per-key expiry.
///
/// `add` and `increment` must be atomic with respect to other callers of the
/// same store; lock acquisition and usage metering rely on that.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Overwrite `key`; `ttl` of `None` never expires
    async fn put(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()>;

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove `key`, returning whether a live entry was present
    async fn forget(&self, key: &str) -> Result<bool>;

    /// Remove `key` only while it still holds `expected`
    async fn forget_if(&self, key: &str, expected: i64) -> Result<bool>;

    /// Set `key` only if it is absent or expired
    async fn add(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<bool>;

    /// Add `by` to the current value (0 when absent) and return the new value.
    /// A fresh entry takes `ttl`; an existing one keeps its expiry.
    async fn increment(&self, key: &str, by: i64, ttl: Option<Duration>) -> Result<i64>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: i64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local `CacheStore`
#[derive(Debug)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| now + ttl)
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let removed = self.entries.lock().await.remove(key);
        Ok(removed.map_or(false, |e| e.is_live(now)))
    }

    async fn forget_if(&self, key: &str, expected: i64) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).map_or(false, |e| e.is_live(now)) {
            return Ok(false);
        }
        let expires_at = self.expiry(now, ttl);
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn increment(&self, key: &str, by: i64, ttl: Option<Duration>) -> Result<i64> {
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert(Entry { value: 0, expires_at });
        if !entry.is_live(now) {
            *entry = Entry { value: 0, expires_at };
        }
        entry.value += by;
        Ok(entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> (Arc<ManualClock>, InMemoryCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let cache = InMemoryCache::new(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (clock, cache) = store();
        cache.put("k", 7, Some(Duration::seconds(10))).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(7));

        clock.advance(Duration::seconds(10));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn add_only_sets_absent_keys() {
        let (clock, cache) = store();
        assert!(cache.add("lock", 1, Some(Duration::seconds(5))).await.unwrap());
        assert!(!cache.add("lock", 2, Some(Duration::seconds(5))).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some(1));

        clock.advance(Duration::seconds(6));
        assert!(cache.add("lock", 3, None).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn forget_if_checks_value() {
        let (_clock, cache) = store();
        cache.put("lock", 10, None).await.unwrap();
        assert!(!cache.forget_if("lock", 11).await.unwrap());
        assert!(cache.has("lock").await.unwrap());
        assert!(cache.forget_if("lock", 10).await.unwrap());
        assert!(!cache.has("lock").await.unwrap());
    }

    #[tokio::test]
    async fn increment_keeps_original_expiry() {
        let (clock, cache) = store();
        assert_eq!(cache.increment("c", 5, Some(Duration::seconds(10))).await.unwrap(), 5);
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.increment("c", 5, Some(Duration::seconds(10))).await.unwrap(), 10);
        clock.advance(Duration::seconds(3));
        assert_eq!(cache.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let cache = Arc::new(InMemoryCache::default());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.increment("n", 2, None).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.get("n").await.unwrap(), Some(100));
    }

    #[test]
    fn forget_reports_presence() {
        let (_clock, cache) = store();
        tokio_test::block_on(async {
            cache.put("x", 1, None).await.unwrap();
            assert!(cache.forget("x").await.unwrap());
            assert!(!cache.forget("x").await.unwrap());
            assert!(cache.is_empty().await);
        });
    }
}
