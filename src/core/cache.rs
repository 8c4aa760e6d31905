//! Process-wide signal cache.
//!
//! One bounded LRU behind a mutex that is only held for a single get or put;
//! fetches run outside it, gated per key. Entries expire lazily: an expired
//! entry is dropped when it is read, and all expired entries are purged
//! before a live one is evicted.

use crate::config::CacheSettings;
use crate::domain::model::AdapterKind;
use dashmap::DashMap;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct CacheEntry {
    value: CachedValue,
    created: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) > self.ttl
    }
}

/// (adapter kind, normalized target, lookup parameter) 的穩定雜湊
pub fn cache_key(kind: AdapterKind, target: &str, param: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(target.as_bytes());
    hasher.update(b"|");
    hasher.update(param.unwrap_or("").as_bytes());
    format!("{}:{}", kind, hex::encode(hasher.finalize()))
}

pub struct SignalCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
    default_ttl: Duration,
}

impl SignalCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
            default_ttl,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            settings.max_entries,
            Duration::from_secs(settings.ttl_seconds),
        )
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 讀取同時更新 recency；過期或型別不符視為 miss
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries();

        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            entries.pop(key);
            tracing::debug!("🗄️ cache: expired entry dropped for {}", key);
            return None;
        }

        entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<T>().cloned())
    }

    pub fn put<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries();

        if entries.len() >= entries.cap().get() && !entries.contains(key) {
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &expired {
                entries.pop(k);
            }
            if expired.is_empty() {
                tracing::debug!("🗄️ cache: full, evicting least recently used entry");
            }
        }

        entries.put(
            key.to_string(),
            CacheEntry {
                value: Arc::new(value),
                created: now,
                ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries().pop(key);
    }

    /// Entries currently held, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value for `key`, or the result of `fetch`.
    ///
    /// Concurrent callers with the same key wait for the first one instead of
    /// fetching again. `fetch` returns the value and how long to keep it;
    /// `None` means the value is handed back without being stored.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fetch: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = (T, Option<Duration>)>,
    {
        if let Some(hit) = self.get::<T>(key) {
            tracing::debug!("🗄️ cache: hit {}", key);
            return hit;
        }

        let gate = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let guard = gate.clone().lock_owned().await;

        // 等待期間可能已有其他呼叫者寫入
        let value = match self.get::<T>(key) {
            Some(hit) => hit,
            None => {
                let (value, ttl) = fetch().await;
                if let Some(ttl) = ttl {
                    self.put(key, value.clone(), ttl);
                }
                value
            }
        };

        drop(guard);
        drop(gate);
        self.in_flight
            .remove_if(key, |_, gate| Arc::strong_count(gate) == 1);

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bounded(capacity: usize) -> SignalCache {
        SignalCache::new(capacity, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = bounded(10);
        cache.put("a", 42u32, Duration::from_secs(10));

        assert_eq!(cache.get::<u32>("a"), Some(42));
        assert_eq!(cache.get::<u32>("missing"), None);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = bounded(10);
        cache.put("a", "text".to_string(), Duration::from_secs(10));

        assert_eq!(cache.get::<u32>("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = bounded(10);
        cache.put("a", 1u8, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get::<u8>("a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get::<u8>("a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let cache = bounded(2);
        cache.put("a", 1u8, Duration::from_secs(60));
        cache.put("b", 2u8, Duration::from_secs(60));

        // a 被讀取後 b 變成最舊
        assert_eq!(cache.get::<u8>("a"), Some(1));
        cache.put("c", 3u8, Duration::from_secs(60));

        assert_eq!(cache.get::<u8>("a"), Some(1));
        assert_eq!(cache.get::<u8>("b"), None);
        assert_eq!(cache.get::<u8>("c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_go_before_live_ones() {
        let cache = bounded(2);
        cache.put("short", 1u8, Duration::from_secs(1));
        cache.put("long", 2u8, Duration::from_secs(100));
        // short is now the most recently used
        assert_eq!(cache.get::<u8>("short"), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.put("new", 3u8, Duration::from_secs(100));

        assert_eq!(cache.get::<u8>("long"), Some(2));
        assert_eq!(cache.get::<u8>("new"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = bounded(20);
        for i in 0..100 {
            cache.put(&format!("key-{}", i), i, Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 20);
        assert_eq!(cache.get::<i32>("key-79"), None);
        assert_eq!(cache.get::<i32>("key-80"), Some(80));
    }

    #[tokio::test]
    async fn test_nothing_is_evicted_below_capacity() {
        let cache = SignalCache::from_settings(&CacheSettings::default());
        let max_entries = CacheSettings::default().max_entries;
        let keys: Vec<String> = (0..max_entries - 1)
            .map(|i| cache_key(AdapterKind::Serp, "example.com", Some(&format!("keyword {}", i))))
            .collect();

        for (i, key) in keys.iter().enumerate() {
            cache.put(key, i, Duration::from_secs(60));
        }

        assert_eq!(cache.len(), max_entries - 1);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(cache.get::<usize>(key), Some(i), "{} was evicted", key);
        }
    }

    #[tokio::test]
    async fn test_get_or_fetch_deduplicates_concurrent_lookups() {
        let cache = Arc::new(bounded(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..5).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_fetch("shared", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        ("value".to_string(), Some(Duration::from_secs(60)))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(lookups).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| v == "value"));
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_fetch_without_ttl_does_not_store() {
        let cache = bounded(10);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: u32 = cache
                .get_or_fetch("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (7, None)
                })
                .await;
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_key_is_stable_and_distinct() {
        let a = cache_key(AdapterKind::Serp, "example.com", Some("seo audit"));
        let b = cache_key(AdapterKind::Serp, "example.com", Some("seo audit"));
        let c = cache_key(AdapterKind::Serp, "example.com", Some("seo tools"));
        let d = cache_key(AdapterKind::Whois, "example.com", Some("seo audit"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with("serp:"));
    }
}
