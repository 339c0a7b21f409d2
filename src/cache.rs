//! TTL cache for upstream API responses.
//!
//! Each key owns a slot guarded by an async mutex. A caller holding the slot
//! is the only one fetching; concurrent callers for the same key wait on the
//! slot and then read the value it stored, so a burst of requests for an
//! uncached key produces exactly one upstream call.

use dashmap::DashMap;
use prometheus::IntCounter;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    /// Completion time of the fetch that produced `value`.
    fetched_at: Instant,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

/// Memoizes fetch results per key for a caller-supplied TTL.
pub struct TtlCache<K, V> {
    slots: DashMap<K, Slot<V>>,
    hits: Option<IntCounter>,
    misses: Option<IntCounter>,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
            hits: None,
            misses: None,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache that reports hits and misses to the given counters.
    pub fn with_counters(hits: IntCounter, misses: IntCounter) -> Self {
        Self {
            slots: DashMap::new(),
            hits: Some(hits),
            misses: Some(misses),
        }
    }

    /// Returns the cached value if younger than `ttl`, otherwise runs `fetch`.
    ///
    /// Errors are returned to the caller and never cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Clone the slot handle so the map shard is not locked across the await.
        let slot: Slot<V> = Arc::clone(self.slots.entry(key).or_default().value());
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < ttl {
                if let Some(hits) = &self.hits {
                    hits.inc();
                }
                return Ok(entry.value.clone());
            }
        }

        if let Some(misses) = &self.misses {
            misses.inc();
        }
        let value = fetch().await?;
        *guard = Some(Entry {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    /// Returns the cached value regardless of age, if any and not currently being refreshed.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key)?;
        let guard = slot.try_lock().ok()?;
        guard.as_ref().map(|e| e.value.clone())
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
