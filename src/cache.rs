//! Single-flight TTL cache
//!
//! Each key owns an async mutex slot. The first caller for a missing or
//! expired key computes the value while holding the slot; concurrent callers
//! for the same key wait on the slot and then read what was stored. Failed
//! computations store nothing, so the next waiter retries; a failed slot
//! nobody is waiting on is removed.
//!
//! Expired and empty slots are swept by [`SingleFlightCache::evict_expired`],
//! which also runs every `sweep_every` lookups when configured.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

type Slot<V> = Arc<Mutex<Option<CachedEntry<V>>>>;

/// A cached value with TTL metadata
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
    ttl: Duration,
}

impl<V> CachedEntry<V> {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Keyed get-or-compute cache with per-entry TTL
pub struct SingleFlightCache<K, V> {
    slots: DashMap<K, Slot<V>>,
    stats: CacheStats,
    sweep_every: u64,
    lookups: AtomicU64,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            stats: CacheStats::default(),
            sweep_every: 0,
            lookups: AtomicU64::new(0),
        }
    }

    /// Create a cache that sweeps expired and empty slots every
    /// `sweep_every` lookups (`0` disables the sweep).
    #[must_use]
    pub fn with_sweep_every(sweep_every: u64) -> Self {
        Self {
            sweep_every,
            ..Self::new()
        }
    }

    /// Return the live value for `key`, or run `init` to produce one.
    ///
    /// `init` yields the value together with its TTL. At most one `init` runs
    /// per key at a time; errors are returned to the caller that ran it and
    /// are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration), E>>,
    {
        if self.sweep_every > 0 {
            let lookup = self.lookups.fetch_add(1, Ordering::Relaxed) + 1;
            if lookup % self.sweep_every == 0 {
                self.evict_expired();
            }
        }

        let slot = Arc::clone(&self.slots.entry(key.clone()).or_default());
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if !entry.is_expired() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            *guard = None;
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let (value, ttl) = match init().await {
            Ok(computed) => computed,
            Err(e) => {
                drop(guard);
                // Remove only when no waiter holds the slot
                self.slots.remove_if(key, |_, held| {
                    Arc::ptr_eq(held, &slot) && Arc::strong_count(held) == 2
                });
                return Err(e);
            }
        };
        *guard = Some(CachedEntry {
            value: value.clone(),
            cached_at: Instant::now(),
            ttl,
        });
        Ok(value)
    }

    /// Live value for `key` without waiting.
    ///
    /// Returns `None` when absent, expired, or currently being computed.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let guard = slot.try_lock().ok()?;
        guard
            .as_ref()
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    /// Drop the entry for `key` unconditionally
    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    /// Remove expired and empty slots.
    ///
    /// Slots that a caller holds or is computing are skipped. Returns the
    /// number of expired entries evicted.
    pub fn evict_expired(&self) -> usize {
        let mut evicted = 0;
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            match guard.as_ref() {
                Some(entry) if !entry.is_expired() => true,
                Some(_) => {
                    evicted += 1;
                    false
                }
                None => false,
            }
        });

        if evicted > 0 {
            self.stats
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Number of slots (including ones being computed)
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache holds no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.slots.len(),
            hit_rate: CacheStats::hit_rate(hits, misses),
        }
    }
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn test_cache_hit_after_insert() {
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();

        let first = cache
            .get_or_try_insert_with(&key("alice"), || async {
                Ok::<_, ()>((7, Duration::from_secs(60)))
            })
            .await;
        let second = cache
            .get_or_try_insert_with(&key("alice"), || async {
                Ok::<_, ()>((99, Duration::from_secs(60)))
            })
            .await;

        assert_eq!(first, Ok(7));
        assert_eq!(second, Ok(7));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        // GIVEN: a slow initializer that counts its invocations
        let cache: Arc<SingleFlightCache<String, u32>> = Arc::new(SingleFlightCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        // WHEN: ten tasks ask for the same key at once
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_try_insert_with(&key("alice"), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, ()>((1, Duration::from_secs(60)))
                        })
                        .await
                })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;

        // THEN: exactly one computation ran and everyone got its value
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.into_iter().all(|r| r.unwrap() == Ok(1)));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();

        let failed = cache
            .get_or_try_insert_with(&key("bob"), || async { Err::<(u32, Duration), _>("down") })
            .await;
        assert_eq!(failed, Err("down"));
        assert_eq!(cache.peek(&key("bob")), None);
        assert!(cache.is_empty());

        let recovered = cache
            .get_or_try_insert_with(&key("bob"), || async {
                Ok::<_, &str>((3, Duration::from_secs(60)))
            })
            .await;
        assert_eq!(recovered, Ok(3));
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();
        cache
            .get_or_try_insert_with(&key("k"), || async {
                Ok::<_, ()>((1, Duration::from_millis(1)))
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let value = cache
            .get_or_try_insert_with(&key("k"), || async {
                Ok::<_, ()>((2, Duration::from_secs(60)))
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();
        cache
            .get_or_try_insert_with(&key("k"), || async { Ok::<_, ()>((1, Duration::from_secs(60))) })
            .await
            .unwrap();

        cache.invalidate(&key("k"));
        assert!(cache.is_empty());

        let value = cache
            .get_or_try_insert_with(&key("k"), || async { Ok::<_, ()>((2, Duration::from_secs(60))) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_evict_expired_keeps_live_entries() {
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();
        cache
            .get_or_try_insert_with(&key("short"), || async {
                Ok::<_, ()>((1, Duration::from_millis(1)))
            })
            .await
            .unwrap();
        cache
            .get_or_try_insert_with(&key("long"), || async {
                Ok::<_, ()>((2, Duration::from_secs(60)))
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.evict_expired();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&key("long")), Some(2));
    }

    #[tokio::test]
    async fn test_failed_keys_do_not_accumulate() {
        // GIVEN: many distinct keys whose computation fails
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();
        for i in 0..200 {
            let result = cache
                .get_or_try_insert_with(&format!("p{i}"), || async {
                    Err::<(u32, Duration), _>("down")
                })
                .await;
            assert!(result.is_err());
        }

        // THEN: no slots are left behind
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_slot_for_waiters() {
        // GIVEN: a failing computation with a second caller queued behind it
        let cache: Arc<SingleFlightCache<String, u32>> = Arc::new(SingleFlightCache::new());
        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_try_insert_with(&key("k"), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<(u32, Duration), _>("down")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // WHEN: the waiter retries after the failure
        let second = cache
            .get_or_try_insert_with(&key("k"), || async { Ok::<_, &str>((5, Duration::from_secs(60))) })
            .await;

        // THEN: the waiter's value is cached in the surviving slot
        assert_eq!(first.await.unwrap(), Err("down"));
        assert_eq!(second, Ok(5));
        assert_eq!(cache.peek(&key("k")), Some(5));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_expired_drops_empty_slots() {
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::new();
        cache.slots.insert(key("empty"), Slot::default());
        cache
            .get_or_try_insert_with(&key("live"), || async {
                Ok::<_, ()>((1, Duration::from_secs(60)))
            })
            .await
            .unwrap();

        assert_eq!(cache.evict_expired(), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&key("live")), Some(1));
    }

    #[tokio::test]
    async fn test_periodic_sweep_removes_expired_entries() {
        // GIVEN: a cache sweeping every 4 lookups with three short-lived keys
        let cache: SingleFlightCache<String, u32> = SingleFlightCache::with_sweep_every(4);
        for name in ["a", "b", "c"] {
            cache
                .get_or_try_insert_with(&key(name), || async {
                    Ok::<_, ()>((1, Duration::from_millis(1)))
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.len(), 3);

        // WHEN: the fourth lookup triggers the sweep
        cache
            .get_or_try_insert_with(&key("d"), || async {
                Ok::<_, ()>((2, Duration::from_secs(60)))
            })
            .await
            .unwrap();

        // THEN: only the fresh entry remains
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 3);
    }
}
