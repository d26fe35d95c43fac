//! TTL cache over a concurrent map.
//!
//! Entries expire independently; an expired entry is never returned and is
//! dropped on the access that finds it.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A cached value and the instant it stops being visible.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe TTL cache with bounded size.
///
/// When the cache is over capacity the entry nearest to expiry is evicted.
/// A disabled cache behaves as an empty cache: every `get` misses and `set`
/// is a no-op.
pub struct TtlCache<V> {
    map: DashMap<String, CacheEntry<V>>,
    max_entries: usize,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `max_entries` values.
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: DashMap::new(),
            max_entries: max_entries.max(1),
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        let mut cache = Self::new(1);
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get a live value for `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now = Instant::now();
        // The shard guard is released before any removal below
        let found = self
            .map
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
        match found {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                if self.map.remove_if(key, |_, entry| entry.is_expired(now)).is_some() {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Cache entry expired: {}", key);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        self.map.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );

        if self.map.len() > self.max_entries {
            self.purge_expired_at(now);
        }
        while self.map.len() > self.max_entries {
            let victim = self
                .map
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            match victim {
                Some(k) => {
                    if self.map.remove(&k).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        log::debug!("Evicted cache entry: {}", k);
                    }
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.map.remove(key).map(|(_, entry)| entry.value)
    }

    /// Number of stored entries, including ones that expired but were not yet purged.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let removed = self.purge_expired_at(Instant::now());
        if removed > 0 {
            log::debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            let live = !entry.is_expired(now);
            if !live {
                removed += 1;
            }
            live
        });
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Purge expired entries every `interval` until the cache is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }
}
