//! # Snapshot Cache
//!
//! Small TTL cache in front of leaderboard reads. Entries are invalidated
//! explicitly on every board change and passively on expiry.
//!
//! Staleness is bounded by the TTL; the store is the source of truth.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Expired entries are swept every this many inserts.
pub const CLEANUP_INTERVAL: u64 = 100;

/// One cached value.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    /// Cached value.
    pub value: V,
    /// Instant after which the entry is dead.
    pub expires_at: Instant,
    /// Insert time.
    pub created_at: Instant,
    /// Last successful read.
    pub last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Counters since creation or the last [`Cache::clear`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that missed or found an expired entry.
    pub misses: u64,
    /// Inserts.
    pub sets: u64,
    /// Entries removed by expiry or invalidation.
    pub evictions: u64,
    /// Live entries.
    pub size: usize,
}

impl CacheStats {
    /// Fraction of reads served from the cache.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            self.hits as f64 / reads as f64
        }
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// Keyed TTL cache.
pub struct Cache<V> {
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> Cache<V> {
    /// Creates an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Default entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value under `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Inner { entries, stats } = &mut *inner;

        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.last_accessed = now;
                stats.hits += 1;
                debug!(key, "Cache hit");
                return Some(entry.value.clone());
            }
        } else {
            stats.misses += 1;
            debug!(key, "Cache miss");
            return None;
        }

        entries.remove(key);
        stats.evictions += 1;
        stats.misses += 1;
        debug!(key, "Cache entry expired");
        None
    }

    /// Stores `value` with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    /// Stores `value` for `ttl`.
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                created_at: now,
                last_accessed: now,
            },
        );
        inner.stats.sets += 1;
        if inner.stats.sets % CLEANUP_INTERVAL == 0 {
            sweep(&mut *inner, now);
        }
    }

    /// Drops `key`. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.stats.evictions += 1;
        }
        removed
    }

    /// Drops every key starting with `prefix`. Returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();
        inner.stats.evictions += removed as u64;
        if removed > 0 {
            debug!(prefix, removed, "Cache prefix invalidated");
        }
        removed
    }

    /// Sweeps expired entries now. Returns how many went.
    pub fn cleanup(&self) -> usize {
        sweep(&mut *self.inner.lock(), Instant::now())
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.stats = CacheStats::default();
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }
}

fn sweep<V>(inner: &mut Inner<V>, now: Instant) -> usize {
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before - inner.entries.len();
    inner.stats.evictions += removed as u64;
    removed
}
