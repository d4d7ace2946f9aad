//! In-memory image cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CachedImage};

/// In-memory cache of image bytes keyed by [`CacheKey`].
///
/// Unbounded unless constructed with a capacity, in which case the least
/// recently used entry is dropped first. All operations are synchronous and
/// hold the lock only for the map access.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<CacheKey, CachedImage>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates an unbounded cache.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::from_lru(LruCache::unbounded())
    }

    /// Creates a cache holding at most `capacity` images.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self::from_lru(LruCache::new(cap))
    }

    /// Creates a cache from an optional bound.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        capacity.map_or_else(Self::unbounded, Self::with_capacity)
    }

    fn from_lru(cache: LruCache<CacheKey, CachedImage>) -> Self {
        Self {
            cache: Mutex::new(cache),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up an image, marking it recently used and counting the hit or miss.
    pub fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let found = self.cache.lock().get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    /// Looks up an image without touching recency or statistics.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedImage> {
        self.cache.lock().peek(key).cloned()
    }

    /// Returns true if the key is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.lock().contains(key)
    }

    /// Stores an image, replacing any previous entry for its key.
    pub fn put(&self, image: CachedImage) {
        let key = image.key().clone();
        debug!(key = %key, size = image.len(), "Storing image in memory cache");
        self.cache.lock().put(key, image);
    }

    /// Removes an image.
    pub fn remove(&self, key: &CacheKey) -> Option<CachedImage> {
        let removed = self.cache.lock().pop(key);
        if removed.is_some() {
            debug!(key = %key, "Removed image from memory cache");
        }
        removed
    }

    /// Drops every cached image.
    pub fn clear(&self) {
        self.cache.lock().clear();
        debug!("Cleared memory image cache");
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}
