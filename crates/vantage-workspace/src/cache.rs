//! Bounded result cache with LRU eviction and TTL expiry.
//!
//! Holds discovery results so repeated listings do not rescan the root.
//! Expired entries are dropped lazily on read and eagerly by
//! [`ResultCache::prune_expired`], which the owning context calls on an
//! interval.

use crate::discovery::{ProjectSummary, SessionSummary};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached discovery result.
#[derive(Debug, Clone)]
pub enum CachedListing {
    /// Projects under the workspace root
    Projects(Arc<Vec<ProjectSummary>>),
    /// Sessions inside one project
    Sessions(Arc<Vec<SessionSummary>>),
}

struct CacheEntry {
    value: CachedListing,
    inserted_at: Instant,
}

/// Hit/miss counters for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate between 0.0 and 1.0
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fixed-capacity LRU cache of discovery results.
pub struct ResultCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` entries, each valid for `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live entry, promoting it to most recently used.
    pub fn get(&self, key: &str) -> Option<CachedListing> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace an entry.
    pub fn put(&self, key: impl Into<String>, value: CachedListing) {
        let key = key.into();
        let mut entries = self.entries.lock();
        let displaced = entries.push(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );

        if let Some((evicted, _)) = displaced.filter(|(k, _)| *k != key) {
            debug!(key = %evicted, "Evicted cache entry");
        }
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().pop(key);
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();

        let to_remove: Vec<_> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &to_remove {
            entries.pop(key);
        }

        to_remove.len()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn prune_expired(&self) -> usize {
        let mut entries = self.entries.lock();

        let expired: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Pruned expired cache entries");
        }

        expired.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
