//! In-memory LRU image cache with cost and count limits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::domain::entities::{CacheEntry, CacheKey, DecodedImage};
use crate::domain::ports::MemoryCachePort;

/// Signal that the process is short on memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWarning;

struct MemoryState {
    entries: LruCache<CacheKey, CacheEntry>,
    total_cost: u64,
    cost_limit: u64,
    count_limit: usize,
}

impl MemoryState {
    fn over_limit(&self) -> bool {
        (self.cost_limit > 0 && self.total_cost > self.cost_limit)
            || (self.count_limit > 0 && self.entries.len() > self.count_limit)
    }
}

/// In-memory LRU cache for decoded images.
///
/// Thread-safe; every operation holds the lock for O(1) amortized work.
/// Limits of zero mean unlimited.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache with the given cost and count limits.
    #[must_use]
    pub fn new(cost_limit: u64, count_limit: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                total_cost: 0,
                cost_limit,
                count_limit,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
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
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
            total_cost: state.total_cost,
        }
    }

    /// Returns a snapshot of the entry for `key` without promoting it.
    #[must_use]
    pub fn peek_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().entries.peek(key).cloned()
    }

    /// Clears the cache on every warning received from `warnings`.
    ///
    /// The task ends when the channel closes or the cache is dropped.
    pub fn watch_memory_pressure(
        self: &Arc<Self>,
        mut warnings: broadcast::Receiver<MemoryWarning>,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match warnings.recv().await {
                    Ok(MemoryWarning) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        debug!(entries = cache.len(), "Memory warning, clearing memory cache");
                        cache.remove_all();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCache")
            .field("len", &state.entries.len())
            .field("total_cost", &state.total_cost)
            .field("cost_limit", &state.cost_limit)
            .field("count_limit", &state.count_limit)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl MemoryCachePort for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_accessed_at = Utc::now();
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            entry.image.clone()
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn put(&self, key: CacheKey, image: Arc<DecodedImage>, cost: u64) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            image: Some(image),
            raw_bytes: None,
            size_in_bytes: cost,
            inserted_at: now,
            last_accessed_at: now,
        };

        let mut state = self.state.lock();
        if let Some(old) = state.entries.put(key.clone(), entry) {
            state.total_cost = state.total_cost.saturating_sub(old.size_in_bytes);
        }
        state.total_cost += cost;
        trace!(key = %key, cost, total = state.total_cost, "Stored image in memory cache");

        // The entry just inserted is most recent, so it is never the one popped.
        while state.entries.len() > 1 && state.over_limit() {
            let Some((evicted, old)) = state.entries.pop_lru() else {
                break;
            };
            state.total_cost = state.total_cost.saturating_sub(old.size_in_bytes);
            debug!(key = %evicted, cost = old.size_in_bytes, "Evicted image from memory cache");
        }
    }

    fn remove(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(old) = state.entries.pop(key) {
            state.total_cost = state.total_cost.saturating_sub(old.size_in_bytes);
            debug!(key = %key, "Removed image from memory cache");
        }
    }

    fn remove_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    fn set_count_limit(&self, limit: usize) {
        self.state.lock().count_limit = limit;
    }

    fn set_cost_limit(&self, limit: u64) {
        self.state.lock().cost_limit = limit;
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn total_cost(&self) -> u64 {
        self.state.lock().total_cost
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
    /// Summed cost of cached images.
    pub total_cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} cost), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}
