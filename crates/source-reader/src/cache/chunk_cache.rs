//! LRU cache for decoded source blocks (COG tiles and Zarr chunks).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache key: (hash of source and level/slice, block x, block y).
pub type BlockKey = (u64, usize, usize);

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache of decoded blocks with memory-bounded eviction.
pub struct BlockCache {
    cache: LruCache<BlockKey, Arc<Vec<f32>>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    /// Create a cache holding at most `memory_limit` bytes of samples.
    pub fn new(memory_limit: usize) -> Self {
        // Entry cap only guards the LRU bookkeeping; memory is the real bound.
        let block_size_estimate = 256 * 256 * 4;
        let max_entries = (memory_limit / block_size_estimate).max(16);

        Self {
            cache: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&mut self, key: &BlockKey) -> Option<Arc<Vec<f32>>> {
        match self.cache.get(key) {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.cache.contains(key)
    }

    /// Insert a block, evicting least recently used ones to make room.
    /// Blocks larger than the whole budget are not cached.
    pub fn insert(&mut self, key: BlockKey, data: Arc<Vec<f32>>) {
        let data_size = data.len() * std::mem::size_of::<f32>();
        if data_size > self.memory_limit {
            return;
        }

        if let Some(old) = self.cache.pop(&key) {
            self.current_memory = self
                .current_memory
                .saturating_sub(old.len() * std::mem::size_of::<f32>());
        }

        while self.current_memory + data_size > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                let evicted_size = evicted.len() * std::mem::size_of::<f32>();
                self.current_memory = self.current_memory.saturating_sub(evicted_size);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        // The key was popped above, so anything pushed out here hit the entry cap.
        if let Some((_, evicted)) = self.cache.push(key, data) {
            self.current_memory = self
                .current_memory
                .saturating_sub(evicted.len() * std::mem::size_of::<f32>());
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.current_memory += data_size;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Stable hash of a source identifier, used as the first key component.
pub fn hash_path(path: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}
