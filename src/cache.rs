//! Memoization of partial composites.
//!
//! Each entry holds the composite of a stack, from its bottom layer up to and including one
//! layer, over one tile.  The key's `version` is a hash which chains together that layer's
//! parameters and revision with those of everything beneath it, so any edit below a layer makes
//! its old entries unreachable.  Stale entries are also dropped eagerly through
//! [`Cache::invalidate_layers`] so that they don't hold on to memory.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::{buffer::PixelBuffer, layer::LayerId, utils::Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub layer: LayerId,
    pub version: u64,
    pub region: Rect<i32>,
}

#[derive(Debug)]
struct Entry {
    buffer: PixelBuffer,
    last_used: AtomicU64,
}

/// Snapshot of how well the cache is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

/// A thread-safe LRU cache of [`PixelBuffer`]s with a memory budget.  All operations take
/// `&self`, so render workers can share one cache.
#[derive(Debug)]
pub struct Cache {
    entries: DashMap<CacheKey, Entry>,
    budget: usize,
    bytes: AtomicUsize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            budget: budget_bytes,
            bytes: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_budget_mb(mb: usize) -> Self {
        Self::new(mb.saturating_mul(1024 * 1024))
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &CacheKey) -> Option<PixelBuffer> {
        match self.entries.get(key) {
            Some(entry) => {
                entry.last_used.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.buffer.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Looks up an entry without counting a hit or miss, or refreshing it
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether any entry, of any version or region, belongs to `layer`
    pub fn contains_layer(&self, layer: LayerId) -> bool {
        self.entries.iter().any(|entry| entry.key().layer == layer)
    }

    /// Stores a buffer, evicting the least recently used entries if that takes the cache over
    /// budget.  Buffers bigger than the whole budget aren't stored at all.
    pub fn insert(&self, key: CacheKey, buffer: PixelBuffer) {
        let size = buffer.byte_size();
        if size > self.budget {
            return;
        }
        let entry = Entry {
            buffer,
            last_used: AtomicU64::new(self.tick()),
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.bytes.fetch_sub(old.buffer.byte_size(), Ordering::Relaxed);
        }
        self.bytes.fetch_add(size, Ordering::Relaxed);
        self.evict_to_budget();
    }

    fn evict_to_budget(&self) {
        while self.bytes.load(Ordering::Relaxed) > self.budget {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().last_used.load(Ordering::Relaxed))
                .map(|e| *e.key());
            match oldest.and_then(|key| self.entries.remove(&key)) {
                Some((key, entry)) => {
                    log::trace!("Evicting {:?} from cache", key);
                    self.bytes.fetch_sub(entry.buffer.byte_size(), Ordering::Relaxed);
                }
                // Raced with another eviction; re-check the budget
                None if !self.entries.is_empty() => continue,
                None => break,
            }
        }
    }

    /// Drops every entry belonging to any of `layers`
    pub fn invalidate_layers(&self, layers: &[LayerId]) {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = !layers.contains(&key.layer);
            if !keep {
                self.bytes.fetch_sub(entry.buffer.byte_size(), Ordering::Relaxed);
            }
            keep
        });
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            log::debug!("Invalidated {} cache entries for {:?}", dropped, layers);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.bytes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            bytes: self.bytes_used(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;

    fn key(layer: usize, version: u64) -> CacheKey {
        CacheKey {
            layer: LayerId::from_usize(layer),
            version,
            region: Rect::from_origin(4, 4),
        }
    }

    fn tile() -> PixelBuffer {
        PixelBuffer::new(4, 4, PixelFormat::Rgba8).unwrap()
    }

    #[test]
    fn hits_and_misses_are_counted() {
        let cache = Cache::new(1 << 20);
        assert!(cache.get(&key(0, 1)).is_none());
        cache.insert(key(0, 1), tile());
        assert!(cache.get(&key(0, 1)).is_some());
        assert!(cache.get(&key(0, 2)).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 2, 1));
        assert_eq!(stats.bytes, tile().byte_size());
    }

    #[test]
    fn invalidation_is_per_layer() {
        let cache = Cache::new(1 << 20);
        for (layer, version) in [(0, 1), (0, 2), (1, 1), (2, 1)] {
            cache.insert(key(layer, version), tile());
        }
        cache.invalidate_layers(&[LayerId::from_usize(0), LayerId::from_usize(2)]);
        assert!(!cache.contains_layer(LayerId::from_usize(0)));
        assert!(!cache.contains_layer(LayerId::from_usize(2)));
        assert!(cache.contains_layer(LayerId::from_usize(1)));
        assert_eq!(cache.bytes_used(), tile().byte_size());
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let size = tile().byte_size();
        let cache = Cache::new(size * 2);
        cache.insert(key(0, 0), tile());
        cache.insert(key(1, 0), tile());
        cache.get(&key(0, 0)); // Now key 1 is the oldest
        cache.insert(key(2, 0), tile());
        assert!(cache.contains(&key(0, 0)));
        assert!(!cache.contains(&key(1, 0)));
        assert!(cache.contains(&key(2, 0)));
        assert!(cache.bytes_used() <= cache.budget());
    }

    #[test]
    fn oversized_buffers_are_not_cached() {
        let cache = Cache::new(8);
        cache.insert(key(0, 0), tile());
        assert!(cache.is_empty());
        assert_eq!(cache.bytes_used(), 0);
    }

    #[test]
    fn invalidation_drops_only_named_layers() {
        let cache = Cache::new(1 << 20);
        for l in 0..3 {
            cache.insert(key(l, 7), tile());
        }
        cache.invalidate_layers(&[LayerId::from_usize(0), LayerId::from_usize(2)]);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(1, 7)));
        assert_eq!(cache.bytes_used(), tile().byte_size());
    }
}
