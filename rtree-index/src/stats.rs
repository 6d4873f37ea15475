use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of index shape and I/O counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub entry_count: u64,
    pub height: u32,
    pub dimension: u32,
    pub capacity: u32,
    pub min_entries: u32,
    pub page_size: u32,
    /// Live pages in the store, metadata page included
    pub page_count: u64,
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub page_reads: u64,
    pub page_writes: u64,
    pub pages_allocated: u64,
    pub pages_freed: u64,
}

impl IndexStats {
    /// Fraction of node reads served from the cache, 0 before any read.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Internal statistics tracking
#[derive(Default)]
pub(crate) struct StatsCounters {
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) page_reads: AtomicU64,
    pub(crate) page_writes: AtomicU64,
    pub(crate) pages_allocated: AtomicU64,
    pub(crate) pages_freed: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Copies the counters into `stats`, leaving the shape fields untouched.
    pub(crate) fn fill(&self, stats: &mut IndexStats) {
        stats.cache_hits = self.cache_hits.load(Ordering::Relaxed);
        stats.cache_misses = self.cache_misses.load(Ordering::Relaxed);
        stats.page_reads = self.page_reads.load(Ordering::Relaxed);
        stats.page_writes = self.page_writes.load(Ordering::Relaxed);
        stats.pages_allocated = self.pages_allocated.load(Ordering::Relaxed);
        stats.pages_freed = self.pages_freed.load(Ordering::Relaxed);
    }
}
