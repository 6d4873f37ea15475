//! LRU cache of decoded nodes.
//!
//! The cache sits between the tree and its [`PageStore`](crate::store::PageStore)
//! and only ever holds committed node images: it is filled by reads and by
//! transaction commits, never by in-flight mutations. A rolled-back write
//! therefore leaves nothing behind that would need undoing.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::node::Node;
use crate::store::PageId;

/// Write-through node cache. A capacity of zero disables caching.
pub struct NodeCache {
    pages: Option<Mutex<LruCache<PageId, Node>>>,
}

impl NodeCache {
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: NonZeroUsize::new(max_pages).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Returns a copy of the cached node, refreshing its recency.
    pub fn get(&self, page_id: PageId) -> Option<Node> {
        self.pages.as_ref()?.lock().get(&page_id).cloned()
    }

    /// Caches a committed node, evicting the least recently used one if full.
    pub fn put(&self, node: Node) {
        if let Some(pages) = &self.pages {
            pages.lock().put(node.page_id, node);
        }
    }

    /// Drops a page, used when it is freed.
    pub fn remove(&self, page_id: PageId) {
        if let Some(pages) = &self.pages {
            pages.lock().pop(&page_id);
        }
    }

    pub fn clear(&self) {
        if let Some(pages) = &self.pages {
            pages.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.pages.as_ref().map_or(0, |pages| pages.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages
            .as_ref()
            .is_some_and(|pages| pages.lock().contains(&page_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(page_id: PageId) -> Node {
        Node::new(page_id, 0)
    }

    #[test]
    fn test_put_and_get() {
        let cache = NodeCache::new(10);
        cache.put(leaf(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1));
        assert_eq!(cache.get(1), Some(leaf(1)));
        assert_eq!(cache.get(999), None);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = NodeCache::new(3);
        cache.put(leaf(1));
        cache.put(leaf(2));
        cache.put(leaf(3));

        // touching page 1 makes page 2 the oldest
        let _ = cache.get(1);
        cache.put(leaf(4));

        assert!(!cache.contains(2));
        assert!(cache.contains(1));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
    }

    #[test]
    fn test_put_replaces() {
        let cache = NodeCache::new(3);
        cache.put(leaf(1));
        cache.put(Node::new(1, 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1).map(|n| n.level), Some(2));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = NodeCache::new(10);
        cache.put(leaf(1));
        cache.put(leaf(2));
        cache.remove(1);
        assert!(!cache.contains(1));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = NodeCache::new(0);
        cache.put(leaf(1));
        assert!(cache.is_empty());
        assert_eq!(cache.get(1), None);
    }
}
