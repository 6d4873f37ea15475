//! Node I/O and buffered write transactions.
//!
//! [`Pager`] is the only path between the tree and its page store: it decodes
//! pages through the node cache and counts every read and write. A
//! [`PageTransaction`] layers a private overlay on top of it so an insert or
//! delete can touch many pages and still either commit all of them or none.

use std::collections::{HashMap, HashSet};

use crate::constants::METADATA_PAGE_ID;
use crate::errors::{IndexError, IndexResult};
use crate::metadata::IndexMetadata;
use crate::node::{Node, NodeCodec};
use crate::node_cache::NodeCache;
use crate::stats::StatsCounters;
use crate::store::{PageId, PageStore};

/// Cached, counted node access to a page store
pub(crate) struct Pager {
    pub(crate) store: Box<dyn PageStore>,
    pub(crate) codec: NodeCodec,
    pub(crate) cache: NodeCache,
    pub(crate) stats: StatsCounters,
}

impl Pager {
    pub(crate) fn new(store: Box<dyn PageStore>, codec: NodeCodec, cache_pages: usize) -> Self {
        Self {
            store,
            codec,
            cache: NodeCache::new(cache_pages),
            stats: StatsCounters::default(),
        }
    }

    /// Read a node - first checks cache, then decodes the page.
    pub(crate) fn read_node(&self, page_id: PageId) -> IndexResult<Node> {
        if let Some(node) = self.cache.get(page_id) {
            StatsCounters::incr(&self.stats.cache_hits, 1);
            return Ok(node);
        }

        StatsCounters::incr(&self.stats.cache_misses, 1);
        StatsCounters::incr(&self.stats.page_reads, 1);
        let bytes = self.store.read(page_id)?;
        let node = self.codec.decode(page_id, &bytes)?;
        self.cache.put(node.clone());
        Ok(node)
    }

    /// Writes a node page directly, bypassing any transaction.
    pub(crate) fn write_node(&self, node: &Node) -> IndexResult<()> {
        let bytes = self.codec.encode(node)?;
        self.store.write(node.page_id, &bytes)?;
        StatsCounters::incr(&self.stats.page_writes, 1);
        self.cache.put(node.clone());
        Ok(())
    }

    pub(crate) fn write_metadata(&self, meta: &IndexMetadata) -> IndexResult<()> {
        self.store.write(METADATA_PAGE_ID, &meta.encode()?)?;
        StatsCounters::incr(&self.stats.page_writes, 1);
        Ok(())
    }

    pub(crate) fn allocate(&self) -> IndexResult<PageId> {
        let page_id = self.store.allocate()?;
        StatsCounters::incr(&self.stats.pages_allocated, 1);
        Ok(page_id)
    }

    pub(crate) fn free(&self, page_id: PageId) -> IndexResult<()> {
        self.cache.remove(page_id);
        self.store.free(page_id)?;
        StatsCounters::incr(&self.stats.pages_freed, 1);
        Ok(())
    }
}

/// Buffered set of node changes applied as one unit.
///
/// Reads see the transaction's own writes. Allocations go to the store
/// straight away so page ids are real; frees are deferred to commit. A
/// transaction dropped without [`PageTransaction::commit`] rolls back by
/// returning its allocated pages, leaving the committed tree untouched.
pub(crate) struct PageTransaction<'a> {
    pager: &'a Pager,
    dirty: HashMap<PageId, Node>,
    allocated: Vec<PageId>,
    freed: HashSet<PageId>,
    finished: bool,
}

impl<'a> PageTransaction<'a> {
    pub(crate) fn new(pager: &'a Pager) -> Self {
        Self {
            pager,
            dirty: HashMap::new(),
            allocated: Vec::new(),
            freed: HashSet::new(),
            finished: false,
        }
    }

    pub(crate) fn codec(&self) -> &NodeCodec {
        &self.pager.codec
    }

    pub(crate) fn read(&self, page_id: PageId) -> IndexResult<Node> {
        if self.freed.contains(&page_id) {
            return Err(IndexError::PageNotFound(page_id));
        }
        match self.dirty.get(&page_id) {
            Some(node) => Ok(node.clone()),
            None => self.pager.read_node(page_id),
        }
    }

    /// Buffers a new image of `node` for its page.
    pub(crate) fn put(&mut self, node: Node) {
        self.dirty.insert(node.page_id, node);
    }

    pub(crate) fn allocate(&mut self) -> IndexResult<PageId> {
        let page_id = self.pager.allocate()?;
        self.allocated.push(page_id);
        Ok(page_id)
    }

    /// Marks a page for release at commit, dropping any buffered image.
    pub(crate) fn free(&mut self, page_id: PageId) {
        self.dirty.remove(&page_id);
        self.freed.insert(page_id);
    }

    /// Writes every buffered node, then the metadata page, then frees pages.
    ///
    /// Committed pages are never overwritten: each buffered node that lives
    /// on a committed page moves to a fresh page, parents are pointed at the
    /// new ids and `meta.root_id` follows the root. Writing the metadata page
    /// switches to the new tree; until then a failed write leaves the last
    /// committed tree intact and the fresh pages are released on drop. All
    /// nodes are encoded before the first write, so a node that does not fit
    /// its page fails the commit without touching the store.
    pub(crate) fn commit(mut self, meta: &mut IndexMetadata) -> IndexResult<()> {
        let moves = self.relocate()?;
        self.remap(&moves, meta)?;

        let codec = &self.pager.codec;
        let mut encoded = Vec::with_capacity(self.dirty.len());
        for node in self.dirty.values() {
            encoded.push((node.page_id, codec.encode(node)?));
        }
        let meta_bytes = meta.encode()?;

        let store = self.pager.store.as_ref();
        for (page_id, bytes) in &encoded {
            store.write(*page_id, bytes)?;
        }
        store.write(METADATA_PAGE_ID, &meta_bytes)?;
        // from here on the new tree is the committed one
        self.finished = true;
        self.freed.extend(moves.into_keys());

        let stats = &self.pager.stats;
        StatsCounters::incr(&stats.page_writes, encoded.len() as u64 + 1);
        for (_, node) in self.dirty.drain() {
            self.pager.cache.put(node);
        }
        for page_id in self.freed.drain() {
            // the new tree no longer references the page; a failed free only leaks it
            if let Err(e) = self.pager.free(page_id) {
                log::warn!("Failed to free page {} after commit: {}", page_id, e);
            }
        }

        log::trace!(
            "Committed {} pages ({} allocated)",
            encoded.len(),
            self.allocated.len()
        );
        Ok(())
    }

    /// Moves buffered nodes off committed pages. Returns old id -> new id.
    fn relocate(&mut self) -> IndexResult<HashMap<PageId, PageId>> {
        let fresh: HashSet<PageId> = self.allocated.iter().copied().collect();
        let stale: Vec<PageId> = self
            .dirty
            .keys()
            .copied()
            .filter(|page_id| !fresh.contains(page_id))
            .collect();

        let mut moves = HashMap::with_capacity(stale.len());
        for old_id in stale {
            let new_id = self.allocate()?;
            if let Some(mut node) = self.dirty.remove(&old_id) {
                node.page_id = new_id;
                self.dirty.insert(new_id, node);
            }
            moves.insert(old_id, new_id);
        }
        Ok(moves)
    }

    /// Rewrites child pointers and the root id after [`Self::relocate`].
    ///
    /// Every moved page must be the root or be referenced by another buffered
    /// node; otherwise an unchanged parent would keep pointing at the old page.
    fn remap(&mut self, moves: &HashMap<PageId, PageId>, meta: &mut IndexMetadata) -> IndexResult<()> {
        if moves.is_empty() {
            return Ok(());
        }
        let mut unresolved: HashSet<PageId> = moves.keys().copied().collect();
        if let Some(&new_root) = moves.get(&meta.root_id) {
            unresolved.remove(&meta.root_id);
            meta.root_id = new_root;
        }
        for node in self.dirty.values_mut().filter(|node| !node.is_leaf()) {
            for entry in &mut node.entries {
                if let Some(&new_id) = moves.get(&entry.payload) {
                    unresolved.remove(&entry.payload);
                    entry.payload = new_id;
                }
            }
        }
        match unresolved.into_iter().next() {
            Some(page_id) => Err(IndexError::CorruptPage {
                page_id,
                reason: "changed page is not referenced by a changed parent".into(),
            }),
            None => Ok(()),
        }
    }

    /// Returns allocated pages to the store and discards buffered writes.
    pub(crate) fn rollback(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.allocated.is_empty() {
            log::debug!(
                "Rolling back transaction, releasing {} allocated pages",
                self.allocated.len()
            );
        }
        for page_id in self.allocated.drain(..) {
            if let Err(e) = self.pager.free(page_id) {
                log::warn!("Failed to release page {} on rollback: {}", page_id, e);
            }
        }
        self.dirty.clear();
    }
}

impl Drop for PageTransaction<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
