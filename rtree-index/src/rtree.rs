//! Paged R-tree implementation.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use crate::config::{IndexConfig, IndexOptions, OpenMode};
use crate::constants::METADATA_PAGE_ID;
use crate::errors::{IndexError, IndexResult};
use crate::metadata::IndexMetadata;
use crate::node::{quadratic_split, Entry, Node, NodeCodec};
use crate::region::Region;
use crate::stats::IndexStats;
use crate::store::{FilePageStore, MemoryPageStore, PageId, PageStore};
use crate::transaction::{PageTransaction, Pager};

/// A paged R-tree over axis-aligned regions keyed by `u64` ids.
///
/// Every node lives in one page of a [`PageStore`]. Writers are serialized
/// and run inside a page transaction, so a failed insert or delete leaves
/// the last committed tree in place. Queries share a read lock and may run
/// concurrently with each other.
///
/// Cloning is cheap and yields another handle to the same index.
///
/// # Examples
///
/// ```rust
/// use rtree_index::{IndexConfig, Region, RTree};
///
/// let tree = RTree::memory(IndexConfig::default()).unwrap();
/// tree.insert(1, &Region::from_slices(&[0.0, 0.0], &[1.0, 1.0]).unwrap()).unwrap();
/// tree.insert(2, &Region::from_slices(&[5.0, 5.0], &[6.0, 6.0]).unwrap()).unwrap();
///
/// let window = Region::from_slices(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
/// assert_eq!(tree.intersection(&window).unwrap(), vec![1]);
///
/// let target = Region::point(&[4.0, 4.0]).unwrap();
/// assert_eq!(tree.nearest(1, &target).unwrap(), vec![2]);
/// ```
#[derive(Clone)]
pub struct RTree {
    pub(crate) inner: Arc<RTreeInner>,
}

pub(crate) struct RTreeInner {
    pub(crate) pager: Pager,
    pub(crate) options: IndexOptions,
    pub(crate) state: RwLock<TreeState>,
}

pub(crate) struct TreeState {
    pub(crate) meta: IndexMetadata,
    pub(crate) closed: bool,
}

impl TreeState {
    pub(crate) fn check_open(&self) -> IndexResult<()> {
        if self.closed {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }
}

impl RTree {
    /// Creates an empty index in a fresh store.
    ///
    /// The root starts as an empty leaf. `config.page_size` must match the
    /// store's page size.
    pub fn create<S: PageStore + 'static>(store: S, config: IndexConfig) -> IndexResult<Self> {
        config.validate()?;
        if store.page_size() != config.page_size {
            return Err(IndexError::InvalidConfig(format!(
                "store pages are {} bytes but the index was configured for {}",
                store.page_size(),
                config.page_size
            )));
        }
        let codec = NodeCodec::new(config.page_size, config.dimension, config.fill_factor)?;

        let meta_page = store.allocate()?;
        if meta_page != METADATA_PAGE_ID {
            return Err(IndexError::InvalidConfig(format!(
                "store is not empty (first free page is {})",
                meta_page
            )));
        }

        let pager = Pager::new(Box::new(store), codec, config.options.cache_pages);
        let root_id = pager.allocate()?;
        pager.write_node(&Node::new(root_id, 0))?;
        let meta = IndexMetadata::new(&pager.codec, root_id);
        pager.write_metadata(&meta)?;
        pager.store.sync()?;

        log::debug!(
            "Created index: dimension {}, page size {}, capacity {}, min entries {}",
            meta.dimension,
            meta.page_size,
            meta.capacity,
            meta.min_entries
        );
        Ok(Self::from_parts(pager, config.options, meta))
    }

    /// Opens an index previously created in `store`.
    ///
    /// Only the metadata page is read. Fails with
    /// [`IndexError::CorruptMetadata`] if it is missing or malformed.
    pub fn open<S: PageStore + 'static>(store: S, options: IndexOptions) -> IndexResult<Self> {
        let bytes = store.read(METADATA_PAGE_ID).map_err(|e| {
            IndexError::CorruptMetadata(format!("metadata page unreadable: {}", e))
        })?;
        let meta = IndexMetadata::decode(&bytes)?;
        if meta.page_size != store.page_size() {
            return Err(IndexError::CorruptMetadata(format!(
                "metadata records {}-byte pages but the store uses {}",
                meta.page_size,
                store.page_size()
            )));
        }
        let codec =
            NodeCodec::with_limits(meta.page_size, meta.dimension, meta.capacity, meta.min_entries)
                .map_err(|e| IndexError::CorruptMetadata(e.to_string()))?;

        log::debug!(
            "Opened index: {} entries, height {}, dimension {}",
            meta.entry_count,
            meta.height,
            meta.dimension
        );
        let pager = Pager::new(Box::new(store), codec, options.cache_pages);
        Ok(Self::from_parts(pager, options, meta))
    }

    /// Creates a memory-backed index.
    pub fn memory(config: IndexConfig) -> IndexResult<Self> {
        let store = MemoryPageStore::new(config.page_size);
        Self::create(store, config)
    }

    /// Creates a file-backed index at `path`, truncating any existing file.
    pub fn create_file(path: impl AsRef<Path>, config: IndexConfig) -> IndexResult<Self> {
        config.validate()?;
        let store = FilePageStore::create(path.as_ref(), config.page_size)?;
        Self::create(store, config)
    }

    /// Opens the file-backed index at `path`.
    pub fn open_file(path: impl AsRef<Path>, options: IndexOptions) -> IndexResult<Self> {
        let store = FilePageStore::open(path.as_ref())?;
        Self::open(store, options)
    }

    /// Opens, creates or re-creates a file-backed index according to `mode`.
    ///
    /// An opened index keeps its stored page size and dimension; `config`
    /// only contributes its runtime options.
    pub fn with_mode(
        path: impl AsRef<Path>,
        config: IndexConfig,
        mode: OpenMode,
    ) -> IndexResult<Self> {
        let path = path.as_ref();
        match mode {
            OpenMode::Create => Self::create_file(path, config),
            OpenMode::Open => Self::open_file(path, config.options),
            OpenMode::OpenOrCreate if path.exists() => Self::open_file(path, config.options),
            OpenMode::OpenOrCreate => Self::create_file(path, config),
        }
    }

    fn from_parts(pager: Pager, options: IndexOptions, meta: IndexMetadata) -> Self {
        Self {
            inner: Arc::new(RTreeInner {
                pager,
                options,
                state: RwLock::new(TreeState {
                    meta,
                    closed: false,
                }),
            }),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> u64 {
        self.inner.state.read_recursive().meta.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> u32 {
        self.inner.pager.codec.dimension()
    }

    /// Level of the root node; 0 while the root is a leaf.
    pub fn height(&self) -> u32 {
        self.inner.state.read_recursive().meta.height
    }

    pub fn capacity(&self) -> u32 {
        self.inner.pager.codec.capacity()
    }

    pub fn min_entries(&self) -> u32 {
        self.inner.pager.codec.min_entries()
    }

    pub fn options(&self) -> &IndexOptions {
        &self.inner.options
    }

    /// Bounding region of everything stored, `None` when empty.
    pub fn bounds(&self) -> IndexResult<Option<Region>> {
        let state = self.inner.state.read_recursive();
        state.check_open()?;
        let root = self.inner.pager.read_node(state.meta.root_id)?;
        Ok(root.bounding_region())
    }

    /// Get comprehensive statistics
    pub fn stats(&self) -> IndexStats {
        let state = self.inner.state.read_recursive();
        let pager = &self.inner.pager;
        let mut stats = IndexStats {
            entry_count: state.meta.entry_count,
            height: state.meta.height,
            dimension: pager.codec.dimension(),
            capacity: pager.codec.capacity(),
            min_entries: pager.codec.min_entries(),
            page_size: pager.codec.page_size(),
            page_count: pager.store.page_count(),
            cached_pages: pager.cache.len() as u64,
            ..Default::default()
        };
        pager.stats.fill(&mut stats);
        stats
    }

    /// Inserts `(id, region)` as a new leaf entry.
    ///
    /// Duplicate ids are accepted as independent entries unless the index
    /// was opened with `unique_ids`, in which case a reused id fails with
    /// [`IndexError::DuplicateInsert`].
    pub fn insert(&self, id: u64, region: &Region) -> IndexResult<()> {
        self.check_dimension(region)?;
        let mut state = self.inner.state.write();
        state.check_open()?;

        if self.inner.options.unique_ids && self.contains_id(state.meta.root_id, id)? {
            return Err(IndexError::DuplicateInsert { id });
        }

        let mut meta = state.meta.clone();
        let mut txn = PageTransaction::new(&self.inner.pager);
        let entry = Entry::new(region.clone(), id);
        if let Err(e) = self.insert_at_level(&mut txn, &mut meta, entry, 0) {
            txn.rollback();
            return Err(e);
        }
        meta.entry_count += 1;
        txn.commit(&mut meta)?;

        state.meta = meta;
        self.after_commit()
    }

    /// Removes the entry with exactly this id and region.
    ///
    /// Fails with [`IndexError::EntryNotFound`] if no leaf holds the pair.
    /// Underflowing nodes are dissolved and their entries reinserted.
    pub fn delete(&self, id: u64, region: &Region) -> IndexResult<()> {
        self.check_dimension(region)?;
        let mut state = self.inner.state.write();
        state.check_open()?;

        let mut meta = state.meta.clone();
        let mut txn = PageTransaction::new(&self.inner.pager);
        if let Err(e) = self.remove_entry(&mut txn, &mut meta, id, region) {
            txn.rollback();
            return Err(e);
        }
        meta.entry_count -= 1;
        txn.commit(&mut meta)?;

        state.meta = meta;
        self.after_commit()
    }

    /// Makes every committed write durable.
    pub fn flush(&self) -> IndexResult<()> {
        let state = self.inner.state.read_recursive();
        state.check_open()?;
        self.inner.pager.store.sync()
    }

    /// Flushes and closes the index. Later operations fail with
    /// [`IndexError::Closed`]; closing twice is a no-op.
    pub fn close(&self) -> IndexResult<()> {
        let mut state = self.inner.state.write();
        if state.closed {
            return Ok(());
        }
        self.inner.pager.store.sync()?;
        self.inner.pager.cache.clear();
        state.closed = true;
        log::debug!("Closed index with {} entries", state.meta.entry_count);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.read_recursive().closed
    }

    pub(crate) fn check_dimension(&self, region: &Region) -> IndexResult<()> {
        let expected = self.inner.pager.codec.dimension();
        if region.dimension() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: region.dimension(),
            });
        }
        Ok(())
    }

    fn after_commit(&self) -> IndexResult<()> {
        if self.inner.options.sync_on_commit {
            self.inner.pager.store.sync()?;
        }
        Ok(())
    }

    /// Inserts `entry` into a node at `level`, splitting upward as needed.
    ///
    /// Level 0 places a leaf entry. Higher levels place a subtree pointer and
    /// are only used when reinserting the contents of dissolved internal nodes.
    fn insert_at_level(
        &self,
        txn: &mut PageTransaction<'_>,
        meta: &mut IndexMetadata,
        entry: Entry,
        level: u32,
    ) -> IndexResult<()> {
        let mut path: Vec<(PageId, usize)> = Vec::new();
        let mut node = txn.read(meta.root_id)?;
        if node.level < level {
            return Err(IndexError::CorruptPage {
                page_id: node.page_id,
                reason: format!("root level {} below insert level {}", node.level, level),
            });
        }

        while node.level > level {
            let index = self.choose_subtree(txn, &node, &entry.region)?;
            path.push((node.page_id, index));
            node = txn.read(node.entries[index].payload)?;
        }

        node.entries.push(entry);
        let (mut child_region, mut sibling) = self.settle(txn, node)?;

        for (parent_id, index) in path.into_iter().rev() {
            let mut parent = txn.read(parent_id)?;
            entry_at(&mut parent, index)?.region = child_region;
            if let Some(sibling) = sibling.take() {
                parent.entries.push(sibling);
            }
            let (region, split) = self.settle(txn, parent)?;
            child_region = region;
            sibling = split;
        }

        if let Some(sibling) = sibling {
            let new_root_id = txn.allocate()?;
            let new_level = meta.height + 1;
            let old_root = Entry::new(child_region, meta.root_id);
            txn.put(Node::with_entries(new_root_id, new_level, vec![old_root, sibling]));
            meta.root_id = new_root_id;
            meta.height = new_level;
            log::debug!("Root split, tree height is now {}", new_level);
        }
        Ok(())
    }

    /// Buffers `node`, splitting it first if it overflows.
    ///
    /// Returns the node's bounding region and, after a split, the entry for
    /// the new sibling that the parent must adopt.
    fn settle(
        &self,
        txn: &mut PageTransaction<'_>,
        mut node: Node,
    ) -> IndexResult<(Region, Option<Entry>)> {
        let codec = txn.codec();
        let capacity = codec.capacity() as usize;
        let min_entries = codec.min_entries() as usize;

        if node.len() <= capacity {
            let region = node_region(&node)?;
            txn.put(node);
            return Ok((region, None));
        }

        let entries = std::mem::take(&mut node.entries);
        let (keep, moved) = quadratic_split(entries, min_entries);
        node.entries = keep;

        let sibling_id = txn.allocate()?;
        let sibling = Node::with_entries(sibling_id, node.level, moved);
        let sibling_entry = Entry::new(node_region(&sibling)?, sibling_id);
        let region = node_region(&node)?;

        log::trace!(
            "Split page {} at level {} into {} and {} entries",
            node.page_id,
            node.level,
            node.len(),
            sibling.len()
        );
        txn.put(node);
        txn.put(sibling);
        Ok((region, Some(sibling_entry)))
    }

    /// Picks the child needing the least enlargement to cover `region`.
    ///
    /// Ties go to the smaller resulting area, then to the child holding fewer
    /// entries. Child pages are only read to break a tie on both.
    fn choose_subtree(
        &self,
        txn: &PageTransaction<'_>,
        node: &Node,
        region: &Region,
    ) -> IndexResult<usize> {
        let mut best: Vec<usize> = Vec::new();
        let mut best_key = (f64::INFINITY, f64::INFINITY);

        for (i, entry) in node.entries.iter().enumerate() {
            let key = (
                entry.region.enlargement(region),
                entry.region.union(region).area(),
            );
            let order = if best.is_empty() {
                Ordering::Less
            } else {
                key.0
                    .total_cmp(&best_key.0)
                    .then(key.1.total_cmp(&best_key.1))
            };
            match order {
                Ordering::Less => {
                    best_key = key;
                    best.clear();
                    best.push(i);
                }
                Ordering::Equal => best.push(i),
                Ordering::Greater => {}
            }
        }

        match best.as_slice() {
            [] => Err(IndexError::CorruptPage {
                page_id: node.page_id,
                reason: "internal node has no entries".into(),
            }),
            [only] => Ok(*only),
            tied => {
                let mut choice = tied[0];
                let mut fewest = usize::MAX;
                for &i in tied {
                    let count = txn.read(node.entries[i].payload)?.len();
                    if count < fewest {
                        fewest = count;
                        choice = i;
                    }
                }
                Ok(choice)
            }
        }
    }

    fn remove_entry(
        &self,
        txn: &mut PageTransaction<'_>,
        meta: &mut IndexMetadata,
        id: u64,
        region: &Region,
    ) -> IndexResult<()> {
        let mut path = Vec::new();
        let (mut leaf, index) = self
            .find_leaf(txn, meta.root_id, region, id, &mut path)?
            .ok_or(IndexError::EntryNotFound { id })?;
        leaf.entries.remove(index);
        self.condense(txn, meta, leaf, path)
    }

    /// Depth-first search for the leaf holding exactly `(region, id)`.
    ///
    /// Every internal entry intersecting `region` is explored, since
    /// overlapping subtrees may each hold a candidate. On success `path`
    /// holds the `(page, entry index)` steps from the root to the leaf.
    fn find_leaf(
        &self,
        txn: &PageTransaction<'_>,
        page_id: PageId,
        region: &Region,
        id: u64,
        path: &mut Vec<(PageId, usize)>,
    ) -> IndexResult<Option<(Node, usize)>> {
        let node = txn.read(page_id)?;
        if node.is_leaf() {
            let found = node
                .entries
                .iter()
                .position(|e| e.payload == id && e.region == *region);
            return Ok(found.map(|index| (node, index)));
        }

        for (i, entry) in node.entries.iter().enumerate() {
            if !entry.region.intersects(region) {
                continue;
            }
            path.push((page_id, i));
            if let Some(found) = self.find_leaf(txn, entry.payload, region, id, path)? {
                return Ok(Some(found));
            }
            path.pop();
        }
        Ok(None)
    }

    /// Restores the tree after a leaf lost an entry.
    ///
    /// Walks from the leaf to the root. An underflowing node is unlinked from
    /// its parent and freed, and its entries are queued for reinsertion at
    /// their own level; any other node has its parent entry tightened. The
    /// queue is reinserted highest level first, then single-child roots are
    /// collapsed.
    fn condense(
        &self,
        txn: &mut PageTransaction<'_>,
        meta: &mut IndexMetadata,
        leaf: Node,
        path: Vec<(PageId, usize)>,
    ) -> IndexResult<()> {
        let min_entries = txn.codec().min_entries() as usize;
        let mut orphans: Vec<(u32, Entry)> = Vec::new();
        let mut node = leaf;

        for (parent_id, index) in path.into_iter().rev() {
            let mut parent = txn.read(parent_id)?;
            if node.len() < min_entries {
                if index >= parent.len() {
                    return Err(missing_entry(&parent, index));
                }
                parent.entries.remove(index);
                let level = node.level;
                orphans.extend(node.entries.drain(..).map(|e| (level, e)));
                txn.free(node.page_id);
            } else {
                entry_at(&mut parent, index)?.region = node_region(&node)?;
                txn.put(node);
            }
            node = parent;
        }

        let mut root = node;
        if !root.is_leaf() && root.is_empty() {
            // every child dissolved; restart the root at the highest orphan level
            root.level = orphans.iter().map(|(level, _)| *level).max().unwrap_or(0);
            meta.height = root.level;
        }
        txn.put(root);

        if !orphans.is_empty() {
            log::debug!("Condensed tree, reinserting {} entries", orphans.len());
        }
        orphans.sort_by(|a, b| b.0.cmp(&a.0));
        for (level, entry) in orphans {
            self.insert_at_level(txn, meta, entry, level)?;
        }

        loop {
            let root = txn.read(meta.root_id)?;
            if root.is_leaf() || root.len() != 1 {
                break;
            }
            let child_id = root.entries[0].payload;
            txn.free(root.page_id);
            meta.root_id = child_id;
            meta.height = root.level - 1;
            log::debug!("Collapsed root, tree height is now {}", meta.height);
        }
        Ok(())
    }

    /// Full scan for a leaf entry carrying `id`.
    fn contains_id(&self, root_id: PageId, id: u64) -> IndexResult<bool> {
        let mut stack = vec![root_id];
        while let Some(page_id) = stack.pop() {
            let node = self.inner.pager.read_node(page_id)?;
            if node.is_leaf() {
                if node.entries.iter().any(|e| e.payload == id) {
                    return Ok(true);
                }
            } else {
                stack.extend(node.entries.iter().map(|e| e.payload));
            }
        }
        Ok(false)
    }
}

fn node_region(node: &Node) -> IndexResult<Region> {
    node.bounding_region().ok_or_else(|| IndexError::CorruptPage {
        page_id: node.page_id,
        reason: "node has no entries".into(),
    })
}

fn entry_at(node: &mut Node, index: usize) -> IndexResult<&mut Entry> {
    let page_id = node.page_id;
    let len = node.entries.len();
    node.entries.get_mut(index).ok_or(IndexError::CorruptPage {
        page_id,
        reason: format!("entry {} out of range ({} entries)", index, len),
    })
}

fn missing_entry(node: &Node, index: usize) -> IndexError {
    IndexError::CorruptPage {
        page_id: node.page_id,
        reason: format!("entry {} out of range ({} entries)", index, node.len()),
    }
}

impl Drop for RTreeInner {
    fn drop(&mut self) {
        // Best effort flush on drop
        if !self.state.get_mut().closed {
            if let Err(e) = self.pager.store.sync() {
                log::warn!("Failed to flush index on drop: {}", e);
            }
        }
    }
}
