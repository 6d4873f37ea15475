//! Handle-based access to many indexes.
//!
//! [`IndexRegistry`] is the flat, id-in/ids-out surface an embedding layer
//! talks to: indexes are addressed by [`IndexHandle`], coordinates travel as
//! plain slices, and every call returns its own [`IndexResult`]. The registry
//! is an ordinary value; there is no process-wide state.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{IndexConfig, OpenMode};
use crate::errors::{IndexError, IndexResult};
use crate::region::Region;
use crate::rtree::RTree;

/// Opaque reference to an index held by an [`IndexRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexHandle(u64);

impl IndexHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexHandle({})", self.0)
    }
}

/// Owns open indexes and hands out handles to them.
///
/// # Examples
///
/// ```rust
/// use rtree_index::{IndexRegistry, OpenMode};
///
/// let registry = IndexRegistry::new();
/// let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();
///
/// registry.insert(handle, 1, &[0.0, 0.0], &[1.0, 1.0]).unwrap();
/// assert_eq!(registry.intersects(handle, &[0.5, 0.5], &[2.0, 2.0]).unwrap(), vec![1]);
///
/// registry.close(handle).unwrap();
/// assert!(registry.close(handle).is_err());
/// ```
pub struct IndexRegistry {
    indexes: RwLock<HashMap<IndexHandle, RTree>>,
    next_handle: AtomicU64,
    defaults: IndexConfig,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::with_defaults(IndexConfig::default())
    }

    /// Registry whose indexes start from `defaults` (fill factor, options).
    pub fn with_defaults(defaults: IndexConfig) -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            defaults,
        }
    }

    /// Opens or creates an index.
    ///
    /// Without a path the index lives in memory and `mode` is ignored, except
    /// that [`OpenMode::Open`] has nothing to open. With a path, `mode`
    /// decides between creating and opening. `page_size = 0` selects the
    /// default page size; an opened index must match the requested
    /// dimension, and the requested page size unless it is 0.
    pub fn create(
        &self,
        path: Option<&Path>,
        page_size: u32,
        dimension: u32,
        mode: OpenMode,
    ) -> IndexResult<IndexHandle> {
        let config = self
            .defaults
            .clone()
            .with_page_size(page_size)
            .with_dimension(dimension);

        let tree = match path {
            None if mode == OpenMode::Open => {
                return Err(IndexError::InvalidConfig(
                    "a memory index cannot be opened".into(),
                ))
            }
            None => RTree::memory(config)?,
            Some(path) => RTree::with_mode(path, config, mode)?,
        };

        if tree.dimension() != dimension {
            let actual = tree.dimension();
            return Err(Self::reject(
                tree,
                IndexError::DimensionMismatch {
                    expected: dimension,
                    actual,
                },
            ));
        }
        let stored_page_size = tree.stats().page_size;
        if page_size != 0 && stored_page_size != page_size {
            return Err(Self::reject(
                tree,
                IndexError::InvalidConfig(format!(
                    "index uses {}-byte pages, {} requested",
                    stored_page_size, page_size
                )),
            ));
        }

        let handle = IndexHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.indexes.write().insert(handle, tree);
        log::debug!("Registered {}", handle);
        Ok(handle)
    }

    /// Flushes and releases the index. A closed handle is invalid afterwards.
    pub fn close(&self, handle: IndexHandle) -> IndexResult<()> {
        let tree = self
            .indexes
            .write()
            .remove(&handle)
            .ok_or(IndexError::InvalidHandle(handle.0))?;
        tree.close()
    }

    pub fn insert(&self, handle: IndexHandle, id: u64, low: &[f64], high: &[f64]) -> IndexResult<()> {
        let tree = self.get(handle)?;
        tree.insert(id, &Self::region(&tree, low, high)?)
    }

    pub fn delete(&self, handle: IndexHandle, id: u64, low: &[f64], high: &[f64]) -> IndexResult<()> {
        let tree = self.get(handle)?;
        tree.delete(id, &Self::region(&tree, low, high)?)
    }

    /// Ids of entries intersecting the box `[low, high]`.
    pub fn intersects(&self, handle: IndexHandle, low: &[f64], high: &[f64]) -> IndexResult<Vec<u64>> {
        let tree = self.get(handle)?;
        tree.intersection(&Self::region(&tree, low, high)?)
    }

    /// Ids of the `k` entries nearest to the box `[low, high]`.
    pub fn nearest(
        &self,
        handle: IndexHandle,
        k: u32,
        low: &[f64],
        high: &[f64],
    ) -> IndexResult<Vec<u64>> {
        let tree = self.get(handle)?;
        tree.nearest(k as usize, &Self::region(&tree, low, high)?)
    }

    pub fn is_valid(&self, handle: IndexHandle) -> IndexResult<bool> {
        self.get(handle)?.is_valid()
    }

    /// The index behind `handle`, for operations beyond the handle surface.
    pub fn get(&self, handle: IndexHandle) -> IndexResult<RTree> {
        self.indexes
            .read()
            .get(&handle)
            .cloned()
            .ok_or(IndexError::InvalidHandle(handle.0))
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every open index, returning the first failure.
    pub fn close_all(&self) -> IndexResult<()> {
        let trees: Vec<RTree> = self.indexes.write().drain().map(|(_, t)| t).collect();
        let mut result = Ok(());
        for tree in trees {
            if let Err(e) = tree.close() {
                log::warn!("Failed to close index: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Closes an index that will not be registered and returns `err`.
    fn reject(tree: RTree, err: IndexError) -> IndexError {
        if let Err(e) = tree.close() {
            log::warn!("Failed to close rejected index: {}", e);
        }
        err
    }

    fn region(tree: &RTree, low: &[f64], high: &[f64]) -> IndexResult<Region> {
        let expected = tree.dimension();
        for coords in [low, high] {
            if coords.len() != expected as usize {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: coords.len() as u32,
                });
            }
        }
        Region::from_slices(low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryPageStore, PageId, PageStore};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct UnsyncableStore(MemoryPageStore, Arc<AtomicBool>);

    impl PageStore for UnsyncableStore {
        fn page_size(&self) -> u32 {
            self.0.page_size()
        }
        fn allocate(&self) -> IndexResult<PageId> {
            self.0.allocate()
        }
        fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>> {
            self.0.read(page_id)
        }
        fn write(&self, page_id: PageId, data: &[u8]) -> IndexResult<()> {
            self.0.write(page_id, data)
        }
        fn free(&self, page_id: PageId) -> IndexResult<()> {
            self.0.free(page_id)
        }
        fn page_count(&self) -> u64 {
            self.0.page_count()
        }
        fn sync(&self) -> IndexResult<()> {
            if self.1.load(Ordering::SeqCst) {
                return Err(IndexError::Io(std::io::Error::other("sync failed")));
            }
            Ok(())
        }
    }

    #[test]
    fn test_memory_index_round_trip() {
        let registry = IndexRegistry::new();
        let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();

        registry.insert(handle, 1, &[0.0, 0.0], &[1.0, 1.0]).unwrap();
        registry.insert(handle, 2, &[5.0, 5.0], &[6.0, 6.0]).unwrap();
        assert_eq!(registry.intersects(handle, &[0.0, 0.0], &[2.0, 2.0]).unwrap(), vec![1]);
        assert_eq!(registry.nearest(handle, 1, &[4.0, 4.0], &[4.0, 4.0]).unwrap(), vec![2]);
        assert!(registry.is_valid(handle).unwrap());

        registry.delete(handle, 1, &[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!(registry.intersects(handle, &[0.0, 0.0], &[2.0, 2.0]).unwrap().is_empty());
    }

    #[test]
    fn test_default_page_size() {
        let registry = IndexRegistry::new();
        let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();
        assert_eq!(registry.get(handle).unwrap().stats().page_size, 4096);
    }

    #[test]
    fn test_handles_are_distinct() {
        let registry = IndexRegistry::new();
        let a = registry.create(None, 0, 2, OpenMode::Create).unwrap();
        let b = registry.create(None, 0, 3, OpenMode::Create).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.insert(a, 1, &[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!(registry.intersects(b, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]).unwrap().is_empty());
    }

    #[test]
    fn test_closed_handle_is_invalid() {
        let registry = IndexRegistry::new();
        let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();
        registry.close(handle).unwrap();

        assert!(matches!(registry.close(handle), Err(IndexError::InvalidHandle(_))));
        assert!(matches!(
            registry.insert(handle, 1, &[0.0, 0.0], &[1.0, 1.0]),
            Err(IndexError::InvalidHandle(_))
        ));
        assert!(matches!(registry.is_valid(handle), Err(IndexError::InvalidHandle(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_coordinate_length_checked() {
        let registry = IndexRegistry::new();
        let handle = registry.create(None, 0, 2, OpenMode::Create).unwrap();
        assert!(matches!(
            registry.insert(handle, 1, &[0.0], &[1.0]),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            registry.insert(handle, 1, &[1.0, 1.0], &[0.0, 0.0]),
            Err(IndexError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_open_memory_rejected() {
        let registry = IndexRegistry::new();
        assert!(registry.create(None, 0, 2, OpenMode::Open).is_err());
    }

    #[test]
    fn test_file_index_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.rtree");
        let registry = IndexRegistry::new();

        let handle = registry
            .create(Some(&path), 1024, 2, OpenMode::Create)
            .unwrap();
        registry.insert(handle, 42, &[1.0, 1.0], &[2.0, 2.0]).unwrap();
        registry.close(handle).unwrap();

        let handle = registry.create(Some(&path), 0, 2, OpenMode::Open).unwrap();
        assert_eq!(registry.intersects(handle, &[0.0, 0.0], &[3.0, 3.0]).unwrap(), vec![42]);
        registry.close(handle).unwrap();

        assert!(matches!(
            registry.create(Some(&path), 0, 3, OpenMode::Open),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            registry.create(Some(&path), 4096, 2, OpenMode::Open),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_close_all() {
        let registry = IndexRegistry::new();
        registry.create(None, 0, 2, OpenMode::Create).unwrap();
        registry.create(None, 0, 2, OpenMode::Create).unwrap();
        registry.close_all().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejection_keeps_cause_when_close_fails() {
        let fail_sync = Arc::new(AtomicBool::new(false));
        let store = UnsyncableStore(MemoryPageStore::new(1024), fail_sync.clone());
        let tree = RTree::create(store, IndexConfig::new().with_page_size(1024)).unwrap();
        fail_sync.store(true, Ordering::SeqCst);

        let err = IndexRegistry::reject(
            tree.clone(),
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2,
            },
        );
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(tree.close().is_err());
    }

    #[test]
    fn test_rejected_open_leaves_registry_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rejected.rtree");
        let registry = IndexRegistry::new();
        let handle = registry.create(Some(&path), 1024, 2, OpenMode::Create).unwrap();
        registry.close(handle).unwrap();

        assert!(matches!(
            registry.create(Some(&path), 0, 3, OpenMode::Open),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(registry.is_empty());

        let handle = registry.create(Some(&path), 0, 2, OpenMode::Open).unwrap();
        assert!(registry.is_valid(handle).unwrap());
    }
}
