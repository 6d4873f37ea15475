use rand::Rng;
use rtree_index::{
    IndexConfig, IndexError, IndexResult, MemoryPageStore, PageId, PageStore, RTree, Region,
};
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// Page size used by most tests: 8 two-dimensional entries per node, so a
/// few hundred entries already give a tree of height 2 or more.
pub const SMALL_PAGE_SIZE: u32 = 512;

/// Runs `test` between `before` and `after`, reporting failures with timing.
///
/// `after` runs even when the test fails, so file-backed contexts are always
/// closed and their directories removed.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> IndexResult<()> + UnwindSafe + RefUnwindSafe,
    B: Fn() -> IndexResult<TestContext> + UnwindSafe + RefUnwindSafe,
    A: Fn(TestContext) -> IndexResult<()> + UnwindSafe + RefUnwindSafe,
{
    let start_time = Instant::now();
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| test(ctx.clone())));
    let after_result = after(ctx);
    let elapsed = start_time.elapsed();

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => panic!("Test failed after {:?}: {:?}", elapsed, e),
        Err(panic_err) => {
            let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            panic!("Test panicked after {:?}: {}", elapsed, err_msg);
        }
    }
    if let Err(e) = after_result {
        panic!("After run failed: {:?}", e);
    }
}

/// An index under test plus the directory backing it, if any.
#[derive(Clone)]
pub struct TestContext {
    tree: RTree,
    dir: Option<Arc<TempDir>>,
    path: Option<PathBuf>,
}

impl TestContext {
    pub fn new(tree: RTree) -> Self {
        Self {
            tree,
            dir: None,
            path: None,
        }
    }

    pub fn tree(&self) -> RTree {
        self.tree.clone()
    }

    /// File backing the index; `None` for memory contexts.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the current index and reopens it from its file.
    pub fn reopen(&self) -> IndexResult<TestContext> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| IndexError::InvalidConfig("memory index cannot be reopened".into()))?;
        let options = self.tree.options().clone();
        self.tree.close()?;
        Ok(TestContext {
            tree: RTree::open_file(&path, options)?,
            dir: self.dir.clone(),
            path: Some(path),
        })
    }
}

pub fn small_config() -> IndexConfig {
    IndexConfig::new().with_page_size(SMALL_PAGE_SIZE)
}

pub fn create_memory_context() -> IndexResult<TestContext> {
    Ok(TestContext::new(RTree::memory(small_config())?))
}

pub fn create_file_context() -> IndexResult<TestContext> {
    create_file_context_with(small_config())
}

pub fn create_file_context_with(config: IndexConfig) -> IndexResult<TestContext> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("index.rtree");
    let tree = RTree::create_file(&path, config)?;
    Ok(TestContext {
        tree,
        dir: Some(Arc::new(dir)),
        path: Some(path),
    })
}

pub fn cleanup(ctx: TestContext) -> IndexResult<()> {
    ctx.tree.close()
}

pub fn region(low: &[f64], high: &[f64]) -> Region {
    Region::from_slices(low, high).unwrap()
}

pub fn point(coords: &[f64]) -> Region {
    Region::point(coords).unwrap()
}

/// Unit square in cell `i` of a grid `columns` wide. Neighbouring cells share
/// an edge but never overlap.
pub fn grid_cell(i: u64, columns: u64) -> Region {
    let x = (i % columns) as f64;
    let y = (i / columns) as f64;
    region(&[x, y], &[x + 1.0, y + 1.0])
}

/// Random boxes with corners in `[0, extent)` and sides up to `max_side`.
pub fn random_regions<R: Rng>(rng: &mut R, count: usize, extent: f64, max_side: f64) -> Vec<Region> {
    (0..count)
        .map(|_| {
            let x = rng.gen_range(0.0..extent);
            let y = rng.gen_range(0.0..extent);
            let w = rng.gen_range(0.0..=max_side);
            let h = rng.gen_range(0.0..=max_side);
            region(&[x, y], &[x + w, y + h])
        })
        .collect()
}

/// Ids of stored entries intersecting `query`, by linear scan.
pub fn scan_intersecting(entries: &[(u64, Region)], query: &Region) -> Vec<u64> {
    sorted(
        entries
            .iter()
            .filter(|(_, r)| r.intersects(query))
            .map(|(id, _)| *id),
    )
}

pub fn sorted(ids: impl IntoIterator<Item = u64>) -> Vec<u64> {
    let mut ids: Vec<u64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids
}

/// Page store that can be told to fail, for exercising rollback.
pub struct FlakyStore {
    inner: MemoryPageStore,
    faults: Arc<Faults>,
}

/// Switches shared between a [`FlakyStore`] and the test driving it
pub struct Faults {
    pub fail_writes: AtomicBool,
    pub fail_allocations: AtomicBool,
    /// Writes still allowed before every further write fails
    pub writes_left: AtomicU64,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_writes: AtomicBool::new(false),
            fail_allocations: AtomicBool::new(false),
            writes_left: AtomicU64::new(u64::MAX),
        }
    }
}

impl Faults {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `count` more writes through, then fails the rest.
    pub fn allow_writes(&self, count: u64) {
        self.writes_left.store(count, Ordering::SeqCst);
    }

    /// Lifts the write budget set by [`Faults::allow_writes`].
    pub fn unlimited_writes(&self) {
        self.writes_left.store(u64::MAX, Ordering::SeqCst);
    }

    fn take_write(&self) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                u64::MAX => Some(u64::MAX),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }
}

impl FlakyStore {
    pub fn new(page_size: u32) -> (Self, Arc<Faults>) {
        let faults = Arc::new(Faults::default());
        let store = Self {
            inner: MemoryPageStore::new(page_size),
            faults: faults.clone(),
        };
        (store, faults)
    }

    fn injected(what: &str) -> IndexError {
        IndexError::Io(std::io::Error::other(format!("injected {} failure", what)))
    }
}

impl PageStore for FlakyStore {
    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }

    fn allocate(&self) -> IndexResult<PageId> {
        if self.faults.fail_allocations.load(Ordering::SeqCst) {
            return Err(Self::injected("allocation"));
        }
        self.inner.allocate()
    }

    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>> {
        self.inner.read(page_id)
    }

    fn write(&self, page_id: PageId, data: &[u8]) -> IndexResult<()> {
        if !self.faults.take_write() {
            return Err(Self::injected("write"));
        }
        self.inner.write(page_id, data)
    }

    fn free(&self, page_id: PageId) -> IndexResult<()> {
        self.inner.free(page_id)
    }

    fn page_count(&self) -> u64 {
        self.inner.page_count()
    }
}
