//! Page storage for the R-tree.
//!
//! A [`PageStore`] hands out fixed-size pages identified by [`PageId`]. The
//! tree never shares a page between two live nodes and frees pages it no longer
//! references, so a store only needs allocate/read/write/free:
//! - [`MemoryPageStore`] keeps pages in a map, nothing is persisted
//! - [`FilePageStore`] maps pages onto fixed-size slots of a single file

mod file;
mod memory;

pub use file::FilePageStore;
pub use memory::MemoryPageStore;

use crate::errors::IndexResult;

/// Page ID - unique identifier for a page inside a store. Zero is never allocated.
pub type PageId = u64;

/// Fixed-size page allocation, read, write and free.
///
/// All methods take `&self`; implementations serialize access internally so a
/// store can be shared between concurrent readers. Writes are whole-page
/// overwrites: `data` shorter than [`PageStore::page_size`] is zero padded.
pub trait PageStore: Send + Sync {
    /// Size of every page in bytes.
    fn page_size(&self) -> u32;

    /// Allocates a page, reusing a freed id before growing the store.
    fn allocate(&self) -> IndexResult<PageId>;

    /// Reads a whole page. Fails with `PageNotFound` for unallocated or freed ids.
    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>>;

    /// Overwrites a whole page. Fails with `PageNotFound` for unallocated or freed ids
    /// and with `PageOverflow` if `data` is longer than a page.
    fn write(&self, page_id: PageId, data: &[u8]) -> IndexResult<()>;

    /// Returns a page to the free list.
    fn free(&self, page_id: PageId) -> IndexResult<()>;

    /// Number of live (allocated and not freed) pages.
    fn page_count(&self) -> u64;

    /// Makes every completed write durable. A no-op for volatile stores.
    fn sync(&self) -> IndexResult<()> {
        Ok(())
    }
}
