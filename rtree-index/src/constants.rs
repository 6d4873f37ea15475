//! Constants for the paged R-tree.

use crate::store::PageId;

/// Default page size (4KB), the page length the index has always defaulted to
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Default dimensionality of regions
pub const DEFAULT_DIMENSION: u32 = 2;

/// Minimum fill ratio of non-root nodes (40% of capacity)
pub const DEFAULT_FILL_FACTOR: f64 = 0.4;

/// Largest fill ratio that still lets a split of `capacity + 1` entries
/// give both halves at least `min_entries`
pub const MAX_FILL_FACTOR: f64 = 0.5;

/// Default decoded-node cache size in pages (1MB with 4KB pages)
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// Smallest page the file store accepts; the store header must fit in slot 0
pub const MIN_PAGE_SIZE: u32 = 128;

/// The first page allocated in a fresh store holds the index metadata
pub const METADATA_PAGE_ID: PageId = 1;

/// Magic number of the index metadata page
pub const META_MAGIC: u32 = 0x52545849; // "RTXI"

/// Magic number of a file-backed page store
pub const STORE_MAGIC: u32 = 0x52545053; // "RTPS"

/// Marker written into freed file pages
pub const FREE_PAGE_MAGIC: u32 = 0x46524545; // "FREE"

/// On-disk format version
pub const FORMAT_VERSION: u32 = 1;
