//! Index configuration.
//!
//! [`IndexConfig`] fixes the on-disk shape of a new index (page size,
//! dimension, fill factor); [`IndexOptions`] carries runtime behaviour that can
//! differ between sessions on the same file.

use crate::constants::{
    DEFAULT_CACHE_PAGES, DEFAULT_DIMENSION, DEFAULT_FILL_FACTOR, DEFAULT_PAGE_SIZE,
    MAX_FILL_FACTOR, MIN_PAGE_SIZE,
};
use crate::errors::{IndexError, IndexResult};

/// How a nearest-neighbour query treats entries tied with the k-th distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearestTies {
    /// Every entry at the k-th distance is returned; results may exceed `k`.
    #[default]
    IncludeAll,
    /// Exactly `k` results, ties broken by ascending id.
    Truncate,
}

/// Whether a file-backed index is created fresh, opened, or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create a new index, truncating any existing file.
    Create,
    /// Open an existing index; fails if the file is missing.
    Open,
    /// Open the file if it exists, otherwise create it.
    #[default]
    OpenOrCreate,
}

/// Runtime behaviour of an open index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Decoded nodes kept in the LRU cache (0 disables caching)
    pub cache_pages: usize,
    pub nearest_ties: NearestTies,
    /// Reject an insert whose id is already stored
    pub unique_ids: bool,
    /// fsync the store after every committed write
    pub sync_on_commit: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cache_pages: DEFAULT_CACHE_PAGES,
            nearest_ties: NearestTies::default(),
            unique_ids: false,
            sync_on_commit: false,
        }
    }
}

/// Configuration for creating or opening an index
///
/// # Examples
///
/// ```rust
/// use rtree_index::{IndexConfig, NearestTies};
///
/// let config = IndexConfig::new()
///     .with_dimension(3)
///     .with_page_size(8192)
///     .with_nearest_ties(NearestTies::Truncate);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    pub page_size: u32,
    pub dimension: u32,
    /// Minimum fill of non-root nodes as a fraction of capacity
    pub fill_factor: f64,
    pub options: IndexOptions,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            dimension: DEFAULT_DIMENSION,
            fill_factor: DEFAULT_FILL_FACTOR,
            options: IndexOptions::default(),
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size; 0 selects the default of 4096 bytes.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    pub fn with_dimension(mut self, dimension: u32) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_fill_factor(mut self, fill_factor: f64) -> Self {
        self.fill_factor = fill_factor;
        self
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.options.cache_pages = cache_pages;
        self
    }

    pub fn with_nearest_ties(mut self, nearest_ties: NearestTies) -> Self {
        self.options.nearest_ties = nearest_ties;
        self
    }

    pub fn with_unique_ids(mut self, unique_ids: bool) -> Self {
        self.options.unique_ids = unique_ids;
        self
    }

    pub fn with_sync_on_commit(mut self, sync_on_commit: bool) -> Self {
        self.options.sync_on_commit = sync_on_commit;
        self
    }

    /// Checks the values that do not depend on page geometry.
    ///
    /// Whether two entries fit a page is only known once the node codec is
    /// built, which reports [`IndexError::PageTooSmall`] separately.
    pub fn validate(&self) -> IndexResult<()> {
        if self.dimension == 0 {
            return Err(IndexError::InvalidConfig(
                "dimension must be at least 1".into(),
            ));
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(IndexError::PageTooSmall {
                page_size: self.page_size,
                dimension: self.dimension,
            });
        }
        if !(self.fill_factor > 0.0 && self.fill_factor <= MAX_FILL_FACTOR) {
            return Err(IndexError::InvalidConfig(format!(
                "fill factor {} outside (0, {}]",
                self.fill_factor, MAX_FILL_FACTOR
            )));
        }
        Ok(())
    }
}
