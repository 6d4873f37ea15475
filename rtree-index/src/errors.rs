//! Error types for the spatial index.
//!
//! Every public operation returns an [`IndexResult`]. Errors are values owned by
//! the failing call; there is no shared error channel between operations.

use std::io;
use thiserror::Error;

use crate::store::PageId;

/// Errors that can occur in spatial index operations
#[derive(Debug, Error)]
pub enum IndexError {
    /// A region was built with mismatched, empty, NaN or inverted bounds.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Dimension mismatch: index has {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: u32, actual: u32 },

    /// A page id that was never allocated, or has been freed, was read.
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Corrupt index metadata: {0}")]
    CorruptMetadata(String),

    #[error("Corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    /// The page cannot hold two entries of the requested dimension.
    #[error("Page size {page_size} is too small for {dimension}-dimensional entries")]
    PageTooSmall { page_size: u32, dimension: u32 },

    #[error("Encoded page is {len} bytes but pages hold {page_size}")]
    PageOverflow { len: usize, page_size: u32 },

    /// Delete of an id/region pair that is not stored in the index.
    #[error("Entry {id} not found")]
    EntryNotFound { id: u64 },

    #[error("Entry {id} already exists")]
    DuplicateInsert { id: u64 },

    #[error("Invalid index handle: {0}")]
    InvalidHandle(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IndexError {
    /// Returns true for storage integrity failures that leave the index unusable.
    ///
    /// Recoverable errors such as [`IndexError::EntryNotFound`] or
    /// [`IndexError::InvalidRegion`] reject a single call and leave the index intact.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::PageNotFound(_)
                | IndexError::CorruptMetadata(_)
                | IndexError::CorruptPage { .. }
                | IndexError::Io(_)
        )
    }
}

impl From<bincode::error::EncodeError> for IndexError {
    fn from(err: bincode::error::EncodeError) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result type for spatial index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::PageNotFound(42);
        assert_eq!(err.to_string(), "Page 42 not found");

        let err = IndexError::EntryNotFound { id: 7 };
        assert_eq!(err.to_string(), "Entry 7 not found");

        let err = IndexError::PageTooSmall {
            page_size: 64,
            dimension: 3,
        };
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: IndexError = io_err.into();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(IndexError::PageNotFound(1).is_fatal());
        assert!(IndexError::CorruptMetadata("bad magic".into()).is_fatal());
        assert!(IndexError::CorruptPage {
            page_id: 3,
            reason: "checksum".into()
        }
        .is_fatal());
        assert!(!IndexError::EntryNotFound { id: 1 }.is_fatal());
        assert!(!IndexError::InvalidRegion("low > high".into()).is_fatal());
        assert!(!IndexError::Closed.is_fatal());
    }
}
