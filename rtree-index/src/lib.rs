//! # rtree_index - Paged R-tree Spatial Index
//!
//! An embedded spatial index over axis-aligned regions of any dimension,
//! keyed by opaque `u64` ids. Nodes are stored one per fixed-size page, in
//! memory or in a single file.
//!
//! ## Features
//!
//! - **Paged Storage**: One node per page, memory or file backed
//! - **Quadratic Split**: Guttman's split with least-enlargement subtree choice
//! - **Condense on Delete**: Underfull nodes are dissolved and reinserted
//! - **Atomic Writes**: Each insert/delete commits all of its pages or none
//! - **LRU Cache**: Decoded nodes of hot pages stay in memory
//! - **Queries**: Lazy intersection, containment and k-nearest-neighbour
//! - **Validation**: Full structural report of every tree invariant
//! - **Thread Safe**: Single writer, concurrent readers
//!
//! ## Quick Start
//!
//! ```rust
//! use rtree_index::{IndexConfig, RTree, Region};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = RTree::memory(IndexConfig::default())?;
//!
//! tree.insert(1, &Region::from_slices(&[0.0, 0.0], &[1.0, 1.0])?)?;
//! tree.insert(2, &Region::from_slices(&[5.0, 5.0], &[6.0, 6.0])?)?;
//!
//! let window = Region::from_slices(&[0.0, 0.0], &[2.0, 2.0])?;
//! for id in tree.intersects(&window)? {
//!     assert_eq!(id?, 1);
//! }
//!
//! assert_eq!(tree.nearest(1, &Region::point(&[4.0, 4.0])?)?, vec![2]);
//! assert!(tree.is_valid()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## File-Backed Index
//!
//! ```rust,no_run
//! use rtree_index::{IndexConfig, IndexOptions, RTree, Region};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = RTree::create_file("places.rtree", IndexConfig::new().with_dimension(3))?;
//! tree.insert(7, &Region::point(&[1.0, 2.0, 3.0])?)?;
//! tree.close()?;
//!
//! let tree = RTree::open_file("places.rtree", IndexOptions::default())?;
//! assert_eq!(tree.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod metadata;
pub mod node;
pub mod node_cache;
pub mod query;
pub mod region;
pub mod registry;
pub mod rtree;
pub mod stats;
pub mod store;
mod transaction;
pub mod validity;

pub use config::{IndexConfig, IndexOptions, NearestTies, OpenMode};
pub use errors::{IndexError, IndexResult};
pub use metadata::IndexMetadata;
pub use node::{Entry, Node, NodeCodec};
pub use query::{IntersectionIter, Visitor};
pub use region::Region;
pub use registry::{IndexHandle, IndexRegistry};
pub use rtree::RTree;
pub use stats::IndexStats;
pub use store::{FilePageStore, MemoryPageStore, PageId, PageStore};
pub use validity::ValidityReport;
