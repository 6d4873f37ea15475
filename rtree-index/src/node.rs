//! Node types and their page encoding.
//!
//! A node is the decoded content of one page: a level (0 = leaf) and an
//! unordered list of entries. Leaf entries carry the caller's id as payload,
//! internal entries carry a child page id.
//!
//! # Page Layout
//! ```text
//! ┌────────────┬──────────────────────────────────────┬─────────────┐
//! │ crc32 (4B) │ bincode(level: u32, entries: Vec<_>) │ zero padding│
//! └────────────┴──────────────────────────────────────┴─────────────┘
//! ```
//! The checksum covers the encoded body only. Entries have a fixed encoded
//! size for a given dimension, which is how [`NodeCodec`] derives capacity.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::errors::{IndexError, IndexResult};
use crate::region::Region;
use crate::store::PageId;

const CHECKSUM_LEN: usize = 4;

/// A `(region, payload)` pair stored in a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub region: Region,
    /// Caller id in a leaf, child page id in an internal node
    pub payload: u64,
}

impl Entry {
    pub fn new(region: Region, payload: u64) -> Self {
        Self { region, payload }
    }
}

/// Decoded content of a single page
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub page_id: PageId,
    /// Height from leaf level (leaves are 0)
    pub level: u32,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn new(page_id: PageId, level: u32) -> Self {
        Self {
            page_id,
            level,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(page_id: PageId, level: u32, entries: Vec<Entry>) -> Self {
        Self {
            page_id,
            level,
            entries,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of the entries' regions, `None` for an empty node.
    pub fn bounding_region(&self) -> Option<Region> {
        Region::union_all(self.entries.iter().map(|e| &e.region))
    }
}

#[derive(Serialize)]
struct NodeBodyRef<'a> {
    level: u32,
    entries: &'a [Entry],
}

#[derive(Deserialize)]
struct NodeBody {
    level: u32,
    entries: Vec<Entry>,
}

/// Encodes and decodes nodes to fixed-size pages.
///
/// Built once per index from the page size and dimension. Fails with
/// [`IndexError::PageTooSmall`] when a page cannot hold two entries, since a
/// node that cannot split cannot overflow safely.
#[derive(Debug, Clone)]
pub struct NodeCodec {
    page_size: u32,
    dimension: u32,
    capacity: u32,
    min_entries: u32,
}

impl NodeCodec {
    /// Derives capacity from the page size and sets `min_entries` from the fill factor.
    pub fn new(page_size: u32, dimension: u32, fill_factor: f64) -> IndexResult<Self> {
        let capacity = Self::max_capacity(page_size, dimension)?;
        let min_entries = ((capacity as f64 * fill_factor).floor() as u32).max(1);
        Self::with_limits(page_size, dimension, capacity, min_entries)
    }

    /// Rebuilds a codec from persisted limits, checking they still fit the page.
    pub fn with_limits(
        page_size: u32,
        dimension: u32,
        capacity: u32,
        min_entries: u32,
    ) -> IndexResult<Self> {
        let max_capacity = Self::max_capacity(page_size, dimension)?;
        if capacity < 2 || capacity > max_capacity {
            return Err(IndexError::InvalidConfig(format!(
                "capacity {} outside [2, {}] for {}-byte pages",
                capacity, max_capacity, page_size
            )));
        }
        if min_entries == 0 || min_entries * 2 > capacity + 1 {
            return Err(IndexError::InvalidConfig(format!(
                "min_entries {} cannot be honoured with capacity {}",
                min_entries, capacity
            )));
        }
        Ok(Self {
            page_size,
            dimension,
            capacity,
            min_entries,
        })
    }

    /// Largest number of entries of `dimension` coordinates one page can hold.
    pub fn max_capacity(page_size: u32, dimension: u32) -> IndexResult<u32> {
        if dimension == 0 {
            return Err(IndexError::InvalidConfig(
                "dimension must be at least 1".into(),
            ));
        }
        let too_small = IndexError::PageTooSmall {
            page_size,
            dimension,
        };

        let sample = Entry::new(Region::point(&vec![0.0; dimension as usize])?, 0);
        let empty_len = encoded_body_len(0, &[])?;
        let one_len = encoded_body_len(0, std::slice::from_ref(&sample))?;
        let entry_len = one_len - empty_len;
        let overhead = CHECKSUM_LEN + empty_len;

        let page_size_bytes = page_size as usize;
        if page_size_bytes <= overhead {
            return Err(too_small);
        }
        let capacity = (page_size_bytes - overhead) / entry_len;
        if capacity < 2 {
            return Err(too_small);
        }
        Ok(capacity.min(u32::MAX as usize) as u32)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Maximum entries per node.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Minimum entries per non-root node.
    pub fn min_entries(&self) -> u32 {
        self.min_entries
    }

    /// Encodes a node into at most one page of bytes.
    pub fn encode(&self, node: &Node) -> IndexResult<Vec<u8>> {
        let body = bincode::serde::encode_to_vec(
            NodeBodyRef {
                level: node.level,
                entries: &node.entries,
            },
            bincode::config::legacy(),
        )?;

        let mut bytes = Vec::with_capacity(CHECKSUM_LEN + body.len());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&body);

        if bytes.len() > self.page_size as usize {
            return Err(IndexError::PageOverflow {
                len: bytes.len(),
                page_size: self.page_size,
            });
        }
        Ok(bytes)
    }

    /// Decodes and verifies the page stored at `page_id`.
    pub fn decode(&self, page_id: PageId, bytes: &[u8]) -> IndexResult<Node> {
        let corrupt = |reason: String| IndexError::CorruptPage { page_id, reason };

        if bytes.len() < CHECKSUM_LEN {
            return Err(corrupt(format!("page holds only {} bytes", bytes.len())));
        }
        let (checksum, body_bytes) = bytes.split_at(CHECKSUM_LEN);
        let mut stored = [0u8; CHECKSUM_LEN];
        stored.copy_from_slice(checksum);
        let stored = u32::from_le_bytes(stored);

        let (body, consumed): (NodeBody, usize) =
            bincode::serde::decode_from_slice(body_bytes, bincode::config::legacy())
                .map_err(|e| corrupt(e.to_string()))?;

        let actual = crc32fast::hash(&body_bytes[..consumed]);
        if actual != stored {
            log::warn!("Checksum mismatch on page {}", page_id);
            return Err(corrupt(format!(
                "checksum mismatch (expected: {:x}, got: {:x})",
                stored, actual
            )));
        }
        if body.entries.len() > self.capacity as usize {
            return Err(corrupt(format!(
                "{} entries exceed capacity {}",
                body.entries.len(),
                self.capacity
            )));
        }
        if let Some(bad) = body
            .entries
            .iter()
            .find(|e| e.region.dimension() != self.dimension || !e.region.is_well_formed())
        {
            return Err(corrupt(format!("malformed region {}", bad.region)));
        }

        Ok(Node::with_entries(page_id, body.level, body.entries))
    }
}

/// Quadratic split of an overflowing entry list into two groups.
///
/// Seeds are the pair wasting the most area when grouped together. The rest
/// are assigned in PickNext order (strongest preference first) to the group
/// needing less enlargement; ties go to the smaller group, then the smaller
/// area. Once a group needs every remaining entry to reach `min_entries`, it
/// takes them all.
pub(crate) fn quadratic_split(
    mut entries: Vec<Entry>,
    min_entries: usize,
) -> (Vec<Entry>, Vec<Entry>) {
    let (first, second) = pick_seeds(&entries);
    // remove the higher index first so the lower one stays put
    let seed_b = entries.swap_remove(second);
    let seed_a = entries.swap_remove(first);

    let mut bounds_a = seed_a.region.clone();
    let mut bounds_b = seed_b.region.clone();
    let mut group_a = vec![seed_a];
    let mut group_b = vec![seed_b];

    while !entries.is_empty() {
        let remaining = entries.len();
        if group_a.len() + remaining <= min_entries {
            group_a.append(&mut entries);
            break;
        }
        if group_b.len() + remaining <= min_entries {
            group_b.append(&mut entries);
            break;
        }

        let next = pick_next(&entries, &bounds_a, &bounds_b);
        let entry = entries.swap_remove(next);
        let grow_a = bounds_a.enlargement(&entry.region);
        let grow_b = bounds_b.enlargement(&entry.region);

        let to_a = match grow_a.total_cmp(&grow_b) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => match group_a.len().cmp(&group_b.len()) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => match bounds_a.area().total_cmp(&bounds_b.area()) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => bounds_a.margin() <= bounds_b.margin(),
                },
            },
        };

        if to_a {
            bounds_a = bounds_a.union(&entry.region);
            group_a.push(entry);
        } else {
            bounds_b = bounds_b.union(&entry.region);
            group_b.push(entry);
        }
    }

    (group_a, group_b)
}

/// Returns `(i, j)` with `i < j`, maximising dead area of the pair's union.
fn pick_seeds(entries: &[Entry]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut worst_waste = f64::NEG_INFINITY;
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let a = &entries[i].region;
            let b = &entries[j].region;
            let waste = finite_or_max(a.union(b).area() - a.area() - b.area());
            if waste.total_cmp(&worst_waste) == Ordering::Greater {
                worst_waste = waste;
                best = (i, j);
            }
        }
    }
    best
}

fn pick_next(entries: &[Entry], bounds_a: &Region, bounds_b: &Region) -> usize {
    let mut best = 0;
    let mut best_diff = f64::NEG_INFINITY;
    for (i, entry) in entries.iter().enumerate() {
        let diff = finite_or_max(
            (bounds_a.enlargement(&entry.region) - bounds_b.enlargement(&entry.region)).abs(),
        );
        if diff.total_cmp(&best_diff) == Ordering::Greater {
            best_diff = diff;
            best = i;
        }
    }
    best
}

/// Differences of infinite areas are undefined; rank them as infinite.
fn finite_or_max(value: f64) -> f64 {
    if value.is_nan() {
        f64::INFINITY
    } else {
        value
    }
}

fn encoded_body_len(level: u32, entries: &[Entry]) -> IndexResult<usize> {
    let bytes = bincode::serde::encode_to_vec(
        NodeBodyRef { level, entries },
        bincode::config::legacy(),
    )?;
    Ok(bytes.len())
}
