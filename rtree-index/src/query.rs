//! Intersection, containment and nearest-neighbour queries.
//!
//! All queries hold the index read lock while they traverse, so they see one
//! committed tree and may run concurrently with each other. A lazy
//! [`IntersectionIter`] keeps the lock until it is dropped.
//!
//! Read paths take the lock recursively: a thread holding an iterator may
//! issue further queries even while a writer is queued behind it. An insert
//! or delete on the same thread as a live iterator deadlocks.

use parking_lot::RwLockReadGuard;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::NearestTies;
use crate::errors::IndexResult;
use crate::region::Region;
use crate::rtree::{RTree, TreeState};
use crate::store::PageId;
use crate::transaction::Pager;

/// Receives query results as they are found.
///
/// `Vec<u64>` implements it by collecting ids.
pub trait Visitor {
    /// Called once per matching leaf entry.
    fn visit_data(&mut self, id: u64, region: &Region);

    /// Called for every node the traversal reads.
    fn visit_node(&mut self, _page_id: PageId, _level: u32) {}
}

impl Visitor for Vec<u64> {
    fn visit_data(&mut self, id: u64, _region: &Region) {
        self.push(id);
    }
}

/// Lazy sequence of ids whose regions intersect a query region.
///
/// Yields `Err` once and then ends if a page cannot be read. Ids appear once
/// per stored entry, so an id inserted under several matching regions
/// repeats. The index stays read-locked until the iterator is dropped.
pub struct IntersectionIter<'a> {
    _state: RwLockReadGuard<'a, TreeState>,
    pager: &'a Pager,
    query: Region,
    stack: Vec<PageId>,
    pending: Vec<u64>,
}

impl Iterator for IntersectionIter<'_> {
    type Item = IndexResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.pending.pop() {
                return Some(Ok(id));
            }
            let page_id = self.stack.pop()?;
            let node = match self.pager.read_node(page_id) {
                Ok(node) => node,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };
            let matching = node
                .entries
                .iter()
                .filter(|e| e.region.intersects(&self.query))
                .map(|e| e.payload);
            if node.is_leaf() {
                self.pending.extend(matching);
                self.pending.reverse();
            } else {
                self.stack.extend(matching);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    Data(u64),
    Node(PageId),
}

struct QueueItem {
    distance: f64,
    candidate: Candidate,
    region: Option<Region>,
}

impl QueueItem {
    /// Data sorts before nodes at equal distance, then ids ascending.
    fn rank(&self) -> (u8, u64) {
        match self.candidate {
            Candidate::Data(id) => (0, id),
            Candidate::Node(page_id) => (1, page_id),
        }
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so BinaryHeap pops the nearest item first
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.rank().cmp(&self.rank()))
    }
}

impl RTree {
    /// Lazily yields ids whose regions intersect `region` (touching counts).
    ///
    /// Writers wait until the iterator is dropped, so drop it before calling
    /// [`RTree::insert`] or [`RTree::delete`] on the same thread.
    pub fn intersects(&self, region: &Region) -> IndexResult<IntersectionIter<'_>> {
        self.check_dimension(region)?;
        let state = self.inner.state.read_recursive();
        state.check_open()?;
        let root_id = state.meta.root_id;
        Ok(IntersectionIter {
            _state: state,
            pager: &self.inner.pager,
            query: region.clone(),
            stack: vec![root_id],
            pending: Vec::new(),
        })
    }

    /// Collects every id whose region intersects `region`.
    pub fn intersection(&self, region: &Region) -> IndexResult<Vec<u64>> {
        let mut ids = Vec::new();
        self.intersection_query(region, &mut ids)?;
        Ok(ids)
    }

    /// Depth-first intersection search reporting to `visitor`.
    pub fn intersection_query(&self, region: &Region, visitor: &mut dyn Visitor) -> IndexResult<()> {
        self.filtered_query(region, visitor, |stored, query| stored.intersects(query))
    }

    /// Ids whose regions lie entirely inside `region`.
    pub fn contained(&self, region: &Region) -> IndexResult<Vec<u64>> {
        let mut ids = Vec::new();
        self.contained_query(region, &mut ids)?;
        Ok(ids)
    }

    pub fn contained_query(&self, region: &Region, visitor: &mut dyn Visitor) -> IndexResult<()> {
        self.filtered_query(region, visitor, |stored, query| query.contains(stored))
    }

    /// Ids of the `k` entries nearest to `region`, nearest first.
    ///
    /// With [`NearestTies::IncludeAll`] every entry tied with the k-th
    /// distance is returned as well.
    pub fn nearest(&self, k: usize, region: &Region) -> IndexResult<Vec<u64>> {
        let found = self.nearest_entries(k, region)?;
        Ok(found.into_iter().map(|(id, _, _)| id).collect())
    }

    /// Like [`RTree::nearest`], paired with each entry's exact distance.
    pub fn nearest_with_distances(&self, k: usize, region: &Region) -> IndexResult<Vec<(u64, f64)>> {
        let found = self.nearest_entries(k, region)?;
        Ok(found.into_iter().map(|(id, d, _)| (id, d)).collect())
    }

    /// Branch-and-bound k-nearest search reporting to `visitor`.
    ///
    /// Results are emitted in ascending distance once the search has
    /// finished, never incrementally.
    pub fn nearest_neighbor_query(
        &self,
        k: usize,
        region: &Region,
        visitor: &mut dyn Visitor,
    ) -> IndexResult<()> {
        for (id, _, stored) in self.nearest_entries(k, region)? {
            visitor.visit_data(id, &stored);
        }
        Ok(())
    }

    fn filtered_query(
        &self,
        region: &Region,
        visitor: &mut dyn Visitor,
        matches: impl Fn(&Region, &Region) -> bool,
    ) -> IndexResult<()> {
        self.check_dimension(region)?;
        let state = self.inner.state.read_recursive();
        state.check_open()?;

        let mut stack = vec![state.meta.root_id];
        while let Some(page_id) = stack.pop() {
            let node = self.inner.pager.read_node(page_id)?;
            visitor.visit_node(page_id, node.level);
            for entry in &node.entries {
                if node.is_leaf() {
                    if matches(&entry.region, region) {
                        visitor.visit_data(entry.payload, &entry.region);
                    }
                } else if entry.region.intersects(region) {
                    stack.push(entry.payload);
                }
            }
        }
        Ok(())
    }

    /// Best-first search over one queue of nodes and data entries.
    ///
    /// A popped data entry's distance is exact and final because the queue
    /// is ordered by lower bound. Once `k` entries are found, anything
    /// farther than the k-th is pruned; entries at exactly that distance are
    /// still collected and trimmed afterwards under [`NearestTies::Truncate`].
    fn nearest_entries(&self, k: usize, region: &Region) -> IndexResult<Vec<(u64, f64, Region)>> {
        self.check_dimension(region)?;
        let state = self.inner.state.read_recursive();
        state.check_open()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap = BinaryHeap::new();
        heap.push(QueueItem {
            distance: 0.0,
            candidate: Candidate::Node(state.meta.root_id),
            region: None,
        });
        let mut found: Vec<(u64, f64, Region)> = Vec::new();

        while let Some(item) = heap.pop() {
            let bound = found.get(k - 1).map(|(_, d, _)| *d);
            if bound.is_some_and(|kth| item.distance > kth) {
                break;
            }

            match item.candidate {
                Candidate::Data(id) => {
                    if let Some(stored) = item.region {
                        found.push((id, item.distance, stored));
                    }
                }
                Candidate::Node(page_id) => {
                    let node = self.inner.pager.read_node(page_id)?;
                    for entry in node.entries {
                        let distance = entry.region.distance(region);
                        if bound.is_some_and(|kth| distance > kth) {
                            continue;
                        }
                        let (candidate, stored) = if node.level == 0 {
                            (Candidate::Data(entry.payload), Some(entry.region))
                        } else {
                            (Candidate::Node(entry.payload), None)
                        };
                        heap.push(QueueItem {
                            distance,
                            candidate,
                            region: stored,
                        });
                    }
                }
            }
        }

        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        if self.inner.options.nearest_ties == NearestTies::Truncate {
            found.truncate(k);
        }
        Ok(found)
    }
}
