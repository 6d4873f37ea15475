use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{IndexError, IndexResult};

/// An axis-aligned bounding box in D-dimensional space.
///
/// `Region` holds one `low`/`high` coordinate pair per dimension with
/// `low[i] <= high[i]`. It is an immutable value: every geometric operation
/// returns a new value and never changes `self`. A point is a region whose
/// low and high corners coincide.
///
/// Binary operations assume both operands share a dimension; the index checks
/// dimensions at its public boundary before any region reaches the tree.
///
/// # Examples
///
/// ```rust
/// use rtree_index::Region;
///
/// let a = Region::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
/// let b = Region::new(vec![0.5, 0.5], vec![2.0, 2.0]).unwrap();
///
/// assert!(a.intersects(&b));
/// assert_eq!(a.union(&b).area(), 4.0);
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Region {
    low: Vec<f64>,
    high: Vec<f64>,
}

impl Region {
    /// Creates a region from its low and high corners.
    ///
    /// Fails with [`IndexError::InvalidRegion`] when the corners have different
    /// lengths, no dimensions, a NaN coordinate, or `low[i] > high[i]`.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> IndexResult<Region> {
        if low.len() != high.len() {
            return Err(IndexError::InvalidRegion(format!(
                "low has {} coordinates but high has {}",
                low.len(),
                high.len()
            )));
        }
        if low.is_empty() {
            return Err(IndexError::InvalidRegion(
                "region needs at least one dimension".into(),
            ));
        }
        for (i, (lo, hi)) in low.iter().zip(high.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() {
                return Err(IndexError::InvalidRegion(format!(
                    "coordinate {} is NaN",
                    i
                )));
            }
            if lo > hi {
                return Err(IndexError::InvalidRegion(format!(
                    "low[{}] = {} exceeds high[{}] = {}",
                    i, lo, i, hi
                )));
            }
        }
        Ok(Region { low, high })
    }

    /// Creates a region from borrowed coordinate slices.
    pub fn from_slices(low: &[f64], high: &[f64]) -> IndexResult<Region> {
        Region::new(low.to_vec(), high.to_vec())
    }

    /// Creates a degenerate region covering a single point.
    pub fn point(coords: &[f64]) -> IndexResult<Region> {
        Region::new(coords.to_vec(), coords.to_vec())
    }

    /// Number of dimensions.
    pub fn dimension(&self) -> u32 {
        self.low.len() as u32
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    /// Checks that the stored coordinates still satisfy the region invariant.
    ///
    /// Deserialized regions bypass [`Region::new`], so decoded pages are checked
    /// with this before they are trusted.
    pub fn is_well_formed(&self) -> bool {
        self.low.len() == self.high.len()
            && !self.low.is_empty()
            && self
                .low
                .iter()
                .zip(self.high.iter())
                .all(|(lo, hi)| !lo.is_nan() && !hi.is_nan() && lo <= hi)
    }

    /// Returns true if the two regions share at least one point (touching edges count).
    pub fn intersects(&self, other: &Region) -> bool {
        self.axes(other)
            .all(|(lo, hi, olo, ohi)| lo <= ohi && hi >= olo)
    }

    /// Returns true if `other` lies entirely inside this region.
    pub fn contains(&self, other: &Region) -> bool {
        self.axes(other)
            .all(|(lo, hi, olo, ohi)| lo <= olo && hi >= ohi)
    }

    /// Returns the minimum bounding region of both regions.
    pub fn union(&self, other: &Region) -> Region {
        let (low, high) = self
            .axes(other)
            .map(|(lo, hi, olo, ohi)| (lo.min(olo), hi.max(ohi)))
            .unzip();
        Region { low, high }
    }

    /// Minimum bounding region of every region in the iterator, or `None` if it is empty.
    pub fn union_all<'a, I>(regions: I) -> Option<Region>
    where
        I: IntoIterator<Item = &'a Region>,
    {
        let mut iter = regions.into_iter();
        let first = iter.next()?.clone();
        Some(iter.fold(first, |acc, r| acc.union(r)))
    }

    /// Product of the extents (the volume in higher dimensions).
    ///
    /// A region that is flat along any axis has zero area, even when another
    /// axis is unbounded.
    pub fn area(&self) -> f64 {
        if self.extents().any(|extent| extent == 0.0) {
            return 0.0;
        }
        self.extents().product()
    }

    /// Sum of the extents.
    pub fn margin(&self) -> f64 {
        self.extents().sum()
    }

    /// Area increase needed for this region to also cover `other`.
    ///
    /// Zero when `other` is already covered. When both areas are infinite the
    /// increase cannot be measured and is reported as infinite.
    pub fn enlargement(&self, other: &Region) -> f64 {
        if self.contains(other) {
            return 0.0;
        }
        let grown = self.union(other).area() - self.area();
        if grown.is_nan() {
            f64::INFINITY
        } else {
            grown
        }
    }

    /// Euclidean distance between the closest points of the two regions.
    ///
    /// Zero when the regions overlap or touch. With a point region as `other`
    /// this is the classic point-to-box distance.
    pub fn distance(&self, other: &Region) -> f64 {
        self.axes(other)
            .map(|(lo, hi, olo, ohi)| {
                let gap = if ohi < lo {
                    lo - ohi
                } else if olo > hi {
                    olo - hi
                } else {
                    0.0
                };
                gap * gap
            })
            .sum::<f64>()
            .sqrt()
    }

    fn extents(&self) -> impl Iterator<Item = f64> + '_ {
        // equal bounds are checked first so a point at infinity has no extent
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(lo, hi)| if lo == hi { 0.0 } else { hi - lo })
    }

    fn axes<'a>(&'a self, other: &'a Region) -> impl Iterator<Item = (f64, f64, f64, f64)> + 'a {
        self.low
            .iter()
            .zip(self.high.iter())
            .zip(other.low.iter().zip(other.high.iter()))
            .map(|((lo, hi), (olo, ohi))| (*lo, *hi, *olo, *ohi))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({:?}, {:?})", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(low: &[f64], high: &[f64]) -> Region {
        Region::from_slices(low, high).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_bounds() {
        let result = Region::new(vec![1.0, 0.0], vec![0.0, 1.0]);
        assert!(matches!(result, Err(IndexError::InvalidRegion(_))));
    }

    #[test]
    fn test_new_rejects_mismatched_and_empty() {
        assert!(Region::new(vec![0.0], vec![0.0, 1.0]).is_err());
        assert!(Region::new(vec![], vec![]).is_err());
        assert!(Region::new(vec![f64::NAN], vec![1.0]).is_err());
    }

    #[test]
    fn test_point_region() {
        let p = Region::point(&[3.0, 4.0]).unwrap();
        assert_eq!(p.dimension(), 2);
        assert_eq!(p.area(), 0.0);
        assert_eq!(p.low(), p.high());
    }

    #[test]
    fn test_intersects_touching_edges() {
        let a = r(&[0.0, 0.0], &[1.0, 1.0]);
        let b = r(&[1.0, 1.0], &[2.0, 2.0]);
        let c = r(&[1.5, 1.5], &[2.0, 2.0]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_contains() {
        let outer = r(&[0.0, 0.0], &[10.0, 10.0]);
        let inner = r(&[2.0, 2.0], &[3.0, 3.0]);
        assert!(outer.contains(&inner));
        assert!(outer.contains(&outer));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_union_area_margin() {
        let a = r(&[0.0, 0.0], &[1.0, 1.0]);
        let b = r(&[2.0, 3.0], &[4.0, 4.0]);
        let u = a.union(&b);
        assert_eq!(u, r(&[0.0, 0.0], &[4.0, 4.0]));
        assert_eq!(u.area(), 16.0);
        assert_eq!(u.margin(), 8.0);
        assert_eq!(a.enlargement(&b), 15.0);
        assert_eq!(u.enlargement(&a), 0.0);
    }

    #[test]
    fn test_union_all() {
        let regions = vec![
            r(&[0.0, 0.0], &[1.0, 1.0]),
            r(&[-1.0, 2.0], &[0.0, 5.0]),
        ];
        assert_eq!(
            Region::union_all(&regions),
            Some(r(&[-1.0, 0.0], &[1.0, 5.0]))
        );
        assert_eq!(Region::union_all(&Vec::<Region>::new()), None);
    }

    #[test]
    fn test_distance() {
        let a = r(&[0.0, 0.0], &[1.0, 1.0]);
        let p = Region::point(&[4.0, 5.0]).unwrap();
        assert_eq!(a.distance(&p), 5.0);
        assert_eq!(p.distance(&a), 5.0);

        let overlapping = r(&[0.5, 0.5], &[3.0, 3.0]);
        assert_eq!(a.distance(&overlapping), 0.0);

        // only one axis separates the boxes
        let right = r(&[3.0, 0.2], &[4.0, 0.8]);
        assert_eq!(a.distance(&right), 2.0);
    }

    #[test]
    fn test_three_dimensional_volume() {
        let cube = r(&[0.0, 0.0, 0.0], &[2.0, 3.0, 4.0]);
        assert_eq!(cube.dimension(), 3);
        assert_eq!(cube.area(), 24.0);
        assert_eq!(cube.margin(), 9.0);
    }

    #[test]
    fn test_unbounded_regions_measure_without_nan() {
        let plane = r(&[f64::NEG_INFINITY, f64::NEG_INFINITY], &[f64::INFINITY, f64::INFINITY]);
        let strip = r(&[f64::NEG_INFINITY, 0.0], &[f64::INFINITY, 0.0]);
        let far = r(&[f64::INFINITY, 1.0], &[f64::INFINITY, 2.0]);
        let huge = r(&[0.0, 0.0], &[1e200, 1e200]);
        let unit = r(&[0.0, 0.0], &[1.0, 1.0]);

        assert_eq!(plane.area(), f64::INFINITY);
        assert_eq!(strip.area(), 0.0);
        assert_eq!(far.area(), 0.0);
        assert_eq!(huge.area(), f64::INFINITY);

        assert_eq!(plane.enlargement(&huge), 0.0);
        assert_eq!(huge.enlargement(&unit), 0.0);
        assert_eq!(huge.enlargement(&r(&[-1.0, 0.0], &[0.0, 1.0])), f64::INFINITY);
        assert!(!unit.enlargement(&far).is_nan());
        assert!(!strip.enlargement(&unit).is_nan());
    }

    #[test]
    fn test_well_formed_after_deserialize() {
        let good = r(&[0.0], &[1.0]);
        assert!(good.is_well_formed());

        let bytes = bincode::serde::encode_to_vec(
            (vec![2.0f64], vec![1.0f64]),
            bincode::config::legacy(),
        )
        .unwrap();
        let (bad, _): (Region, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy()).unwrap();
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_display() {
        let a = r(&[0.0, 1.0], &[2.0, 3.0]);
        assert_eq!(a.to_string(), "Region([0.0, 1.0], [2.0, 3.0])");
    }
}
