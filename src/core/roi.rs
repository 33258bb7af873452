//! Axis-aligned regions of interest.
//!
//! A [`Roi`] is a half-open box `[offset, offset + shape)`. Every operation is
//! pure and returns a new value. Extents never go negative: an operation that
//! would shrink a Roi past zero yields an empty Roi instead, and an empty Roi
//! contains no points. Call sites must treat an empty intersection as
//! infeasible rather than as a valid zero-size region.

use crate::core::coordinate::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Div, Mul};

/// An axis-aligned region given by an offset and a shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    offset: Coordinate,
    shape: Coordinate,
}

impl Roi {
    /// Create a new Roi. Negative shape components are clamped to zero.
    pub fn new(offset: impl Into<Coordinate>, shape: impl Into<Coordinate>) -> Self {
        let offset = offset.into();
        let shape = shape.into();
        assert_eq!(
            offset.dims(),
            shape.dims(),
            "roi offset {} and shape {} differ in dimensionality",
            offset,
            shape
        );
        Self {
            offset,
            shape: shape.map(|s| s.max(0)),
        }
    }

    /// Create the Roi spanning `[begin, end)`.
    pub fn from_bounds(begin: &Coordinate, end: &Coordinate) -> Self {
        Self::new(begin.clone(), end - begin)
    }

    /// Number of spatial dimensions.
    pub fn dims(&self) -> usize {
        self.offset.dims()
    }

    /// The offset (inclusive lower corner).
    pub fn offset(&self) -> &Coordinate {
        &self.offset
    }

    /// The extent along each axis.
    pub fn shape(&self) -> &Coordinate {
        &self.shape
    }

    /// Inclusive lower corner. Same as [`Roi::offset`].
    pub fn begin(&self) -> &Coordinate {
        &self.offset
    }

    /// Exclusive upper corner.
    pub fn end(&self) -> Coordinate {
        &self.offset + &self.shape
    }

    /// Number of integer points inside the Roi.
    pub fn size(&self) -> i64 {
        self.shape.product()
    }

    /// Whether the Roi contains no points.
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|s| s == 0)
    }

    /// Translate by `by`.
    pub fn shift(&self, by: &Coordinate) -> Roi {
        Roi {
            offset: &self.offset + by,
            shape: self.shape.clone(),
        }
    }

    /// Move the lower faces by `-neg` and the upper faces by `+pos`.
    ///
    /// Negative amounts shrink the Roi.
    pub fn grow(&self, neg: &Coordinate, pos: &Coordinate) -> Roi {
        Roi::new(&self.offset - neg, &(&self.shape + neg) + pos)
    }

    /// The overlapping region, empty if the two do not overlap.
    pub fn intersect(&self, other: &Roi) -> Roi {
        let begin = self.offset.sup(&other.offset);
        let end = self.end().inf(&other.end());
        Roi::new(begin.clone(), &end - &begin)
    }

    /// The smallest Roi containing both.
    pub fn union(&self, other: &Roi) -> Roi {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let begin = self.offset.inf(&other.offset);
        let end = self.end().sup(&other.end());
        Roi::from_bounds(&begin, &end)
    }

    /// Whether `point` lies inside.
    pub fn contains(&self, point: &Coordinate) -> bool {
        !self.is_empty() && self.offset.all_le(point) && point.all_lt(&self.end())
    }

    /// Whether `other` lies entirely inside. An empty Roi is contained
    /// everywhere.
    pub fn contains_roi(&self, other: &Roi) -> bool {
        other.is_empty() || (self.offset.all_le(&other.offset) && other.end().all_le(&self.end()))
    }

    /// The grid-index region whose multiples of `step` lie inside this Roi.
    ///
    /// Multiplying any point of the result by `step` yields a point of
    /// `self`. The result is empty if no multiple of `step` fits.
    pub fn snap_to_grid(&self, step: &Coordinate) -> Roi {
        if self.is_empty() {
            return Roi::new(Coordinate::zeros(self.dims()), Coordinate::zeros(self.dims()));
        }
        let begin = self.offset.div_ceil(step);
        let last = &(&self.end() - &Coordinate::splat(self.dims(), 1)) / step;
        let end = &last + &Coordinate::splat(self.dims(), 1);
        Roi::from_bounds(&begin, &end)
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] ({})", self.offset, self.end(), self.shape)
    }
}

/// Scale offset and shape by the inverse of `rhs` (floor division).
///
/// Used to convert world-unit Rois into voxel units.
impl Div<&Coordinate> for &Roi {
    type Output = Roi;

    fn div(self, rhs: &Coordinate) -> Roi {
        Roi::new(&self.offset / rhs, &self.shape / rhs)
    }
}

/// Scale offset and shape by `rhs`.
impl Mul<&Coordinate> for &Roi {
    type Output = Roi;

    fn mul(self, rhs: &Coordinate) -> Roi {
        Roi::new(&self.offset * rhs, &self.shape * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roi3(offset: [i64; 3], shape: [i64; 3]) -> Roi {
        Roi::new(offset, shape)
    }

    #[test]
    fn test_bounds_and_size() {
        let r = roi3([1, 2, 3], [4, 5, 6]);
        assert_eq!(r.begin(), &Coordinate::from([1, 2, 3]));
        assert_eq!(r.end(), Coordinate::from([5, 7, 9]));
        assert_eq!(r.size(), 120);
        assert!(!r.is_empty());
    }

    #[test]
    fn test_grow_and_shrink() {
        let r = roi3([0, 0, 0], [10, 10, 10]);
        let grown = r.grow(&Coordinate::splat(3, 2), &Coordinate::splat(3, 1));
        assert_eq!(grown, roi3([-2, -2, -2], [13, 13, 13]));

        let shrunk = r.grow(&Coordinate::zeros(3), &Coordinate::splat(3, -15));
        assert!(shrunk.is_empty());
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let a = roi3([0, 0, 0], [5, 5, 5]);
        let b = roi3([10, 0, 0], [5, 5, 5]);
        let i = a.intersect(&b);
        assert!(i.is_empty());
        assert!(!i.contains(&Coordinate::from([10, 0, 0])));
    }

    #[test]
    fn test_contains_roi() {
        let outer = roi3([0, 0, 0], [20, 20, 20]);
        assert!(outer.contains_roi(&roi3([10, 10, 10], [10, 10, 10])));
        assert!(!outer.contains_roi(&roi3([11, 10, 10], [10, 10, 10])));
    }

    #[test]
    fn test_intersection_of_crossed_rois() {
        // offsets not ordered the same way on every axis
        let a = Roi::new([0, 5], [10, 10]);
        let b = Roi::new([1, 0], [10, 10]);
        assert_eq!(a.intersect(&b), Roi::new([1, 5], [9, 5]));
        assert_eq!(a.union(&b), Roi::new([0, 0], [11, 15]));
    }

    #[test]
    fn test_union() {
        let a = roi3([0, 0, 0], [5, 5, 5]);
        let b = roi3([10, -5, 0], [5, 5, 5]);
        assert_eq!(a.union(&b), roi3([0, -5, 0], [15, 10, 5]));
    }

    #[test]
    fn test_world_to_voxel_division() {
        let r = roi3([40, 8, 8], [80, 16, 16]);
        let v = Coordinate::from([40, 4, 4]);
        assert_eq!(&r / &v, roi3([1, 2, 2], [2, 4, 4]));
        assert_eq!(&(&r / &v) * &v, r);
    }

    #[test]
    fn test_snap_to_grid() {
        // multiples of 4 in [-3, 10) are -0, 4, 8
        let r = Roi::new([-3], [13]);
        let grid = r.snap_to_grid(&Coordinate::from([4]));
        assert_eq!(grid, Roi::new([0], [3]));

        // no multiple of 10 in [1, 9)
        let r = Roi::new([1], [8]);
        assert!(r.snap_to_grid(&Coordinate::from([10])).is_empty());
    }

    fn arb_roi() -> impl Strategy<Value = Roi> {
        (
            prop::array::uniform3(-20i64..20),
            prop::array::uniform3(0i64..15),
        )
            .prop_map(|(o, s)| Roi::new(o, s))
    }

    fn arb_point() -> impl Strategy<Value = Coordinate> {
        prop::array::uniform3(-25i64..40).prop_map(Coordinate::from)
    }

    proptest! {
        #[test]
        fn prop_intersect_is_symmetric(a in arb_roi(), b in arb_roi()) {
            let ab = a.intersect(&b);
            let ba = b.intersect(&a);
            prop_assert_eq!(ab.is_empty(), ba.is_empty());
            if !ab.is_empty() {
                prop_assert_eq!(ab, ba);
            }
        }

        #[test]
        fn prop_intersect_contains_iff_both(a in arb_roi(), b in arb_roi(), p in arb_point()) {
            let i = a.intersect(&b);
            prop_assert_eq!(i.contains(&p), a.contains(&p) && b.contains(&p));
        }

        #[test]
        fn prop_shift_round_trip(r in arb_roi(), s in arb_point()) {
            prop_assert_eq!(r.shift(&s).shift(&-&s), r);
        }

        #[test]
        fn prop_snapped_points_scale_inside(r in arb_roi(), step in prop::array::uniform3(1i64..6)) {
            let step = Coordinate::from(step);
            let grid = r.snap_to_grid(&step);
            if !grid.is_empty() {
                prop_assert!(r.contains(&(grid.begin() * &step)));
                let last = &grid.end() - &Coordinate::splat(3, 1);
                prop_assert!(r.contains(&(&last * &step)));
            }
        }
    }
}
