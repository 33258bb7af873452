//! Point sets: sparse annotations such as synapse locations.

use crate::core::coordinate::Coordinate;
use crate::core::roi::Roi;
use crate::core::spec::PointsSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single annotated location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Location in world units.
    pub location: Coordinate,
}

impl Point {
    /// A point at `location`.
    pub fn new(location: impl Into<Coordinate>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// Points keyed by a stable identifier.
///
/// Identifiers survive Roi shifts so a node can follow a physical point
/// through the pipeline.
pub type PointSet = BTreeMap<u64, Point>;

/// A point set together with the spec describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Points {
    /// Region the point set was requested for.
    pub spec: PointsSpec,
    /// The points.
    pub data: PointSet,
}

impl Points {
    /// Create a point set.
    pub fn new(spec: PointsSpec, data: PointSet) -> Self {
        Self { spec, data }
    }

    /// The subset of `points` lying inside `roi`.
    pub fn within(points: &PointSet, roi: &Roi) -> PointSet {
        points
            .iter()
            .filter(|(_, p)| roi.contains(&p.location))
            .map(|(&id, p)| (id, p.clone()))
            .collect()
    }

    /// Translate every location by `by`.
    pub fn shift(&mut self, by: &Coordinate) {
        for point in self.data.values_mut() {
            point.location = &point.location + by;
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether there are no points.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_and_shift() {
        let mut all = PointSet::new();
        all.insert(1, Point::new([1, 1, 1]));
        all.insert(2, Point::new([10, 10, 10]));

        let roi = Roi::new([0, 0, 0], [5, 5, 5]);
        let inside = Points::within(&all, &roi);
        assert_eq!(inside.len(), 1);
        assert!(inside.contains_key(&1));

        let mut points = Points::new(PointsSpec::with_roi(roi), inside);
        points.shift(&Coordinate::from([-1, 0, 2]));
        assert_eq!(points.data[&1].location, Coordinate::from([0, 1, 3]));
    }
}
