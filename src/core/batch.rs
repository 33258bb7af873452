//! Requests and batches.
//!
//! A [`Request`] names the arrays and point sets a consumer wants and the
//! Roi for each. A [`Batch`] holds the materialized data. Both are plain
//! owned values: each node receives them by value and hands them on.

use crate::core::array::Array;
use crate::core::keys::{ArrayKey, PointsKey};
use crate::core::points::Points;
use crate::core::roi::Roi;
use crate::core::spec::{ArraySpec, PointsSpec, ProviderSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// What a consumer asks of a pipeline.
///
/// Shares its layout with [`ProviderSpec`](crate::core::spec::ProviderSpec);
/// every entry must carry a Roi.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Requested arrays.
    pub arrays: IndexMap<ArrayKey, ArraySpec>,
    /// Requested point sets.
    pub points: IndexMap<PointsKey, PointsSpec>,
}

impl Request {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: request `key` in `roi`.
    pub fn array(mut self, key: ArrayKey, roi: Roi) -> Self {
        self.add_array(key, ArraySpec::with_roi(roi));
        self
    }

    /// Builder-style: request point set `key` in `roi`.
    pub fn points(mut self, key: PointsKey, roi: Roi) -> Self {
        self.add_points(key, PointsSpec::with_roi(roi));
        self
    }

    /// Add (or replace) an array entry.
    pub fn add_array(&mut self, key: ArrayKey, spec: ArraySpec) {
        self.arrays.insert(key, spec);
    }

    /// Add (or replace) a point set entry.
    pub fn add_points(&mut self, key: PointsKey, spec: PointsSpec) {
        self.points.insert(key, spec);
    }

    /// Whether nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty() && self.points.is_empty()
    }

    /// Iterate over every requested Roi.
    pub fn rois(&self) -> impl Iterator<Item = Option<&Roi>> {
        self.arrays
            .values()
            .map(|s| s.roi.as_ref())
            .chain(self.points.values().map(|s| s.roi.as_ref()))
    }

    /// Apply `f` to every requested Roi.
    pub fn map_rois(&mut self, f: impl Fn(&Roi) -> Roi) {
        for spec in self.arrays.values_mut() {
            spec.roi = spec.roi.as_ref().map(&f);
        }
        for spec in self.points.values_mut() {
            spec.roi = spec.roi.as_ref().map(&f);
        }
    }

    /// Fill in voxel sizes left open by the consumer from `spec`.
    pub fn complete_from(&mut self, spec: &ProviderSpec) {
        for (key, requested) in self.arrays.iter_mut() {
            if requested.voxel_size.is_none() {
                requested.voxel_size = spec.array(key).and_then(|s| s.voxel_size.clone());
            }
        }
    }

    /// A hash identifying requests that produce interchangeable batches.
    ///
    /// Covers keys, Rois and voxel sizes; two requests with equal signatures
    /// may be served by the same batch. Entries are hashed in key order, so
    /// the order they were added in does not matter.
    pub fn signature(&self) -> RequestSignature {
        let arrays: BTreeMap<_, _> = self.arrays.iter().collect();
        let points: BTreeMap<_, _> = self.points.iter().collect();

        let mut hasher = DefaultHasher::new();
        for (key, spec) in arrays {
            key.hash(&mut hasher);
            spec.roi.hash(&mut hasher);
            spec.voxel_size.hash(&mut hasher);
        }
        // separates the two maps so array and points keys cannot alias
        0xffu8.hash(&mut hasher);
        for (key, spec) in points {
            key.hash(&mut hasher);
            spec.roi.hash(&mut hasher);
        }
        RequestSignature(hasher.finish())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, spec) in &self.arrays {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match &spec.roi {
                Some(roi) => write!(f, "{}: {}", key, roi)?,
                None => write!(f, "{}: <no roi>", key)?,
            }
        }
        for (key, spec) in &self.points {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match &spec.roi {
                Some(roi) => write!(f, "{}: {}", key, roi)?,
                None => write!(f, "{}: <no roi>", key)?,
            }
        }
        Ok(())
    }
}

/// Identity of a request shape, see [`Request::signature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestSignature(pub u64);

/// Unique identifier of a batch, for tracing it through logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Create a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Materialized data for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Identifier assigned by the source that created the batch.
    pub id: BatchId,
    /// Dense arrays.
    pub arrays: IndexMap<ArrayKey, Array>,
    /// Point sets.
    pub points: IndexMap<PointsKey, Points>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            id: BatchId::new(),
            arrays: IndexMap::new(),
            points: IndexMap::new(),
        }
    }

    /// Get an array.
    pub fn array(&self, key: &ArrayKey) -> Option<&Array> {
        self.arrays.get(key)
    }

    /// Get a point set.
    pub fn points(&self, key: &PointsKey) -> Option<&Points> {
        self.points.get(key)
    }

    /// Drop every entry not named in `request`.
    pub fn retain_requested(&mut self, request: &Request) {
        self.arrays.retain(|k, _| request.arrays.contains_key(k));
        self.points.retain(|k, _| request.points.contains_key(k));
    }

    /// Approximate resident memory in bytes.
    pub fn nbytes(&self) -> usize {
        let arrays: usize = self.arrays.values().map(|a| a.data.nbytes()).sum();
        let points: usize = self
            .points
            .values()
            .map(|p| p.data.values().map(|pt| pt.location.dims() * 8 + 8).sum::<usize>())
            .sum();
        std::mem::size_of::<Batch>() + arrays + points
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}
