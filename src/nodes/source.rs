//! An in-memory source node.
//!
//! Holds complete arrays and point sets and serves any sub-region of them.
//! File-format adapters implement [`BatchProvider`] the same way; this one
//! is what tests, benches and the demo binary build pipelines on.

use crate::core::array::Array;
use crate::core::batch::{Batch, Request};
use crate::core::coordinate::Coordinate;
use crate::core::error::{ProvideError, ProvideResult, SetupError, SetupResult};
use crate::core::keys::{AnyKey, ArrayKey, PointsKey};
use crate::core::points::{PointSet, Points};
use crate::core::provider::{check_request, BatchProvider};
use crate::core::roi::Roi;
use crate::core::spec::{ArraySpec, PointsSpec, ProviderSpec};
use indexmap::IndexMap;
use log::{debug, info};

/// Serves arrays and point sets held in memory.
pub struct MemorySource {
    name: String,
    arrays: IndexMap<ArrayKey, Array>,
    points: IndexMap<PointsKey, (PointsSpec, PointSet)>,
    spec: ProviderSpec,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arrays: IndexMap::new(),
            points: IndexMap::new(),
            spec: ProviderSpec::new(),
        }
    }

    /// Add an array. Its spec must carry a Roi and a voxel size.
    pub fn with_array(mut self, key: ArrayKey, array: Array) -> Self {
        self.arrays.insert(key, array);
        self
    }

    /// Add a point set covering `roi`.
    pub fn with_points(mut self, key: PointsKey, roi: Roi, points: PointSet) -> Self {
        self.points.insert(key, (PointsSpec::with_roi(roi), points));
        self
    }

    fn materialize_array(&self, key: &ArrayKey, requested: &ArraySpec) -> ProvideResult<Array> {
        let any_key = || AnyKey::Array(key.clone());
        let array = self.arrays.get(key).ok_or_else(|| ProvideError::KeyNotProvided { key: any_key() })?;
        let roi = requested.roi.as_ref().ok_or_else(|| ProvideError::MissingRoi { key: any_key() })?;
        let fail = |reason: String| ProvideError::Materialization {
            key: any_key(),
            roi: roi.clone(),
            reason,
        };

        let voxel_size = array
            .spec
            .voxel_size
            .as_ref()
            .ok_or_else(|| fail("source array has no voxel size".to_string()))?;
        if let Some(asked) = &requested.voxel_size {
            if asked != voxel_size {
                return Err(fail(format!("voxel size {} requested, {} available", asked, voxel_size)));
            }
        }
        let source_roi = array.roi().ok_or_else(|| fail("source array has no roi".to_string()))?;
        if !roi.offset().is_multiple_of(voxel_size) || !roi.shape().is_multiple_of(voxel_size) {
            return Err(fail(format!("roi is not aligned with voxel size {}", voxel_size)));
        }
        if !source_roi.contains_roi(roi) {
            return Err(fail(format!("roi lies outside {}", source_roi)));
        }

        let begin = &(roi.begin() - source_roi.begin()) / voxel_size;
        let end = &begin + &(roi.shape() / voxel_size);
        let data = array.data.crop(&to_indices(&begin), &to_indices(&end));

        let mut spec = array.spec.clone();
        spec.roi = Some(roi.clone());
        Ok(Array::new(spec, data))
    }

    fn materialize_points(&self, key: &PointsKey, requested: &PointsSpec) -> ProvideResult<Points> {
        let (_, points) = self.points.get(key).ok_or_else(|| ProvideError::KeyNotProvided {
            key: AnyKey::Points(key.clone()),
        })?;
        let roi = requested.roi.as_ref().ok_or_else(|| ProvideError::MissingRoi {
            key: AnyKey::Points(key.clone()),
        })?;
        Ok(Points::new(PointsSpec::with_roi(roi.clone()), Points::within(points, roi)))
    }
}

fn to_indices(c: &Coordinate) -> Vec<usize> {
    c.iter().map(|v| v.max(0) as usize).collect()
}

impl BatchProvider for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> SetupResult<()> {
        let mut spec = ProviderSpec::new();
        for (key, array) in &self.arrays {
            let roi = array.roi().ok_or_else(|| SetupError::invalid(&self.name, key.as_str(), "array has no roi"))?;
            let voxel_size = array
                .spec
                .voxel_size
                .as_ref()
                .ok_or_else(|| SetupError::invalid(&self.name, key.as_str(), "array has no voxel size"))?;
            if !voxel_size.iter().all(|v| v > 0) {
                return Err(SetupError::invalid(
                    &self.name,
                    key.as_str(),
                    format!("voxel size {} must be positive", voxel_size),
                ));
            }
            let expected: Vec<usize> = to_indices(&(roi.shape() / voxel_size));
            if array.data.shape() != expected.as_slice() {
                return Err(SetupError::invalid(
                    &self.name,
                    key.as_str(),
                    format!("data shape {:?} does not match roi {} at voxel size {}", array.data.shape(), roi, voxel_size),
                ));
            }
            spec.add_array(key.clone(), array.spec.clone());
        }
        for (key, (points_spec, _)) in &self.points {
            spec.add_points(key.clone(), points_spec.clone());
        }
        info!(
            "{} provides {} array(s) and {} point set(s)",
            self.name,
            spec.arrays.len(),
            spec.points.len()
        );
        self.spec = spec;
        Ok(())
    }

    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn provide(&self, request: Request) -> ProvideResult<Batch> {
        check_request(&self.spec, &request)?;
        let mut batch = Batch::new();
        for (key, requested) in &request.arrays {
            batch.arrays.insert(key.clone(), self.materialize_array(key, requested)?);
        }
        for (key, requested) in &request.points {
            batch.points.insert(key.clone(), self.materialize_points(key, requested)?);
        }
        debug!("{} materialized batch {} for {}", self.name, batch.id, request);
        Ok(batch)
    }
}
