//! Declarations of what a node can provide or what a request asks for.

use crate::core::coordinate::Coordinate;
use crate::core::keys::{ArrayKey, PointsKey};
use crate::core::roi::Roi;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a dense array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `u8`
    Uint8,
    /// `u16`
    Uint16,
    /// `u32`
    Uint32,
    /// `u64`
    Uint64,
    /// `f32`
    Float32,
    /// `f64`
    Float64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            DataType::Uint8 => 1,
            DataType::Uint16 => 2,
            DataType::Uint32 | DataType::Float32 => 4,
            DataType::Uint64 | DataType::Float64 => 8,
        }
    }

    /// Whether this is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Declaration of an array: where it is, at which resolution, of which type.
///
/// In a provider spec `roi == None` means the provider is unbounded (it can
/// produce data anywhere, e.g. after a [`RandomLocation`]). In a request the
/// Roi is required and `voxel_size`/`dtype` may be left open.
///
/// [`RandomLocation`]: crate::nodes::RandomLocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySpec {
    /// Region covered, in world units.
    pub roi: Option<Roi>,
    /// World units per voxel along each axis.
    pub voxel_size: Option<Coordinate>,
    /// Element type.
    pub dtype: Option<DataType>,
    /// Whether values may be interpolated (raw intensities) or not (labels).
    pub interpolatable: bool,
}

impl ArraySpec {
    /// A spec with only a Roi set, as used in requests.
    pub fn with_roi(roi: Roi) -> Self {
        Self {
            roi: Some(roi),
            voxel_size: None,
            dtype: None,
            interpolatable: true,
        }
    }

    /// A fully specified provider spec.
    pub fn provided(roi: Option<Roi>, voxel_size: Coordinate, dtype: DataType, interpolatable: bool) -> Self {
        Self {
            roi,
            voxel_size: Some(voxel_size),
            dtype: Some(dtype),
            interpolatable,
        }
    }

    /// Set the voxel size.
    pub fn voxel_size(mut self, voxel_size: Coordinate) -> Self {
        self.voxel_size = Some(voxel_size);
        self
    }
}

/// Declaration of a point set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointsSpec {
    /// Region covered, in world units. `None` means unbounded.
    pub roi: Option<Roi>,
}

impl PointsSpec {
    /// A points spec covering `roi`.
    pub fn with_roi(roi: Roi) -> Self {
        Self { roi: Some(roi) }
    }
}

/// Everything a node can provide, keyed by array and point-set identifiers.
///
/// Entries keep insertion order so logs and iteration are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Array declarations.
    pub arrays: IndexMap<ArrayKey, ArraySpec>,
    /// Point set declarations.
    pub points: IndexMap<PointsKey, PointsSpec>,
}

impl ProviderSpec {
    /// Create an empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or replace) an array.
    pub fn add_array(&mut self, key: ArrayKey, spec: ArraySpec) {
        self.arrays.insert(key, spec);
    }

    /// Declare (or replace) a point set.
    pub fn add_points(&mut self, key: PointsKey, spec: PointsSpec) {
        self.points.insert(key, spec);
    }

    /// Look up an array declaration.
    pub fn array(&self, key: &ArrayKey) -> Option<&ArraySpec> {
        self.arrays.get(key)
    }

    /// Look up a point set declaration.
    pub fn points(&self, key: &PointsKey) -> Option<&PointsSpec> {
        self.points.get(key)
    }

    /// Whether nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty() && self.points.is_empty()
    }

    /// Iterate over the Rois of all declarations, bounded or not.
    pub fn rois(&self) -> impl Iterator<Item = Option<&Roi>> {
        self.arrays
            .values()
            .map(|s| s.roi.as_ref())
            .chain(self.points.values().map(|s| s.roi.as_ref()))
    }

    /// Bounding box of every bounded declaration, `None` if nothing is bounded.
    pub fn total_roi(&self) -> Option<Roi> {
        self.rois()
            .flatten()
            .fold(None, |acc: Option<Roi>, roi| match acc {
                None => Some(roi.clone()),
                Some(total) => Some(total.union(roi)),
            })
    }

    /// Least common multiple of the voxel sizes of the given arrays.
    ///
    /// Keys without a declared voxel size are ignored; returns `None` if no
    /// voxel size is known.
    pub fn lcm_voxel_size<'a>(&self, keys: impl IntoIterator<Item = &'a ArrayKey>) -> Option<Coordinate> {
        keys.into_iter()
            .filter_map(|k| self.arrays.get(k).and_then(|s| s.voxel_size.as_ref()))
            .fold(None, |acc: Option<Coordinate>, v| match acc {
                None => Some(v.clone()),
                Some(l) => Some(l.lcm(v)),
            })
    }

    /// Drop every Roi, declaring the provider unbounded.
    pub fn clear_rois(&mut self) {
        for spec in self.arrays.values_mut() {
            spec.roi = None;
        }
        for spec in self.points.values_mut() {
            spec.roi = None;
        }
    }
}

impl fmt::Display for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_roi = |roi: Option<&Roi>| roi.map(|r| r.to_string()).unwrap_or_else(|| "unbounded".to_string());
        for (key, spec) in &self.arrays {
            write!(f, "{}: {}", key, fmt_roi(spec.roi.as_ref()))?;
            if let Some(v) = &spec.voxel_size {
                write!(f, " voxel_size={}", v)?;
            }
            if let Some(dtype) = &spec.dtype {
                write!(f, " dtype={}", dtype)?;
            }
            writeln!(f)?;
        }
        for (key, spec) in &self.points {
            writeln!(f, "{}: {}", key, fmt_roi(spec.roi.as_ref()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ProviderSpec {
        let mut spec = ProviderSpec::new();
        spec.add_array(
            ArrayKey::new("RAW"),
            ArraySpec::provided(Some(Roi::new([0, 0, 0], [40, 40, 40])), Coordinate::from([4, 2, 2]), DataType::Uint8, true),
        );
        spec.add_array(
            ArrayKey::new("LABELS"),
            ArraySpec::provided(Some(Roi::new([8, 8, 8], [48, 24, 24])), Coordinate::from([8, 2, 2]), DataType::Uint64, false),
        );
        spec.add_points(PointsKey::new("SYN"), PointsSpec::default());
        spec
    }

    #[test]
    fn test_total_roi_ignores_unbounded() {
        let total = spec().total_roi().unwrap();
        assert_eq!(total, Roi::new([0, 0, 0], [56, 40, 40]));
    }

    #[test]
    fn test_total_roi_none_when_unbounded() {
        let mut spec = spec();
        spec.clear_rois();
        assert!(spec.total_roi().is_none());
    }

    #[test]
    fn test_lcm_voxel_size() {
        let spec = spec();
        let keys = [ArrayKey::new("RAW"), ArrayKey::new("LABELS")];
        assert_eq!(spec.lcm_voxel_size(keys.iter()), Some(Coordinate::from([8, 2, 2])));
        assert_eq!(spec.lcm_voxel_size(std::iter::empty()), None);
    }
}
