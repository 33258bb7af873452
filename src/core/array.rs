//! Dense N-dimensional array buffers.
//!
//! Arrays are stored in voxel units: the data shape equals the spec's Roi
//! shape divided by its voxel size.

use crate::core::roi::Roi;
use crate::core::spec::{ArraySpec, DataType};
use ndarray::{ArrayD, IxDyn, Slice, Zip};
use rayon::prelude::*;

/// A dense buffer of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// See [`DataType::Uint8`].
    Uint8(ArrayD<u8>),
    /// See [`DataType::Uint16`].
    Uint16(ArrayD<u16>),
    /// See [`DataType::Uint32`].
    Uint32(ArrayD<u32>),
    /// See [`DataType::Uint64`].
    Uint64(ArrayD<u64>),
    /// See [`DataType::Float32`].
    Float32(ArrayD<f32>),
    /// See [`DataType::Float64`].
    Float64(ArrayD<f64>),
}

/// Run `$body` with `$a` bound to the inner `ArrayD` whatever its type.
macro_rules! with_array {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            ArrayData::Uint8($a) => $body,
            ArrayData::Uint16($a) => $body,
            ArrayData::Uint32($a) => $body,
            ArrayData::Uint64($a) => $body,
            ArrayData::Float32($a) => $body,
            ArrayData::Float64($a) => $body,
        }
    };
}

/// Same as `with_array!` but rewraps the result in the same variant.
macro_rules! map_array {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            ArrayData::Uint8($a) => ArrayData::Uint8($body),
            ArrayData::Uint16($a) => ArrayData::Uint16($body),
            ArrayData::Uint32($a) => ArrayData::Uint32($body),
            ArrayData::Uint64($a) => ArrayData::Uint64($body),
            ArrayData::Float32($a) => ArrayData::Float32($body),
            ArrayData::Float64($a) => ArrayData::Float64($body),
        }
    };
}

impl ArrayData {
    /// A zero-filled buffer of the given type and voxel shape.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Self {
        let shape = IxDyn(shape);
        match dtype {
            DataType::Uint8 => ArrayData::Uint8(ArrayD::zeros(shape)),
            DataType::Uint16 => ArrayData::Uint16(ArrayD::zeros(shape)),
            DataType::Uint32 => ArrayData::Uint32(ArrayD::zeros(shape)),
            DataType::Uint64 => ArrayData::Uint64(ArrayD::zeros(shape)),
            DataType::Float32 => ArrayData::Float32(ArrayD::zeros(shape)),
            DataType::Float64 => ArrayData::Float64(ArrayD::zeros(shape)),
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::Uint8(_) => DataType::Uint8,
            ArrayData::Uint16(_) => DataType::Uint16,
            ArrayData::Uint32(_) => DataType::Uint32,
            ArrayData::Uint64(_) => DataType::Uint64,
            ArrayData::Float32(_) => DataType::Float32,
            ArrayData::Float64(_) => DataType::Float64,
        }
    }

    /// Shape in voxels.
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        with_array!(self, a => a.ndim())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in bytes.
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype().size_of()
    }

    /// Copy out the sub-block `[begin, end)` given in voxel indices.
    ///
    /// Indices must lie within the buffer; the caller checks bounds.
    pub fn crop(&self, begin: &[usize], end: &[usize]) -> ArrayData {
        map_array!(self, a => a
            .slice_each_axis(|ax| Slice::from(begin[ax.axis.index()]..end[ax.axis.index()]))
            .to_owned())
    }

    /// Binarize (`value > 0`) into a buffer of `T` ones and zeros.
    pub fn to_binary<T>(&self) -> ArrayD<T>
    where
        T: Copy + Default + From<u8> + Send + Sync,
    {
        let one = T::from(1u8);
        let zero = T::default();
        with_array!(self, a => Zip::from(a).par_map_collect(|v| if *v > Default::default() { one } else { zero }))
    }

    /// Minimum and maximum as `f64`, `None` for an empty buffer.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        let init = || (f64::INFINITY, f64::NEG_INFINITY);
        let bounds = with_array!(self, a => a
            .par_iter()
            .map(|&v| v as f64)
            .fold(init, |(lo, hi), v| (lo.min(v), hi.max(v)))
            .reduce(init, |(a, b), (c, d)| (a.min(c), b.max(d))));
        Some(bounds)
    }

    /// Convert to `f32` values multiplied by `factor`.
    pub fn scaled_f32(&self, factor: f32) -> ArrayD<f32> {
        with_array!(self, a => a.mapv(|v| v as f32 * factor))
    }

    /// Convert to `f64` values multiplied by `factor`.
    pub fn scaled_f64(&self, factor: f64) -> ArrayD<f64> {
        with_array!(self, a => a.mapv(|v| v as f64 * factor))
    }
}

/// An array together with the spec describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// Roi, voxel size and type of the data.
    pub spec: ArraySpec,
    /// The voxel data.
    pub data: ArrayData,
}

impl Array {
    /// Create an array, taking the dtype from the data.
    pub fn new(mut spec: ArraySpec, data: ArrayData) -> Self {
        spec.dtype = Some(data.dtype());
        Self { spec, data }
    }

    /// The Roi covered by this array, if known.
    pub fn roi(&self) -> Option<&Roi> {
        self.spec.roi.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> ArrayData {
        let a = Array3::from_shape_fn((4, 4, 4), |(z, y, x)| (z * 16 + y * 4 + x) as u8);
        ArrayData::Uint8(a.into_dyn())
    }

    #[test]
    fn test_crop() {
        let data = ramp();
        let cropped = data.crop(&[1, 0, 2], &[3, 2, 4]);
        assert_eq!(cropped.shape(), &[2, 2, 2]);
        match cropped {
            ArrayData::Uint8(a) => {
                assert_eq!(a[[0, 0, 0]], 16 + 2);
                assert_eq!(a[[1, 1, 1]], 32 + 4 + 3);
            }
            other => panic!("unexpected dtype {}", other.dtype()),
        }
    }

    #[test]
    fn test_to_binary() {
        let binary: ArrayD<u16> = ramp().to_binary();
        assert_eq!(binary.iter().map(|&v| v as u32).sum::<u32>(), 63);
        assert_eq!(binary[[0, 0, 0]], 0);
    }

    #[test]
    fn test_min_max_and_nbytes() {
        let data = ArrayData::Float32(ArrayD::from_elem(IxDyn(&[2, 3]), 0.5));
        assert_eq!(data.min_max(), Some((0.5, 0.5)));
        assert_eq!(data.nbytes(), 24);
        assert_eq!(ramp().min_max(), Some((0.0, 63.0)));
    }
}
