//! N-dimensional summed-area tables over binary masks.
//!
//! The table answers "how many voxels are masked in inside this box" with
//! `2^N` lookups, independent of the box size. The element type is the
//! narrowest unsigned integer that cannot overflow for the mask size.

use crate::core::array::ArrayData;
use crate::core::coordinate::Coordinate;
use crate::core::roi::Roi;
use crate::core::spec::DataType;
use log::debug;
use ndarray::{ArrayD, Axis, IxDyn};
use std::ops::Add;

/// Summed-area table of a binarized mask.
#[derive(Debug, Clone)]
pub enum IntegralTable {
    /// Masks of fewer than `2^16` voxels.
    U16(ArrayD<u16>),
    /// Masks of fewer than `2^32` voxels.
    U32(ArrayD<u32>),
    /// Anything larger.
    U64(ArrayD<u64>),
}

fn build<T>(mask: &ArrayData) -> ArrayD<T>
where
    T: Copy + Default + From<u8> + Add<Output = T> + Send + Sync,
{
    let mut table: ArrayD<T> = mask.to_binary();
    for axis in 0..table.ndim() {
        table.accumulate_axis_inplace(Axis(axis), |&prev, cur| *cur = *cur + prev);
    }
    table
}

impl IntegralTable {
    /// Build the table for `mask`, treating every value `> 0` as masked in.
    pub fn new(mask: &ArrayData) -> Self {
        let size = mask.len() as u64;
        let table = if size < 1 << 16 {
            IntegralTable::U16(build(mask))
        } else if size < 1 << 32 {
            IntegralTable::U32(build(mask))
        } else {
            IntegralTable::U64(build(mask))
        };
        debug!("mask size is {}, chose {} as integral table type", size, table.dtype());
        table
    }

    /// Element type of the table.
    pub fn dtype(&self) -> DataType {
        match self {
            IntegralTable::U16(_) => DataType::Uint16,
            IntegralTable::U32(_) => DataType::Uint32,
            IntegralTable::U64(_) => DataType::Uint64,
        }
    }

    /// Shape in voxels.
    pub fn shape(&self) -> &[usize] {
        match self {
            IntegralTable::U16(t) => t.shape(),
            IntegralTable::U32(t) => t.shape(),
            IntegralTable::U64(t) => t.shape(),
        }
    }

    fn at(&self, index: &[usize]) -> u64 {
        let index = IxDyn(index);
        match self {
            IntegralTable::U16(t) => t[index] as u64,
            IntegralTable::U32(t) => t[index] as u64,
            IntegralTable::U64(t) => t[index],
        }
    }

    /// Number of masked-in voxels in `roi`, given in voxel indices of the
    /// mask. The Roi must lie within the mask.
    pub fn sum(&self, roi: &Roi) -> u64 {
        if roi.is_empty() {
            return 0;
        }
        let dims = roi.dims();
        let begin = roi.begin();
        let end = roi.end();
        let mut corner = vec![0usize; dims];
        let mut total: i128 = 0;

        // inclusion-exclusion over the 2^N corners of the box
        'corners: for bits in 0u32..(1 << dims) {
            for (d, c) in corner.iter_mut().enumerate() {
                let index = if bits & (1 << d) != 0 {
                    begin.as_slice()[d] - 1
                } else {
                    end.as_slice()[d] - 1
                };
                if index < 0 {
                    continue 'corners;
                }
                *c = index as usize;
            }
            let value = self.at(&corner) as i128;
            if bits.count_ones() % 2 == 0 {
                total += value;
            } else {
                total -= value;
            }
        }
        total as u64
    }

    /// Fraction of masked-in voxels in `roi` (voxel indices).
    pub fn ratio(&self, roi: &Roi) -> f64 {
        let size = roi.size();
        if size <= 0 {
            return 0.0;
        }
        self.sum(roi) as f64 / size as f64
    }

    /// Whether `roi` (voxel indices) lies inside the table.
    pub fn covers(&self, roi: &Roi) -> bool {
        let shape: Vec<i64> = self.shape().iter().map(|&s| s as i64).collect();
        Roi::new(Coordinate::zeros(shape.len()), shape).contains_roi(roi)
    }
}
