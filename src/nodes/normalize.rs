//! Intensity filters: normalization to floats and affine rescaling.

use crate::core::array::ArrayData;
use crate::core::batch::{Batch, Request};
use crate::core::error::{ProvideError, ProvideResult, SetupError, SetupResult};
use crate::core::keys::{AnyKey, ArrayKey};
use crate::core::provider::{BatchFilter, BatchProvider};
use crate::core::spec::{DataType, ProviderSpec};
use log::debug;

/// Convert an array to floats in `[0, 1]`.
///
/// Without an explicit factor, `uint8` data is divided by 255 and float data
/// already in `[0, 1]` is kept as is. Anything else needs a factor.
pub struct Normalize {
    array: ArrayKey,
    factor: Option<f64>,
    dtype: DataType,
}

impl Normalize {
    /// Normalize `array` to `float32` with an automatic factor.
    pub fn new(array: ArrayKey) -> Self {
        Self {
            array,
            factor: None,
            dtype: DataType::Float32,
        }
    }

    /// Multiply by `factor` instead of choosing one from the data type.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }

    /// Output element type, `Float32` or `Float64`.
    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    fn process_error(&self, reason: impl Into<String>) -> ProvideError {
        ProvideError::Process {
            node: self.name().to_string(),
            key: AnyKey::Array(self.array.clone()),
            reason: reason.into(),
        }
    }

    fn automatic_factor(&self, data: &ArrayData) -> ProvideResult<f64> {
        debug!("automatically normalizing {} with dtype={}", self.array, data.dtype());
        match data.dtype() {
            DataType::Uint8 => Ok(1.0 / 255.0),
            DataType::Float32 | DataType::Float64 => match data.min_max() {
                Some((lo, hi)) if lo < 0.0 || hi > 1.0 => Err(self.process_error(format!(
                    "values are float but span [{}, {}], provide a factor",
                    lo, hi
                ))),
                _ => Ok(1.0),
            },
            other => Err(self.process_error(format!(
                "automatic normalization for {} not implemented, provide a factor",
                other
            ))),
        }
    }
}

impl BatchFilter for Normalize {
    type Context = ();

    fn name(&self) -> &str {
        "normalize"
    }

    fn setup(&mut self, upstream: &dyn BatchProvider) -> SetupResult<ProviderSpec> {
        if !self.dtype.is_float() {
            return Err(SetupError::invalid(self.name(), "dtype", format!("{} is not a float type", self.dtype)));
        }
        let mut spec = upstream.spec().clone();
        let array = spec.arrays.get_mut(&self.array).ok_or_else(|| SetupError::MissingKey {
            node: self.name().to_string(),
            key: AnyKey::Array(self.array.clone()),
        })?;
        array.dtype = Some(self.dtype);
        Ok(spec)
    }

    fn prepare(&self, _upstream: &dyn BatchProvider, _request: &mut Request) -> ProvideResult<()> {
        Ok(())
    }

    fn process(&self, batch: &mut Batch, _request: &Request, _context: ()) -> ProvideResult<()> {
        let array = match batch.arrays.get_mut(&self.array) {
            Some(array) => array,
            None => return Ok(()),
        };
        let factor = match self.factor {
            Some(factor) => factor,
            None => self.automatic_factor(&array.data)?,
        };
        debug!("scaling {} with {}", self.array, factor);

        array.data = match self.dtype {
            DataType::Float64 => ArrayData::Float64(array.data.scaled_f64(factor)),
            _ => ArrayData::Float32(array.data.scaled_f32(factor as f32)),
        };
        array.spec.dtype = Some(array.data.dtype());
        Ok(())
    }
}

/// Apply `x * scale + shift` to a float array.
pub struct IntensityScaleShift {
    array: ArrayKey,
    scale: f64,
    shift: f64,
}

impl IntensityScaleShift {
    /// Rescale `array` with `scale` and `shift`.
    pub fn new(array: ArrayKey, scale: f64, shift: f64) -> Self {
        Self { array, scale, shift }
    }
}

impl BatchFilter for IntensityScaleShift {
    type Context = ();

    fn name(&self) -> &str {
        "intensity_scale_shift"
    }

    fn setup(&mut self, upstream: &dyn BatchProvider) -> SetupResult<ProviderSpec> {
        let spec = upstream.spec().clone();
        if spec.array(&self.array).is_none() {
            return Err(SetupError::MissingKey {
                node: self.name().to_string(),
                key: AnyKey::Array(self.array.clone()),
            });
        }
        Ok(spec)
    }

    fn prepare(&self, _upstream: &dyn BatchProvider, _request: &mut Request) -> ProvideResult<()> {
        Ok(())
    }

    fn process(&self, batch: &mut Batch, _request: &Request, _context: ()) -> ProvideResult<()> {
        let array = match batch.arrays.get_mut(&self.array) {
            Some(array) => array,
            None => return Ok(()),
        };
        let (scale, shift) = (self.scale, self.shift);
        match &mut array.data {
            ArrayData::Float32(a) => a.mapv_inplace(|v| v * scale as f32 + shift as f32),
            ArrayData::Float64(a) => a.mapv_inplace(|v| v * scale + shift),
            other => {
                return Err(ProvideError::Process {
                    node: self.name().to_string(),
                    key: AnyKey::Array(self.array.clone()),
                    reason: format!("expected float data, got {}", other.dtype()),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::array::Array;
    use crate::core::coordinate::Coordinate;
    use crate::core::provider::Filtered;
    use crate::core::roi::Roi;
    use crate::core::spec::ArraySpec;
    use crate::nodes::MemorySource;
    use ndarray::{ArrayD, IxDyn};

    fn raw() -> ArrayKey {
        ArrayKey::new("RAW")
    }

    fn source(data: ArrayData) -> Box<dyn BatchProvider> {
        let dtype = data.dtype();
        Box::new(MemorySource::new("source").with_array(
            raw(),
            Array::new(
                ArraySpec::provided(Some(Roi::new([0, 0], [4, 4])), Coordinate::from([1, 1]), dtype, true),
                data,
            ),
        ))
    }

    fn request() -> Request {
        Request::new().array(raw(), Roi::new([0, 0], [4, 4]))
    }

    #[test]
    fn test_uint8_is_scaled_to_unit_range() {
        let data = ArrayData::Uint8(ArrayD::from_elem(IxDyn(&[4, 4]), 255));
        let mut node = Filtered::new(source(data), Normalize::new(raw()));
        node.setup().unwrap();
        assert_eq!(node.spec().array(&raw()).unwrap().dtype, Some(DataType::Float32));

        let batch = node.provide(request()).unwrap();
        match &batch.array(&raw()).unwrap().data {
            ArrayData::Float32(a) => assert!(a.iter().all(|&v| (v - 1.0).abs() < 1e-6)),
            other => panic!("unexpected dtype {}", other.dtype()),
        }
    }

    #[test]
    fn test_float_outside_unit_range_needs_factor() {
        let data = ArrayData::Float32(ArrayD::from_elem(IxDyn(&[4, 4]), 3.0));
        let mut node = Filtered::new(source(data.clone()), Normalize::new(raw()));
        node.setup().unwrap();
        assert!(matches!(node.provide(request()), Err(ProvideError::Process { .. })));

        let mut node = Filtered::new(source(data), Normalize::new(raw()).with_factor(0.5).with_dtype(DataType::Float64));
        node.setup().unwrap();
        let batch = node.provide(request()).unwrap();
        match &batch.array(&raw()).unwrap().data {
            ArrayData::Float64(a) => assert!(a.iter().all(|&v| (v - 1.5).abs() < 1e-12)),
            other => panic!("unexpected dtype {}", other.dtype()),
        }
    }

    #[test]
    fn test_uint16_without_factor_fails() {
        let data = ArrayData::Uint16(ArrayD::zeros(IxDyn(&[4, 4])));
        let mut node = Filtered::new(source(data), Normalize::new(raw()));
        node.setup().unwrap();
        let error = node.provide(request()).err().unwrap();
        assert!(error.to_string().contains("uint16"));
    }

    #[test]
    fn test_scale_shift() {
        let data = ArrayData::Uint8(ArrayD::from_elem(IxDyn(&[4, 4]), 51));
        let upstream = Filtered::new(source(data), Normalize::new(raw()));
        let mut node = Filtered::new(Box::new(upstream), IntensityScaleShift::new(raw(), 2.0, -1.0));
        node.setup().unwrap();

        let batch = node.provide(request()).unwrap();
        match &batch.array(&raw()).unwrap().data {
            ArrayData::Float32(a) => assert!(a.iter().all(|&v| (v + 0.6).abs() < 1e-5)),
            other => panic!("unexpected dtype {}", other.dtype()),
        }
    }

    #[test]
    fn test_missing_key_fails_setup() {
        let data = ArrayData::Uint8(ArrayD::zeros(IxDyn(&[4, 4])));
        let mut node = Filtered::new(source(data), Normalize::new(ArrayKey::new("GT")));
        assert!(matches!(node.setup(), Err(SetupError::MissingKey { .. })));
    }
}
