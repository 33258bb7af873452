//! # Voxflow - Sampling Pipelines for Volumetric Data
//!
//! Voxflow feeds training loops with sub-volumes of large N-dimensional
//! images (electron microscopy stacks, label volumes, point annotations).
//! A pipeline is a chain of nodes; a consumer sends a [`Request`] naming the
//! arrays and point sets it wants and the region of each, and receives a
//! [`Batch`] with exactly that data.
//!
//! ## Features
//!
//! - **Region algebra**: half-open N-dimensional [`Roi`]s in world units
//! - **Random sampling**: [`RandomLocation`] moves requests to random valid
//!   locations, optionally requiring masked-in voxels or non-empty points
//! - **Prefetching**: [`PreCache`] produces batches ahead of time on a
//!   bounded worker pool
//! - **Extensible**: implement [`BatchFilter`] for augmentations and
//!   [`BatchProvider`] for new data sources
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voxflow::prelude::*;
//!
//! let raw = ArrayKey::new("RAW");
//! let source = MemorySource::new("volume").with_array(raw.clone(), volume);
//!
//! let request = Request::new().array(raw.clone(), Roi::new([0, 0, 0], [32, 32, 32]));
//! let factory = {
//!     let request = request.clone();
//!     move || request.clone()
//! };
//!
//! let mut pipeline = Pipeline::new(source)
//!     + Normalize::new(raw.clone())
//!     + RandomLocation::new();
//! let mut pipeline = pipeline.precache(PreCacheOptions::new().with_workers(4), factory);
//!
//! pipeline.setup()?;
//! for _ in 0..100 {
//!     let batch = pipeline.request_batch(request.clone())?;
//!     // train on batch...
//! }
//! pipeline.teardown();
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: geometry, specs, data containers, node traits, errors
//! - [`nodes`]: sources and filters
//! - [`pipeline`]: composing nodes into pipelines
//! - [`execution`]: prefetching on worker threads
//! - [`config`]: TOML configuration
//!
//! [`Request`]: core::Request
//! [`Batch`]: core::Batch
//! [`Roi`]: core::Roi
//! [`RandomLocation`]: nodes::RandomLocation
//! [`PreCache`]: execution::PreCache
//! [`BatchFilter`]: core::BatchFilter
//! [`BatchProvider`]: core::BatchProvider

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod execution;
pub mod nodes;
pub mod pipeline;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use voxflow::prelude::*;
/// ```
pub mod prelude {
    // Geometry
    pub use crate::core::coordinate::Coordinate;
    pub use crate::core::roi::Roi;

    // Keys, specs and data
    pub use crate::core::array::{Array, ArrayData};
    pub use crate::core::batch::{Batch, BatchId, Request};
    pub use crate::core::keys::{AnyKey, ArrayKey, PointsKey};
    pub use crate::core::points::{Point, PointSet, Points};
    pub use crate::core::spec::{ArraySpec, DataType, PointsSpec, ProviderSpec};

    // Node traits
    pub use crate::core::provider::{BatchFilter, BatchProvider, Filtered};

    // Errors
    pub use crate::core::error::{
        ConfigError, ProvideError, ProvideResult, SetupError, SetupResult, VoxflowError, VoxflowResult,
    };

    // Nodes
    pub use crate::nodes::{IntensityScaleShift, MemorySource, Normalize, RandomLocation, RandomLocationConfig};

    // Pipelines
    pub use crate::pipeline::{Pipeline, RandomProvider};

    // Execution
    pub use crate::execution::{CacheStats, PreCache, PreCacheOptions};

    // Configuration
    pub use crate::config::PipelineConfig;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "voxflow");
    }

    #[test]
    fn test_prelude_pipeline() {
        let raw = ArrayKey::new("RAW");
        let source = MemorySource::new("volume").with_array(
            raw.clone(),
            Array::new(
                ArraySpec::provided(Some(Roi::new([0, 0], [8, 8])), Coordinate::from([1, 1]), DataType::Uint8, true),
                ArrayData::Uint8(ArrayD::zeros(IxDyn(&[8, 8]))),
            ),
        );

        let mut pipeline = Pipeline::new(source) + RandomLocation::new().with_seed(0);
        pipeline.setup().unwrap();
        let batch = pipeline
            .request_batch(Request::new().array(raw.clone(), Roi::new([0, 0], [3, 3])))
            .unwrap();
        assert_eq!(batch.array(&raw).unwrap().data.shape(), &[3, 3]);
    }

    #[test]
    fn test_spec_serializes_to_json() {
        let mut spec = ProviderSpec::new();
        spec.add_array(
            ArrayKey::new("RAW"),
            ArraySpec::provided(Some(Roi::new([0, 0], [8, 8])), Coordinate::from([2, 2]), DataType::Float32, true),
        );
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"RAW\""));
        assert!(json.contains("float32"));

        let back: ProviderSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
