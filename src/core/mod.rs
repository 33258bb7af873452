//! Core types and traits for the Voxflow pipeline.
//!
//! This module contains the foundational types every node works with:
//! - Geometry ([`Coordinate`], [`Roi`])
//! - Keys and specs describing what is provided or requested
//! - Array and point data, requests and batches
//! - The node interfaces ([`BatchProvider`], [`BatchFilter`])
//! - Error types

pub mod array;
pub mod batch;
pub mod coordinate;
pub mod error;
pub mod keys;
pub mod points;
pub mod provider;
pub mod roi;
pub mod spec;

// Re-export commonly used types
pub use array::{Array, ArrayData};
pub use batch::{Batch, BatchId, Request, RequestSignature};
pub use coordinate::Coordinate;
pub use error::{ConfigError, ProvideError, SetupError, VoxflowError};
pub use keys::{AnyKey, ArrayKey, PointsKey};
pub use points::{Point, PointSet, Points};
pub use provider::{BatchFilter, BatchProvider, Filtered};
pub use roi::Roi;
pub use spec::{ArraySpec, DataType, PointsSpec, ProviderSpec};
