//! Pipeline nodes: sources and filters.
//!
//! - [`MemorySource`]: serves in-memory arrays and point sets
//! - [`RandomLocation`]: moves requests to random locations upstream
//! - [`Normalize`], [`IntensityScaleShift`]: intensity filters

pub mod integral;
pub mod normalize;
pub mod random_location;
pub mod source;

pub use integral::IntegralTable;
pub use normalize::{IntensityScaleShift, Normalize};
pub use random_location::{RandomLocation, RandomLocationConfig};
pub use source::MemorySource;
