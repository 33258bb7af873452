//! Parallel execution: prefetching batches on worker threads.
//!
//! - `precache`: [`PreCache`], a bounded cache filled by a worker pool
//! - `stats`: [`CacheStats`] counters

pub mod precache;
pub mod stats;

pub use precache::{PreCache, PreCacheOptions, RequestFactory};
pub use stats::CacheStats;
