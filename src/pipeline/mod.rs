//! Building and running pipelines.
//!
//! A [`Pipeline`] is a chain of nodes rooted at a source. Filters are
//! appended with [`Pipeline::then`] or the `+` operator; the last node added
//! is the one requests enter:
//!
//! ```rust,ignore
//! use voxflow::prelude::*;
//!
//! let mut pipeline = Pipeline::new(source)
//!     + Normalize::new(ArrayKey::new("RAW"))
//!     + RandomLocation::new();
//! pipeline.setup()?;
//!
//! let request = Request::new().array(ArrayKey::new("RAW"), Roi::new([0, 0, 0], [64, 64, 64]));
//! let batch = pipeline.request_batch(request)?;
//! ```

pub mod random_provider;

pub use random_provider::RandomProvider;

use crate::core::batch::{Batch, Request};
use crate::core::error::{ProvideError, ProvideResult, SetupResult};
use crate::core::provider::{BatchFilter, BatchProvider, Filtered};
use crate::core::spec::ProviderSpec;
use crate::execution::{PreCache, PreCacheOptions};
use log::info;
use std::ops::Add;

/// A chain of nodes, addressed through its most downstream node.
pub struct Pipeline {
    root: Box<dyn BatchProvider>,
    set_up: bool,
}

impl Pipeline {
    /// Start a pipeline at `source`.
    pub fn new(source: impl BatchProvider + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    /// Start a pipeline at an already boxed node.
    pub fn from_boxed(root: Box<dyn BatchProvider>) -> Self {
        Self { root, set_up: false }
    }

    /// Append `filter` downstream.
    pub fn then<F: BatchFilter>(self, filter: F) -> Self {
        Self::from_boxed(Box::new(Filtered::new(self.root, filter)))
    }

    /// Prefetch batches made by `factory` on worker threads.
    pub fn precache<F>(self, options: PreCacheOptions, factory: F) -> Self
    where
        F: Fn() -> Request + Send + Sync + 'static,
    {
        Self::from_boxed(Box::new(PreCache::new(self.root, options, factory)))
    }

    /// Join `branches`, serving each request from one chosen at random.
    pub fn random_provider(branches: Vec<Pipeline>, seed: Option<u64>) -> Self {
        let roots = branches.into_iter().map(|p| p.root).collect();
        Self::new(RandomProvider::new(roots, seed))
    }

    /// Name of the most downstream node.
    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Set up every node, sources first.
    pub fn setup(&mut self) -> SetupResult<()> {
        self.root.setup()?;
        self.set_up = true;
        info!("pipeline ready, provides:\n{}", self.root.spec());
        Ok(())
    }

    /// Whether [`setup`](Self::setup) succeeded.
    pub fn is_set_up(&self) -> bool {
        self.set_up
    }

    /// What the pipeline provides.
    pub fn spec(&self) -> &ProviderSpec {
        self.root.spec()
    }

    /// Request a batch. Voxel sizes left open are taken from what the pipeline provides.
    pub fn request_batch(&self, request: Request) -> ProvideResult<Batch> {
        if !self.set_up {
            return Err(ProvideError::NotSetUp {
                node: self.root.name().to_string(),
            });
        }
        let mut request = request;
        request.complete_from(self.root.spec());
        self.root.provide(request)
    }

    /// Release resources held by the nodes.
    pub fn teardown(&mut self) {
        if self.set_up {
            self.root.teardown();
            self.set_up = false;
        }
    }
}

impl<F: BatchFilter> Add<F> for Pipeline {
    type Output = Pipeline;

    fn add(self, filter: F) -> Pipeline {
        self.then(filter)
    }
}

impl BatchProvider for Pipeline {
    fn name(&self) -> &str {
        Pipeline::name(self)
    }

    fn setup(&mut self) -> SetupResult<()> {
        Pipeline::setup(self)
    }

    fn spec(&self) -> &ProviderSpec {
        Pipeline::spec(self)
    }

    fn provide(&self, request: Request) -> ProvideResult<Batch> {
        self.request_batch(request)
    }

    fn teardown(&mut self) {
        Pipeline::teardown(self)
    }
}
