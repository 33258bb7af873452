//! The node interfaces.
//!
//! Every node in a pipeline is a [`BatchProvider`]: it is set up once,
//! advertises a [`ProviderSpec`], and turns [`Request`]s into [`Batch`]es.
//!
//! Most nodes are filters with exactly one upstream. They implement the
//! smaller [`BatchFilter`] trait and are wrapped in [`Filtered`], which owns
//! the upstream and runs the common protocol:
//!
//! 1. **Setup** (leaf first): set up the upstream, then derive the filter's
//!    own spec from the upstream spec.
//! 2. **Prepare**: check the request against the advertised spec, let the
//!    filter rewrite a copy of it (e.g. enlarge or move Rois).
//! 3. **Provide upstream** with the rewritten request.
//! 4. **Process**: let the filter transform the returned batch against the
//!    original request, then drop what the downstream did not ask for.
//!
//! # Thread Safety
//!
//! `provide` takes `&self` and providers are `Send + Sync`, so a prefetching
//! node can run several traversals through the same upstream concurrently.
//! Nodes keep per-call state on the stack (the filter `Context`) and guard
//! anything else, such as random number generators, with a lock.

use crate::core::batch::{Batch, Request};
use crate::core::error::{ProvideError, ProvideResult, SetupResult};
use crate::core::keys::AnyKey;
use crate::core::spec::ProviderSpec;
use log::debug;

/// A node that can provide batches.
pub trait BatchProvider: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Set up this node and everything upstream of it.
    ///
    /// Called exactly once before the first [`provide`](Self::provide).
    fn setup(&mut self) -> SetupResult<()>;

    /// What this node can provide. Only meaningful after setup.
    fn spec(&self) -> &ProviderSpec;

    /// Materialize a batch for `request`.
    ///
    /// The returned batch holds exactly the requested keys, each with the
    /// requested Roi.
    fn provide(&self, request: Request) -> ProvideResult<Batch>;

    /// Release resources (threads, handles). Called at most once.
    fn teardown(&mut self) {}
}

impl BatchProvider for Box<dyn BatchProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn setup(&mut self) -> SetupResult<()> {
        (**self).setup()
    }

    fn spec(&self) -> &ProviderSpec {
        (**self).spec()
    }

    fn provide(&self, request: Request) -> ProvideResult<Batch> {
        (**self).provide(request)
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

/// A node with a single upstream that rewrites requests and/or batches.
///
/// `Context` carries whatever `prepare` decided (e.g. a random shift) over to
/// `process` for the same call.
pub trait BatchFilter: Send + Sync + 'static {
    /// Per-call state passed from `prepare` to `process`.
    type Context: Send;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Derive this filter's spec from its (already set up) upstream.
    ///
    /// The default advertises the upstream spec unchanged.
    fn setup(&mut self, upstream: &dyn BatchProvider) -> SetupResult<ProviderSpec> {
        Ok(upstream.spec().clone())
    }

    /// Rewrite `request` before it is sent upstream.
    fn prepare(&self, upstream: &dyn BatchProvider, request: &mut Request) -> ProvideResult<Self::Context>;

    /// Transform `batch` so that it satisfies the original `request`.
    fn process(&self, batch: &mut Batch, request: &Request, context: Self::Context) -> ProvideResult<()>;
}

/// Check that every entry of `request` is advertised by `spec` with a Roi
/// that contains the requested one.
pub fn check_request(spec: &ProviderSpec, request: &Request) -> ProvideResult<()> {
    for (key, requested) in &request.arrays {
        let provided = spec.array(key).ok_or_else(|| ProvideError::KeyNotProvided {
            key: AnyKey::Array(key.clone()),
        })?;
        check_roi(AnyKey::Array(key.clone()), requested.roi.as_ref(), provided.roi.as_ref())?;
    }
    for (key, requested) in &request.points {
        let provided = spec.points(key).ok_or_else(|| ProvideError::KeyNotProvided {
            key: AnyKey::Points(key.clone()),
        })?;
        check_roi(AnyKey::Points(key.clone()), requested.roi.as_ref(), provided.roi.as_ref())?;
    }
    Ok(())
}

fn check_roi(key: AnyKey, requested: Option<&crate::core::roi::Roi>, provided: Option<&crate::core::roi::Roi>) -> ProvideResult<()> {
    let requested = requested.ok_or_else(|| ProvideError::MissingRoi { key: key.clone() })?;
    match provided {
        Some(provided) if !provided.contains_roi(requested) => Err(ProvideError::RoiNotCovered {
            key,
            requested: requested.clone(),
            provided: provided.clone(),
        }),
        _ => Ok(()),
    }
}

/// Check that `batch` answers `request` with exactly the requested Rois.
pub fn check_batch(node: &str, batch: &Batch, request: &Request) -> ProvideResult<()> {
    for (key, requested) in &request.arrays {
        let expected = match &requested.roi {
            Some(roi) => roi,
            None => continue,
        };
        let got = batch.array(key).and_then(|a| a.roi());
        if got != Some(expected) {
            return Err(ProvideError::RoiMismatch {
                node: node.to_string(),
                key: AnyKey::Array(key.clone()),
                expected: expected.clone(),
                got: describe(got),
            });
        }
    }
    for (key, requested) in &request.points {
        let expected = match &requested.roi {
            Some(roi) => roi,
            None => continue,
        };
        let got = batch.points(key).and_then(|p| p.spec.roi.as_ref());
        if got != Some(expected) {
            return Err(ProvideError::RoiMismatch {
                node: node.to_string(),
                key: AnyKey::Points(key.clone()),
                expected: expected.clone(),
                got: describe(got),
            });
        }
    }
    Ok(())
}

fn describe(roi: Option<&crate::core::roi::Roi>) -> String {
    roi.map(|r| r.to_string()).unwrap_or_else(|| "nothing".to_string())
}

/// A [`BatchFilter`] bound to its upstream.
pub struct Filtered<F: BatchFilter> {
    filter: F,
    upstream: Box<dyn BatchProvider>,
    spec: Option<ProviderSpec>,
    empty: ProviderSpec,
}

impl<F: BatchFilter> Filtered<F> {
    /// Place `filter` downstream of `upstream`.
    pub fn new(upstream: Box<dyn BatchProvider>, filter: F) -> Self {
        Self {
            filter,
            upstream,
            spec: None,
            empty: ProviderSpec::new(),
        }
    }

    /// The wrapped filter.
    pub fn filter(&self) -> &F {
        &self.filter
    }
}

impl<F: BatchFilter> BatchProvider for Filtered<F> {
    fn name(&self) -> &str {
        self.filter.name()
    }

    fn setup(&mut self) -> SetupResult<()> {
        self.upstream.setup()?;
        let spec = self.filter.setup(self.upstream.as_ref())?;
        debug!("{} advertises:\n{}", self.filter.name(), spec);
        self.spec = Some(spec);
        Ok(())
    }

    fn spec(&self) -> &ProviderSpec {
        self.spec.as_ref().unwrap_or(&self.empty)
    }

    fn provide(&self, request: Request) -> ProvideResult<Batch> {
        let spec = self.spec.as_ref().ok_or_else(|| ProvideError::NotSetUp {
            node: self.filter.name().to_string(),
        })?;
        check_request(spec, &request)?;

        let mut upstream_request = request.clone();
        let context = self.filter.prepare(self.upstream.as_ref(), &mut upstream_request)?;
        debug!("{} requests upstream: {}", self.filter.name(), upstream_request);

        let mut batch = self.upstream.provide(upstream_request)?;
        self.filter.process(&mut batch, &request, context)?;
        batch.retain_requested(&request);
        check_batch(self.filter.name(), &batch, &request)?;
        Ok(batch)
    }

    fn teardown(&mut self) {
        self.upstream.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::array::{Array, ArrayData};
    use crate::core::coordinate::Coordinate;
    use crate::core::keys::ArrayKey;
    use crate::core::roi::Roi;
    use crate::core::spec::{ArraySpec, DataType};
    use crate::nodes::MemorySource;
    use ndarray::ArrayD;

    fn source() -> MemorySource {
        let data = ArrayD::<u8>::from_elem(ndarray::IxDyn(&[20, 20]), 7);
        MemorySource::new("source").with_array(
            ArrayKey::new("RAW"),
            Array::new(
                ArraySpec::provided(Some(Roi::new([0, 0], [20, 20])), Coordinate::from([1, 1]), DataType::Uint8, true),
                ArrayData::Uint8(data),
            ),
        )
    }

    /// Asks upstream for a grown Roi and crops back, like an augmentation
    /// that needs context around the requested region.
    struct Grow;

    impl BatchFilter for Grow {
        type Context = ();

        fn name(&self) -> &str {
            "grow"
        }

        fn prepare(&self, _upstream: &dyn BatchProvider, request: &mut Request) -> ProvideResult<()> {
            let one = Coordinate::splat(2, 1);
            request.map_rois(|r| r.grow(&one, &one));
            Ok(())
        }

        fn process(&self, batch: &mut Batch, request: &Request, _context: ()) -> ProvideResult<()> {
            for (key, spec) in &request.arrays {
                let roi = spec.roi.clone().unwrap();
                if let Some(array) = batch.arrays.get_mut(key) {
                    let shape: Vec<usize> = roi.shape().iter().map(|s| s as usize).collect();
                    let end: Vec<usize> = shape.iter().map(|s| s + 1).collect();
                    array.data = array.data.crop(&[1, 1], &end);
                    array.spec.roi = Some(roi);
                }
            }
            Ok(())
        }
    }

    /// Forgets to crop: the protocol must catch it.
    struct Sloppy;

    impl BatchFilter for Sloppy {
        type Context = ();

        fn name(&self) -> &str {
            "sloppy"
        }

        fn prepare(&self, _upstream: &dyn BatchProvider, request: &mut Request) -> ProvideResult<()> {
            request.map_rois(|r| r.grow(&Coordinate::splat(2, 1), &Coordinate::splat(2, 1)));
            Ok(())
        }

        fn process(&self, _batch: &mut Batch, _request: &Request, _context: ()) -> ProvideResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_filter_protocol_round_trip() {
        let mut node = Filtered::new(Box::new(source()), Grow);
        node.setup().unwrap();

        let roi = Roi::new([5, 5], [4, 4]);
        let batch = node.provide(Request::new().array(ArrayKey::new("RAW"), roi.clone())).unwrap();
        let raw = batch.array(&ArrayKey::new("RAW")).unwrap();
        assert_eq!(raw.roi(), Some(&roi));
        assert_eq!(raw.data.shape(), &[4, 4]);
    }

    #[test]
    fn test_filter_output_is_verified() {
        let mut node = Filtered::new(Box::new(source()), Sloppy);
        node.setup().unwrap();

        let result = node.provide(Request::new().array(ArrayKey::new("RAW"), Roi::new([5, 5], [4, 4])));
        assert!(matches!(result, Err(ProvideError::RoiMismatch { .. })));
    }

    #[test]
    fn test_request_outside_spec_fails_before_materialization() {
        let mut node = Filtered::new(Box::new(source()), Grow);
        node.setup().unwrap();

        let result = node.provide(Request::new().array(ArrayKey::new("RAW"), Roi::new([15, 15], [10, 10])));
        assert!(matches!(result, Err(ProvideError::RoiNotCovered { .. })));

        let result = node.provide(Request::new().array(ArrayKey::new("GT"), Roi::new([0, 0], [1, 1])));
        assert!(matches!(result, Err(ProvideError::KeyNotProvided { .. })));
    }

    #[test]
    fn test_provide_before_setup() {
        let node = Filtered::new(Box::new(source()), Grow);
        let result = node.provide(Request::new().array(ArrayKey::new("RAW"), Roi::new([0, 0], [1, 1])));
        assert!(matches!(result, Err(ProvideError::NotSetUp { .. })));
    }
}
