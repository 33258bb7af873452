//! Random choice between several upstream branches.

use crate::core::batch::{Batch, Request};
use crate::core::error::{ProvideError, ProvideResult, SetupError, SetupResult};
use crate::core::provider::{check_request, BatchProvider};
use crate::core::roi::Roi;
use crate::core::spec::ProviderSpec;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Forwards every request to one of its branches, chosen uniformly.
///
/// Advertises the keys every branch provides. Where several branches bound a
/// key, the advertised Roi is the intersection of their Rois; unbounded
/// branches do not constrain it.
pub struct RandomProvider {
    branches: Vec<Box<dyn BatchProvider>>,
    rng: Mutex<StdRng>,
    spec: ProviderSpec,
    ready: bool,
}

fn merge_roi(a: Option<&Roi>, b: Option<&Roi>) -> Option<Roi> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.intersect(b)),
        (Some(r), None) | (None, Some(r)) => Some(r.clone()),
        (None, None) => None,
    }
}

impl RandomProvider {
    /// Choose between `branches`, seeding from entropy if `seed` is `None`.
    pub fn new(branches: Vec<Box<dyn BatchProvider>>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            branches,
            rng: Mutex::new(rng),
            spec: ProviderSpec::new(),
            ready: false,
        }
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether there are no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    fn merge_specs(&self) -> SetupResult<ProviderSpec> {
        let (first, rest) = self
            .branches
            .split_first()
            .ok_or(SetupError::EmptyPipeline)?;
        let mut spec = first.spec().clone();

        for branch in rest {
            let other = branch.spec();
            spec.arrays.retain(|key, _| other.array(key).is_some());
            spec.points.retain(|key, _| other.points(key).is_some());

            for (key, array) in spec.arrays.iter_mut() {
                if let Some(theirs) = other.array(key) {
                    if array.voxel_size.is_some() && theirs.voxel_size.is_some() && array.voxel_size != theirs.voxel_size {
                        return Err(SetupError::invalid(
                            self.name(),
                            key.as_str(),
                            "branches disagree on the voxel size",
                        ));
                    }
                    array.roi = merge_roi(array.roi.as_ref(), theirs.roi.as_ref());
                }
            }
            for (key, points) in spec.points.iter_mut() {
                if let Some(theirs) = other.points(key) {
                    points.roi = merge_roi(points.roi.as_ref(), theirs.roi.as_ref());
                }
            }
        }

        if spec.rois().flatten().any(|roi| roi.is_empty()) {
            return Err(SetupError::invalid(self.name(), "branches", "branch Rois do not overlap"));
        }
        Ok(spec)
    }
}

impl BatchProvider for RandomProvider {
    fn name(&self) -> &str {
        "random_provider"
    }

    fn setup(&mut self) -> SetupResult<()> {
        for branch in self.branches.iter_mut() {
            branch.setup()?;
        }
        self.spec = self.merge_specs()?;
        self.ready = true;
        info!("random provider over {} branch(es)", self.branches.len());
        Ok(())
    }

    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn provide(&self, request: Request) -> ProvideResult<Batch> {
        if !self.ready {
            return Err(ProvideError::NotSetUp {
                node: self.name().to_string(),
            });
        }
        check_request(&self.spec, &request)?;
        let choice = self.rng.lock().gen_range(0..self.branches.len());
        debug!("random provider chose branch {}", choice);
        self.branches[choice].provide(request)
    }

    fn teardown(&mut self) {
        for branch in self.branches.iter_mut() {
            branch.teardown();
        }
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::array::{Array, ArrayData};
    use crate::core::coordinate::Coordinate;
    use crate::core::keys::ArrayKey;
    use crate::core::spec::{ArraySpec, DataType};
    use crate::nodes::MemorySource;
    use ndarray::{ArrayD, IxDyn};

    fn branch(value: u8, offset: i64, with_gt: bool) -> Box<dyn BatchProvider> {
        let spec = ArraySpec::provided(Some(Roi::new([offset, 0], [10, 10])), Coordinate::from([1, 1]), DataType::Uint8, true);
        let mut source = MemorySource::new(format!("branch-{}", value)).with_array(
            ArrayKey::new("RAW"),
            Array::new(spec.clone(), ArrayData::Uint8(ArrayD::from_elem(IxDyn(&[10, 10]), value))),
        );
        if with_gt {
            source = source.with_array(
                ArrayKey::new("GT"),
                Array::new(spec, ArrayData::Uint8(ArrayD::zeros(IxDyn(&[10, 10])))),
            );
        }
        Box::new(source)
    }

    #[test]
    fn test_advertises_common_keys_with_intersected_rois() {
        let mut provider = RandomProvider::new(vec![branch(1, 0, true), branch(2, 5, false)], Some(0));
        provider.setup().unwrap();

        let spec = provider.spec();
        assert!(spec.array(&ArrayKey::new("GT")).is_none());
        assert_eq!(spec.array(&ArrayKey::new("RAW")).unwrap().roi, Some(Roi::new([5, 0], [5, 10])));
    }

    #[test]
    fn test_chooses_every_branch() {
        let mut provider = RandomProvider::new(vec![branch(1, 0, false), branch(2, 0, false)], Some(3));
        provider.setup().unwrap();

        let mut seen = [false; 3];
        for _ in 0..100 {
            let batch = provider
                .provide(Request::new().array(ArrayKey::new("RAW"), Roi::new([0, 0], [2, 2])))
                .unwrap();
            match &batch.array(&ArrayKey::new("RAW")).unwrap().data {
                ArrayData::Uint8(a) => seen[a[[0, 0]] as usize] = true,
                other => panic!("unexpected dtype {}", other.dtype()),
            }
        }
        assert!(seen[1] && seen[2]);
    }

    #[test]
    fn test_disjoint_branches_fail_setup() {
        let mut provider = RandomProvider::new(vec![branch(1, 0, false), branch(2, 20, false)], None);
        assert!(matches!(provider.setup(), Err(SetupError::InvalidParameter { .. })));
    }

    #[test]
    fn test_no_branches() {
        let mut provider = RandomProvider::new(Vec::new(), None);
        assert!(matches!(provider.provide(Request::new()), Err(ProvideError::NotSetUp { .. })));
        assert!(matches!(provider.setup(), Err(SetupError::EmptyPipeline)));
        assert!(matches!(provider.provide(Request::new()), Err(ProvideError::NotSetUp { .. })));
    }
}
