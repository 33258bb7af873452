//! Random sampling of request locations.
//!
//! [`RandomLocation`] moves every incoming request to a random place inside
//! the bounding box of its upstream, so the consumer can ask for a fixed
//! Roi (say, at the origin) and receive a different sub-volume each time.
//!
//! # Algorithm
//!
//! 1. For every requested key with a bounded upstream Roi, compute the shifts
//!    that keep the request inside that Roi; intersect over all keys.
//! 2. Restrict shifts to multiples of the least common multiple of the
//!    requested voxel sizes, so every array stays voxel-aligned.
//! 3. Draw shifts uniformly until all configured side constraints hold:
//!    - **mask**: at least `min_masked` of the mask voxels inside the shifted
//!      request are masked in (checked with a summed-area table built once
//!      during setup);
//!    - **non-empty points**: the shifted request contains at least one point
//!      of the given set. A point is chosen among those found and the shift
//!      is moved locally so that the point ends up inside the request.
//! 4. Shift the request. After upstream answered, reset all Rois to the
//!    requested ones and translate point locations into the requested frame.
//!
//! # Caller obligation
//!
//! `ensure_nonempty` asks upstream twice for overlapping regions and assumes
//! both answers agree. This only holds if everything upstream is
//! deterministic for a given location (e.g. no random provider upstream).

use crate::core::batch::{Batch, Request};
use crate::core::coordinate::Coordinate;
use crate::core::error::{ProvideError, ProvideResult, SetupError, SetupResult};
use crate::core::keys::{AnyKey, ArrayKey, PointsKey};
use crate::core::provider::{BatchFilter, BatchProvider};
use crate::core::roi::Roi;
use crate::core::spec::{ArraySpec, ProviderSpec};
use crate::nodes::integral::IntegralTable;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default cap on local searches for a shift that places a chosen point
/// inside the request.
pub const DEFAULT_MAX_LOCAL_TRIALS: usize = 100_000;

/// Default cap on outer shift draws before giving up on a request.
pub const DEFAULT_MAX_SHIFT_ATTEMPTS: usize = 10_000;

/// Configuration for [`RandomLocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomLocationConfig {
    /// Minimal ratio of masked-in voxels; `0` disables the mask check.
    pub min_masked: f64,
    /// The array used for mask checks.
    pub mask: Option<ArrayKey>,
    /// Only accept locations where this point set is non-empty.
    pub ensure_nonempty: Option<PointsKey>,
    /// Cap on local point-placement trials per outer draw.
    pub max_local_trials: usize,
    /// Cap on outer draws per request; `None` retries indefinitely.
    /// Written as `0` in configuration files.
    #[serde(with = "attempt_cap")]
    pub max_shift_attempts: Option<usize>,
    /// Seed for the random number generator; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for RandomLocationConfig {
    fn default() -> Self {
        Self {
            min_masked: 0.0,
            mask: None,
            ensure_nonempty: None,
            max_local_trials: DEFAULT_MAX_LOCAL_TRIALS,
            max_shift_attempts: Some(DEFAULT_MAX_SHIFT_ATTEMPTS),
            seed: None,
        }
    }
}

/// An optional attempt cap stored as a plain integer, `0` meaning no cap.
mod attempt_cap {
    use super::*;

    pub fn serialize<S>(cap: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(cap.unwrap_or(0) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let cap = usize::deserialize(deserializer)?;
        Ok(Some(cap).filter(|&n| n > 0))
    }
}

/// State prepared during setup for mask checks.
struct MaskIndex {
    key: ArrayKey,
    voxel_size: Coordinate,
    /// Offset of the mask array in voxel units.
    voxel_offset: Coordinate,
    table: IntegralTable,
}

/// Chooses a random location inside the upstream bounding box for each
/// request.
pub struct RandomLocation {
    config: RandomLocationConfig,
    rng: Mutex<StdRng>,
    upstream_spec: ProviderSpec,
    upstream_roi: Option<Roi>,
    mask: Option<MaskIndex>,
}

impl RandomLocation {
    /// Sample without side constraints.
    pub fn new() -> Self {
        Self::from_config(RandomLocationConfig::default())
    }

    /// Create from a configuration.
    pub fn from_config(mut config: RandomLocationConfig) -> Self {
        config.max_shift_attempts = config.max_shift_attempts.filter(|&n| n > 0);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
            upstream_spec: ProviderSpec::new(),
            upstream_roi: None,
            mask: None,
        }
    }

    /// Require at least `min_masked` masked-in voxels of `mask`.
    pub fn with_mask(mut self, mask: ArrayKey, min_masked: f64) -> Self {
        self.config.mask = Some(mask);
        self.config.min_masked = min_masked;
        self
    }

    /// Require a non-empty `points` set in every batch.
    pub fn ensure_nonempty(mut self, points: PointsKey) -> Self {
        self.config.ensure_nonempty = Some(points);
        self
    }

    /// Seed the random number generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Set the local point-placement trial cap.
    pub fn with_max_local_trials(mut self, trials: usize) -> Self {
        self.config.max_local_trials = trials;
        self
    }

    /// Set the outer attempt cap; `None` (or `Some(0)`) retries indefinitely.
    pub fn with_max_shift_attempts(mut self, attempts: Option<usize>) -> Self {
        self.config.max_shift_attempts = attempts.filter(|&n| n > 0);
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &RandomLocationConfig {
        &self.config
    }

    fn mask_enabled(&self) -> bool {
        self.config.mask.is_some() && self.config.min_masked > 0.0
    }

    fn build_mask_index(&self, upstream: &dyn BatchProvider, key: &ArrayKey) -> SetupResult<MaskIndex> {
        let spec = self.upstream_spec.array(key).ok_or_else(|| SetupError::MissingKey {
            node: self.name().to_string(),
            key: AnyKey::Array(key.clone()),
        })?;
        let roi = spec.roi.clone().ok_or_else(|| SetupError::Unbounded {
            node: self.name().to_string(),
        })?;
        let voxel_size = spec
            .voxel_size
            .clone()
            .ok_or_else(|| SetupError::invalid(self.name(), "mask", format!("{} has no voxel size", key)))?;

        info!("requesting complete mask {} in {}...", key, roi);
        let mut request = Request::new();
        request.add_array(key.clone(), ArraySpec::with_roi(roi.clone()).voxel_size(voxel_size.clone()));
        let batch = upstream
            .provide(request)
            .map_err(|e| SetupError::upstream(self.name(), e))?;
        let mask = batch
            .array(key)
            .ok_or_else(|| SetupError::upstream(self.name(), ProvideError::KeyNotProvided { key: AnyKey::Array(key.clone()) }))?;

        info!("allocating mask integral array...");
        let table = IntegralTable::new(&mask.data);
        Ok(MaskIndex {
            key: key.clone(),
            voxel_offset: roi.offset() / &voxel_size,
            voxel_size,
            table,
        })
    }

    /// Draw a point uniformly from `roi`. The Roi must not be empty.
    fn sample(&self, roi: &Roi) -> Coordinate {
        let mut rng = self.rng.lock();
        let begin = roi.begin();
        let end = roi.end();
        Coordinate::new(
            begin
                .iter()
                .zip(end.iter())
                .map(|(b, e)| rng.gen_range(b..e))
                .collect::<Vec<_>>(),
        )
    }

    fn choose_index(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }

    /// The region of shifts keeping every requested Roi inside its upstream
    /// Roi.
    fn feasible_shifts(&self, request: &Request) -> ProvideResult<Roi> {
        let mut shift_roi: Option<Roi> = None;
        let mut intersect = |provided: &Roi, requested: &Roi| {
            let ones = Coordinate::splat(requested.dims(), 1);
            let type_shift_roi = provided
                .shift(&-requested.begin())
                .grow(&Coordinate::zeros(requested.dims()), &-(requested.shape() - &ones));
            shift_roi = Some(match shift_roi.take() {
                None => type_shift_roi,
                Some(roi) => roi.intersect(&type_shift_roi),
            });
        };

        for (key, spec) in &request.arrays {
            let provided = self.upstream_spec.array(key).ok_or_else(|| ProvideError::KeyNotProvided {
                key: AnyKey::Array(key.clone()),
            })?;
            let requested = spec.roi.as_ref().ok_or_else(|| ProvideError::MissingRoi {
                key: AnyKey::Array(key.clone()),
            })?;
            if let Some(provided) = &provided.roi {
                intersect(provided, requested);
            }
        }
        for (key, spec) in &request.points {
            let provided = self.upstream_spec.points(key).ok_or_else(|| ProvideError::KeyNotProvided {
                key: AnyKey::Points(key.clone()),
            })?;
            let requested = spec.roi.as_ref().ok_or_else(|| ProvideError::MissingRoi {
                key: AnyKey::Points(key.clone()),
            })?;
            if let Some(provided) = &provided.roi {
                intersect(provided, requested);
            }
        }

        match shift_roi {
            None => Err(ProvideError::Unsatisfiable {
                reason: "no requested key is bounded upstream".to_string(),
            }),
            Some(roi) if roi.is_empty() => Err(ProvideError::Unsatisfiable {
                reason: "no location covers all requested rois".to_string(),
            }),
            Some(roi) => Ok(roi),
        }
    }

    /// Try to move `shift` so that a point of the `ensure_nonempty` set ends
    /// up inside the request. Returns `None` to reject this outer draw.
    fn place_point(
        &self,
        upstream: &dyn BatchProvider,
        key: &PointsKey,
        request: &Request,
        shift: &Coordinate,
        shift_roi: &Roi,
        step: Option<&Coordinate>,
    ) -> ProvideResult<Option<Coordinate>> {
        let focused = request
            .points
            .get(key)
            .and_then(|s| s.roi.as_ref())
            .ok_or_else(|| ProvideError::MissingRoi { key: AnyKey::Points(key.clone()) })?;

        let points_request = Request::new().points(key.clone(), focused.shift(shift));
        let batch = upstream.provide(points_request)?;
        let points = match batch.points(key) {
            Some(points) if !points.is_empty() => points,
            _ => return Ok(None),
        };

        let (_, chosen) = points
            .data
            .iter()
            .nth(self.choose_index(points.len()))
            .ok_or_else(|| ProvideError::Unsatisfiable {
                reason: format!("point set {} changed while sampling", key),
            })?;
        let location = &chosen.location;

        // local shifts l with location in focused.shift(shift + l)
        let distance = &(location - shift) - focused.begin();
        let ones = Coordinate::splat(distance.dims(), 1);
        let local_roi = Roi::new(&(&distance - focused.shape()) + &ones, focused.shape().clone());

        for _ in 0..self.config.max_local_trials {
            let candidate = shift + &self.sample(&local_roi);
            let aligned = step.map_or(true, |s| candidate.is_multiple_of(s));
            if aligned && shift_roi.contains(&candidate) {
                debug_assert!(focused.shift(&candidate).contains(location));
                return Ok(Some(candidate));
            }
        }
        debug!("no local shift found for point at {}", location);
        Ok(None)
    }

    fn mask_ratio(&self, mask: &MaskIndex, request: &Request, shift: &Coordinate) -> ProvideResult<f64> {
        let requested = request
            .arrays
            .get(&mask.key)
            .and_then(|s| s.roi.as_ref())
            .ok_or_else(|| ProvideError::Unsatisfiable {
                reason: format!("mask checks need {} in the request", mask.key),
            })?;
        let in_array = (&requested.shift(shift) / &mask.voxel_size).shift(&-&mask.voxel_offset);
        if !mask.table.covers(&in_array) {
            return Ok(0.0);
        }
        Ok(mask.table.ratio(&in_array))
    }
}

impl Default for RandomLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchFilter for RandomLocation {
    type Context = Coordinate;

    fn name(&self) -> &str {
        "random_location"
    }

    fn setup(&mut self, upstream: &dyn BatchProvider) -> SetupResult<ProviderSpec> {
        self.upstream_spec = upstream.spec().clone();
        for (key, spec) in &self.upstream_spec.arrays {
            if let Some(voxel_size) = &spec.voxel_size {
                if !voxel_size.iter().all(|v| v > 0) {
                    return Err(SetupError::invalid(
                        self.name(),
                        key.as_str(),
                        format!("voxel size {} must be positive", voxel_size),
                    ));
                }
            }
        }
        self.upstream_roi = self.upstream_spec.total_roi();
        if self.upstream_roi.is_none() {
            return Err(SetupError::Unbounded {
                node: self.name().to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.config.min_masked) {
            return Err(SetupError::invalid(self.name(), "min_masked", "must lie in [0, 1]"));
        }
        if let Some(key) = &self.config.ensure_nonempty {
            if self.upstream_spec.points(key).is_none() {
                return Err(SetupError::MissingKey {
                    node: self.name().to_string(),
                    key: AnyKey::Points(key.clone()),
                });
            }
        }
        if self.mask_enabled() {
            if let Some(key) = self.config.mask.clone() {
                self.mask = Some(self.build_mask_index(upstream, &key)?);
            }
        }

        // offsets are chosen here, downstream sees no bounds
        let mut spec = self.upstream_spec.clone();
        spec.clear_rois();
        Ok(spec)
    }

    fn prepare(&self, upstream: &dyn BatchProvider, request: &mut Request) -> ProvideResult<Coordinate> {
        let shift_roi = self.feasible_shifts(request)?;
        debug!("valid shifts for request in {}", shift_roi);

        let step = if request.arrays.is_empty() {
            None
        } else {
            self.upstream_spec.lcm_voxel_size(request.arrays.keys())
        };
        let sample_roi = match &step {
            Some(step) => {
                debug!("restricting random locations to multiples of voxel size {}", step);
                let grid = shift_roi.snap_to_grid(step);
                if grid.is_empty() {
                    return Err(ProvideError::Unsatisfiable {
                        reason: format!("no voxel-aligned location in {} for voxel size {}", shift_roi, step),
                    });
                }
                grid
            }
            None => shift_roi.clone(),
        };

        let mut attempts = 0usize;
        let shift = loop {
            if let Some(max) = self.config.max_shift_attempts {
                if attempts >= max {
                    return Err(ProvideError::TrialsExhausted { attempts });
                }
            }
            attempts += 1;

            let mut shift = self.sample(&sample_roi);
            if let Some(step) = &step {
                shift = &shift * step;
            }
            debug!("random shift: {}", shift);

            if let Some(key) = &self.config.ensure_nonempty {
                match self.place_point(upstream, key, request, &shift, &shift_roi, step.as_ref())? {
                    Some(placed) => shift = placed,
                    None => continue,
                }
            }

            if let Some(mask) = &self.mask {
                let ratio = self.mask_ratio(mask, request, &shift)?;
                debug!("mask ratio is {}", ratio);
                if ratio < self.config.min_masked {
                    continue;
                }
            }

            break shift;
        };
        debug!("good location found after {} attempt(s): {}", attempts, shift);

        request.map_rois(|roi| roi.shift(&shift));
        if let Some(upstream_roi) = &self.upstream_roi {
            debug_assert!(request.rois().flatten().all(|roi| upstream_roi.contains_roi(roi)));
        }
        Ok(shift)
    }

    fn process(&self, batch: &mut Batch, request: &Request, shift: Coordinate) -> ProvideResult<()> {
        for (key, spec) in &request.arrays {
            if let Some(array) = batch.arrays.get_mut(key) {
                array.spec.roi = spec.roi.clone();
            }
        }
        let back = -&shift;
        for (key, spec) in &request.points {
            if let Some(points) = batch.points.get_mut(key) {
                points.spec.roi = spec.roi.clone();
                points.shift(&back);
            }
        }
        Ok(())
    }
}
