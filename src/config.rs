//! Pipeline configuration files.
//!
//! A configuration is a TOML document:
//!
//! ```toml
//! seed = 42
//!
//! [random_location]
//! min_masked = 0.5
//! mask = "MASK"
//! ensure_nonempty = "SYN"
//! max_shift_attempts = 0  # no cap
//!
//! [precache]
//! cache_size = 10
//! num_workers = 4
//! timeout_ms = 5000
//!
//! [request.arrays.RAW]
//! offset = [0, 0, 0]
//! shape = [32, 32, 32]
//!
//! [request.points.SYN]
//! offset = [0, 0, 0]
//! shape = [32, 32, 32]
//! ```
//!
//! Every section is optional.

use crate::core::batch::Request;
use crate::core::coordinate::Coordinate;
use crate::core::error::ConfigError;
use crate::core::keys::{ArrayKey, PointsKey};
use crate::core::roi::Roi;
use crate::execution::PreCacheOptions;
use crate::nodes::RandomLocationConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seed for every random node that has none of its own.
    pub seed: Option<u64>,
    /// Sampler settings.
    pub random_location: RandomLocationConfig,
    /// Prefetch settings.
    pub precache: PreCacheConfig,
    /// The request workers send upstream.
    pub request: RequestConfig,
}

/// Prefetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreCacheConfig {
    /// Maximum number of batches held or in production.
    pub cache_size: usize,
    /// Number of worker threads.
    pub num_workers: usize,
    /// Consumer timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for PreCacheConfig {
    fn default() -> Self {
        let options = PreCacheOptions::default();
        Self {
            cache_size: options.cache_size,
            num_workers: options.num_workers,
            timeout_ms: None,
        }
    }
}

impl PreCacheConfig {
    /// Convert to [`PreCacheOptions`].
    pub fn to_options(&self) -> PreCacheOptions {
        let options = PreCacheOptions::new()
            .with_cache_size(self.cache_size)
            .with_workers(self.num_workers);
        match self.timeout_ms {
            Some(ms) => options.with_timeout(Duration::from_millis(ms)),
            None => options,
        }
    }
}

/// A Roi as written in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiConfig {
    /// Offset in world units.
    pub offset: Vec<i64>,
    /// Shape in world units.
    pub shape: Vec<i64>,
}

impl RoiConfig {
    fn to_roi(&self, field: &str) -> Result<Roi, ConfigError> {
        if self.offset.len() != self.shape.len() {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: format!(
                    "offset has {} dimensions, shape has {}",
                    self.offset.len(),
                    self.shape.len()
                ),
            });
        }
        if self.shape.is_empty() || self.shape.iter().any(|&s| s <= 0) {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: "shape must be positive".to_string(),
            });
        }
        Ok(Roi::new(Coordinate::new(self.offset.clone()), Coordinate::new(self.shape.clone())))
    }
}

/// The request to prefetch, keyed by array and point set names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Requested arrays.
    pub arrays: IndexMap<String, RoiConfig>,
    /// Requested point sets.
    pub points: IndexMap<String, RoiConfig>,
}

impl RequestConfig {
    /// Build the [`Request`].
    pub fn to_request(&self) -> Result<Request, ConfigError> {
        let mut request = Request::new();
        for (name, roi) in &self.arrays {
            request = request.array(ArrayKey::new(name), roi.to_roi(&format!("request.arrays.{}", name))?);
        }
        for (name, roi) in &self.points {
            request = request.points(PointsKey::new(name), roi.to_roi(&format!("request.points.{}", name))?);
        }
        Ok(request)
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let rl = &self.random_location;
        if !(0.0..=1.0).contains(&rl.min_masked) {
            return Err(invalid("random_location.min_masked", "must lie in [0, 1]"));
        }
        if rl.min_masked > 0.0 && rl.mask.is_none() {
            return Err(invalid("random_location.mask", "required when min_masked > 0"));
        }
        if rl.max_local_trials == 0 {
            return Err(invalid("random_location.max_local_trials", "must be at least 1"));
        }
        if self.precache.cache_size == 0 {
            return Err(invalid("precache.cache_size", "must be at least 1"));
        }
        if self.precache.num_workers == 0 {
            return Err(invalid("precache.num_workers", "must be at least 1"));
        }
        self.request.to_request()?;
        Ok(())
    }

    /// Sampler settings, inheriting the top-level seed.
    pub fn random_location(&self) -> RandomLocationConfig {
        let mut config = self.random_location.clone();
        if config.seed.is_none() {
            config.seed = self.seed;
        }
        config
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Invalid {
            field: "<root>".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
        seed = 42

        [random_location]
        min_masked = 0.5
        mask = "MASK"
        ensure_nonempty = "SYN"
        max_shift_attempts = 500

        [precache]
        cache_size = 10
        num_workers = 4
        timeout_ms = 5000

        [request.arrays.RAW]
        offset = [0, 0, 0]
        shape = [32, 32, 32]

        [request.points.SYN]
        offset = [0, 0, 0]
        shape = [32, 32, 32]
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = PipelineConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.seed, Some(42));

        let rl = config.random_location();
        assert_eq!(rl.seed, Some(42));
        assert_eq!(rl.mask, Some(ArrayKey::new("MASK")));
        assert_eq!(rl.ensure_nonempty, Some(PointsKey::new("SYN")));
        assert_eq!(rl.max_shift_attempts, Some(500));
        assert_eq!(rl.max_local_trials, crate::nodes::random_location::DEFAULT_MAX_LOCAL_TRIALS);

        let options = config.precache.to_options();
        assert_eq!(options.cache_size, 10);
        assert_eq!(options.timeout, Some(Duration::from_millis(5000)));

        let request = config.request.to_request().unwrap();
        assert_eq!(
            request.arrays[&ArrayKey::new("RAW")].roi,
            Some(Roi::new([0, 0, 0], [32, 32, 32]))
        );
        assert!(request.points.contains_key(&PointsKey::new("SYN")));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.request.to_request().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = PipelineConfig::from_toml_str("[random_location]\nmin_masked = 1.5\nmask = \"M\"").unwrap_err();
        assert!(err.to_string().contains("min_masked"));

        let err = PipelineConfig::from_toml_str("[precache]\nnum_workers = 0").unwrap_err();
        assert!(err.to_string().contains("num_workers"));

        let err = PipelineConfig::from_toml_str("[request.arrays.RAW]\noffset = [0, 0]\nshape = [4, 4, 4]").unwrap_err();
        assert!(err.to_string().contains("request.arrays.RAW"));

        assert!(matches!(PipelineConfig::from_toml_str("seed = \"x\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.precache.num_workers, 4);

        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_unbounded_attempts_survive_round_trip() {
        let config = PipelineConfig::from_toml_str("[random_location]\nmax_shift_attempts = 0").unwrap();
        assert_eq!(config.random_location.max_shift_attempts, None);

        let mut config = PipelineConfig::default();
        config.random_location.max_shift_attempts = None;
        let text = config.to_toml_string().unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.random_location.max_shift_attempts, None);

        let bounded = PipelineConfig::from_toml_str(&PipelineConfig::default().to_toml_string().unwrap()).unwrap();
        assert_eq!(
            bounded.random_location.max_shift_attempts,
            Some(crate::nodes::random_location::DEFAULT_MAX_SHIFT_ATTEMPTS)
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = PipelineConfig::load(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
