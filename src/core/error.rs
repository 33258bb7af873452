//! Error types for Voxflow.
//!
//! Uses thiserror for structured errors with context. Errors are split by
//! the phase that raises them:
//! - [`SetupError`]: fatal configuration problems found while wiring nodes
//! - [`ProvideError`]: per-request failures, either recoverable
//!   (unsatisfiable requests) or propagated (materialization failures)
//! - [`ConfigError`]: problems loading a pipeline configuration

use crate::core::keys::AnyKey;
use crate::core::roi::Roi;
use thiserror::Error;

/// Top-level error type for Voxflow.
#[derive(Error, Debug)]
pub enum VoxflowError {
    /// Wiring the pipeline failed.
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// A request failed.
    #[error("Provide error: {0}")]
    Provide(#[from] ProvideError),

    /// A configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Errors raised while setting up a pipeline.
///
/// These are fatal: the pipeline cannot serve any request.
#[derive(Error, Debug)]
pub enum SetupError {
    /// The node needs bounds to sample in, and upstream has none.
    #[error("Node '{node}' requires a bounded upstream, but no upstream Roi is bounded")]
    Unbounded {
        /// The node being set up.
        node: String,
    },

    /// A key named in the node's configuration is not provided upstream.
    #[error("Node '{node}' references {key}, which upstream does not provide")]
    MissingKey {
        /// The node being set up.
        node: String,
        /// The missing key.
        key: AnyKey,
    },

    /// A parameter or an upstream spec entry is out of range.
    #[error("Invalid parameter '{parameter}' on node '{node}': {reason}")]
    InvalidParameter {
        /// The node being set up.
        node: String,
        /// The offending parameter or key.
        parameter: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Setup needed data from upstream and did not get it.
    #[error("Node '{node}' failed to query upstream during setup: {source}")]
    Upstream {
        /// The node being set up.
        node: String,
        /// The upstream failure.
        #[source]
        source: Box<ProvideError>,
    },

    /// Nothing to set up.
    #[error("Pipeline has no nodes")]
    EmptyPipeline,
}

/// Errors raised while providing a batch.
#[derive(Error, Debug)]
pub enum ProvideError {
    /// The key is not part of the node's spec.
    #[error("Requested {key}, but upstream does not provide it")]
    KeyNotProvided {
        /// The requested key.
        key: AnyKey,
    },

    /// The request entry carries no Roi.
    #[error("Request for {key} has no Roi")]
    MissingRoi {
        /// The requested key.
        key: AnyKey,
    },

    /// The requested Roi reaches outside what is provided.
    #[error("Requested {key} in {requested}, but only {provided} is provided")]
    RoiNotCovered {
        /// The requested key.
        key: AnyKey,
        /// Where it was requested.
        requested: Roi,
        /// Where it is available.
        provided: Roi,
    },

    /// No location can serve the request.
    #[error("Cannot satisfy request: {reason}")]
    Unsatisfiable {
        /// Why not.
        reason: String,
    },

    /// Sampling gave up after its attempt cap.
    #[error("No valid location found after {attempts} attempts")]
    TrialsExhausted {
        /// Outer draws made.
        attempts: usize,
    },

    /// A source could not produce the data.
    #[error("Failed to materialize {key} in {roi}: {reason}")]
    Materialization {
        /// The requested key.
        key: AnyKey,
        /// The requested Roi.
        roi: Roi,
        /// What went wrong.
        reason: String,
    },

    /// A filter failed on the data it was given.
    #[error("Node '{node}' failed to process {key}: {reason}")]
    Process {
        /// The failing filter.
        node: String,
        /// The key being processed.
        key: AnyKey,
        /// What went wrong.
        reason: String,
    },

    /// A node answered with data in the wrong place.
    #[error("Node '{node}' returned {key} in {got}, but {expected} was requested")]
    RoiMismatch {
        /// The node that answered.
        node: String,
        /// The key concerned.
        key: AnyKey,
        /// The requested Roi.
        expected: Roi,
        /// The Roi returned, or a note that it was missing.
        got: String,
    },

    /// The node was used before a successful setup.
    #[error("Node '{node}' was asked for a batch before setup")]
    NotSetUp {
        /// The node asked.
        node: String,
    },

    /// The prefetch pool was shut down.
    #[error("Pipeline is shutting down")]
    Shutdown,

    /// No cached batch arrived in time.
    #[error("Timeout after {waited_ms} ms waiting for a cached batch")]
    Timeout {
        /// How long the consumer waited.
        waited_ms: u64,
    },
}

/// Errors loading a pipeline configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid TOML for a configuration.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid value for '{field}': {reason}")]
    Invalid {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ============================================================================
// Error Utilities
// ============================================================================

impl ProvideError {
    /// Whether the request itself could not be satisfied (as opposed to a
    /// failure while materializing data). Callers may retry with a relaxed
    /// request.
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(
            self,
            ProvideError::Unsatisfiable { .. }
                | ProvideError::TrialsExhausted { .. }
                | ProvideError::RoiNotCovered { .. }
        )
    }

    /// Whether the pipeline can keep serving other requests after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ProvideError::Shutdown | ProvideError::NotSetUp { .. }
        )
    }

    /// The key this error concerns, if any.
    pub fn key(&self) -> Option<&AnyKey> {
        match self {
            ProvideError::KeyNotProvided { key }
            | ProvideError::MissingRoi { key }
            | ProvideError::RoiNotCovered { key, .. }
            | ProvideError::Materialization { key, .. }
            | ProvideError::Process { key, .. }
            | ProvideError::RoiMismatch { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl SetupError {
    /// Wrap an upstream failure seen by `node` during setup.
    pub fn upstream(node: impl Into<String>, source: ProvideError) -> Self {
        SetupError::Upstream {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Shorthand for [`SetupError::InvalidParameter`].
    pub fn invalid(node: impl Into<String>, parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        SetupError::InvalidParameter {
            node: node.into(),
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Voxflow operations.
pub type VoxflowResult<T> = Result<T, VoxflowError>;

/// Result type alias for setup.
pub type SetupResult<T> = Result<T, SetupError>;

/// Result type alias for providing batches.
pub type ProvideResult<T> = Result<T, ProvideError>;
