//! Identifiers for arrays and point sets flowing through a pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create a key from its name.
            pub fn new(name: impl AsRef<str>) -> Self {
                Self(Arc::from(name.as_ref()))
            }

            /// The key's name.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }
    };
}

define_key!(
    /// Names a dense array, e.g. `RAW` or `GT_LABELS`.
    ArrayKey
);

define_key!(
    /// Names a point set, e.g. `PRESYN`.
    PointsKey
);

/// Either kind of key, used in error reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum AnyKey {
    /// An array key.
    Array(ArrayKey),
    /// A point set key.
    Points(PointsKey),
}

impl fmt::Display for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyKey::Array(key) => write!(f, "array {}", key),
            AnyKey::Points(key) => write!(f, "points {}", key),
        }
    }
}

impl From<ArrayKey> for AnyKey {
    fn from(key: ArrayKey) -> Self {
        AnyKey::Array(key)
    }
}

impl From<PointsKey> for AnyKey {
    fn from(key: PointsKey) -> Self {
        AnyKey::Points(key)
    }
}
