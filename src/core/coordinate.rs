//! N-dimensional integer coordinates.
//!
//! A [`Coordinate`] is used both for positions (offsets, point locations) and
//! for extents (shapes, voxel sizes, shifts). All arithmetic is elementwise.
//! The dimensionality is fixed for a given pipeline; mixing coordinates of
//! different dimensionality is a programming error and panics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// An ordered tuple of signed integers, one per spatial dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coordinate(Vec<i64>);

impl Coordinate {
    /// Create a coordinate from its components.
    pub fn new(components: impl Into<Vec<i64>>) -> Self {
        Self(components.into())
    }

    /// The origin of an `dims`-dimensional space.
    pub fn zeros(dims: usize) -> Self {
        Self(vec![0; dims])
    }

    /// A coordinate with every component set to `value`.
    pub fn splat(dims: usize, value: i64) -> Self {
        Self(vec![value; dims])
    }

    /// Number of spatial dimensions.
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// Components as a slice.
    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    /// Iterate over components.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    /// Product of all components (the volume of a shape).
    pub fn product(&self) -> i64 {
        self.0.iter().product()
    }

    /// Whether every component is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    /// Componentwise `self <= other`.
    pub fn all_le(&self, other: &Coordinate) -> bool {
        self.check_dims(other);
        self.0.iter().zip(&other.0).all(|(a, b)| a <= b)
    }

    /// Componentwise `self < other`.
    pub fn all_lt(&self, other: &Coordinate) -> bool {
        self.check_dims(other);
        self.0.iter().zip(&other.0).all(|(a, b)| a < b)
    }

    /// Componentwise maximum (the least upper bound of both).
    pub fn sup(&self, other: &Coordinate) -> Coordinate {
        self.zip_with(other, i64::max)
    }

    /// Componentwise minimum (the greatest lower bound of both).
    pub fn inf(&self, other: &Coordinate) -> Coordinate {
        self.zip_with(other, i64::min)
    }

    /// Componentwise least common multiple.
    pub fn lcm(&self, other: &Coordinate) -> Coordinate {
        self.zip_with(other, lcm)
    }

    /// Componentwise ceiling division. Divisors must be positive.
    pub fn div_ceil(&self, other: &Coordinate) -> Coordinate {
        self.zip_with(other, |a, b| -((-a).div_euclid(b)))
    }

    /// Whether every component is a multiple of the matching component of `step`.
    pub fn is_multiple_of(&self, step: &Coordinate) -> bool {
        self.check_dims(step);
        self.0
            .iter()
            .zip(&step.0)
            .all(|(&a, &b)| b != 0 && a.rem_euclid(b) == 0)
    }

    /// Apply `f` to every component.
    pub fn map(&self, f: impl Fn(i64) -> i64) -> Coordinate {
        Coordinate(self.0.iter().map(|&c| f(c)).collect())
    }

    fn zip_with(&self, other: &Coordinate, f: impl Fn(i64, i64) -> i64) -> Coordinate {
        self.check_dims(other);
        Coordinate(self.0.iter().zip(&other.0).map(|(&a, &b)| f(a, b)).collect())
    }

    #[inline]
    fn check_dims(&self, other: &Coordinate) {
        assert_eq!(
            self.dims(),
            other.dims(),
            "coordinate dimensionality mismatch: {} vs {}",
            self,
            other
        );
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b) * b).abs()
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<i64>> for Coordinate {
    fn from(components: Vec<i64>) -> Self {
        Self(components)
    }
}

impl<const N: usize> From<[i64; N]> for Coordinate {
    fn from(components: [i64; N]) -> Self {
        Self(components.to_vec())
    }
}

macro_rules! impl_elementwise {
    ($trait:ident, $method:ident, $f:expr) => {
        impl $trait<&Coordinate> for &Coordinate {
            type Output = Coordinate;

            fn $method(self, rhs: &Coordinate) -> Coordinate {
                self.zip_with(rhs, $f)
            }
        }

        impl $trait<Coordinate> for Coordinate {
            type Output = Coordinate;

            fn $method(self, rhs: Coordinate) -> Coordinate {
                (&self).$method(&rhs)
            }
        }

        impl $trait<&Coordinate> for Coordinate {
            type Output = Coordinate;

            fn $method(self, rhs: &Coordinate) -> Coordinate {
                (&self).$method(rhs)
            }
        }
    };
}

impl_elementwise!(Add, add, |a, b| a + b);
impl_elementwise!(Sub, sub, |a, b| a - b);
impl_elementwise!(Mul, mul, |a, b| a * b);
// Floor division, so negative offsets round towards -inf like voxel indices do.
impl_elementwise!(Div, div, |a: i64, b: i64| a.div_euclid(b));

impl Neg for &Coordinate {
    type Output = Coordinate;

    fn neg(self) -> Coordinate {
        self.map(|c| -c)
    }
}

impl Neg for Coordinate {
    type Output = Coordinate;

    fn neg(self) -> Coordinate {
        -&self
    }
}
