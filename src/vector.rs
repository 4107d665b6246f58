//! Fixed-dimension real vector with the handful of operations the hasher needs.
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Coordinates at or below this magnitude are treated as zero.
pub const EPSILON: f64 = 1e-12;

/// A dense real vector. Every `Vector` the [`crate::hasher::Hasher`] accepts must have
/// the same length as its configured dimensionality; mismatches are a programming
/// error and panic rather than returning a `Result` (see `dot`/`sub`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(Array1<f64>);

impl Vector {
    pub fn from_vec(v: Vec<f64>) -> Self {
        Vector(Array1::from_vec(v))
    }

    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice().expect("Vector is always contiguous")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dot product.
    ///
    /// # Panics
    /// Panics if `self.len() != other.len()`.
    pub fn dot(&self, other: &Vector) -> f64 {
        self.0.dot(&other.0)
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f64 {
        self.0.dot(&self.0).sqrt()
    }

    /// Elementwise subtraction.
    ///
    /// # Panics
    /// Panics if `self.len() != other.len()`.
    pub fn sub(&self, other: &Vector) -> Vector {
        Vector(&self.0 - &other.0)
    }

    /// True iff every coordinate's magnitude is at or below [`EPSILON`].
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c.abs() <= EPSILON)
    }
}

impl From<Vec<f64>> for Vector {
    fn from(v: Vec<f64>) -> Self {
        Vector::from_vec(v)
    }
}

impl From<&[f64]> for Vector {
    fn from(v: &[f64]) -> Self {
        Vector::from_vec(v.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dot() {
        let a = Vector::from_vec(vec![1., 2., 3.]);
        let b = Vector::from_vec(vec![1., 0., -1.]);
        assert_eq!(a.dot(&b), -2.);
    }

    #[test]
    fn test_norm() {
        let a = Vector::from_vec(vec![3., 4.]);
        assert_eq!(a.norm(), 5.);
    }

    #[test]
    fn test_sub() {
        let a = Vector::from_vec(vec![1., 2., 3.]);
        let b = Vector::from_vec(vec![0., 1., 1.]);
        assert_eq!(a.sub(&b), Vector::from_vec(vec![1., 1., 2.]));
    }

    #[test]
    fn test_is_zero() {
        assert!(Vector::from_vec(vec![0., 0., 1e-13]).is_zero());
        assert!(!Vector::from_vec(vec![0., 1e-6, 0.]).is_zero());
    }

    #[test]
    #[should_panic]
    fn test_dot_mismatched_length_panics() {
        let a = Vector::from_vec(vec![1., 2.]);
        let b = Vector::from_vec(vec![1., 2., 3.]);
        a.dot(&b);
    }
}
