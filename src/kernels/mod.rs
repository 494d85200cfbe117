//! Covariance functions and the algebra that combines them.
//!
//! A [`Kernel`] maps a pair of points to a scalar similarity. Kernels compose:
//! sums, products, integer powers and scalings of kernels are kernels again
//! (see [`algebra`] and [`KernelExt`]), and isotropic kernels can have their
//! inputs rescaled (see [`stationary::IsotropicKernel::with_lengthscale`]).
//!
//! A [`MultiOutputKernel`] maps a pair of points to a small `d × d` matrix.
//! Gramians of such kernels are naturally block-structured, one block per pair
//! of points, which is what [`crate::gramian::multi_output_gramian`] builds.
//!
//! # Example
//!
//! ```rust
//! use blockop::kernels::{ExponentiatedQuadratic, IsotropicKernel, Kernel, KernelExt, Matern32};
//!
//! let k = ExponentiatedQuadratic
//!     .with_lengthscale(2.0)
//!     .plus(Matern32.scaled(0.5));
//! let x = [0.0, 1.0];
//! assert!((k.eval(&x, &x) - 1.5).abs() < 1e-15);
//! ```

pub mod algebra;
pub mod stationary;

pub use algebra::{Power, Product, Scaled, Sum};
pub use stationary::{
    Exponential, ExponentiatedQuadratic, IsotropicKernel, Lengthscale, Matern32, Matern52,
    RationalQuadratic,
};

use crate::error::{BlockError, BlockErrorKind};
use faer::{Mat, MatMut, prelude::ReborrowMut};
use std::{fmt, sync::Arc};

/// A scalar-valued covariance function.
pub trait Kernel: Send + Sync + fmt::Debug {
    /// Evaluates `k(x, y)`. Both points have the same dimension.
    fn eval(&self, x: &[f64], y: &[f64]) -> f64;
}

impl<K: Kernel + ?Sized> Kernel for Arc<K> {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        (**self).eval(x, y)
    }
}

impl<K: Kernel + ?Sized> Kernel for &K {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        (**self).eval(x, y)
    }
}

/// Combinators available on every sized kernel.
pub trait KernelExt: Kernel + Sized {
    /// `k₁(x, y) + k₂(x, y)`.
    fn plus<K: Kernel>(self, other: K) -> Sum<Self, K> {
        Sum::new(self, other)
    }

    /// `k₁(x, y) · k₂(x, y)`.
    fn times<K: Kernel>(self, other: K) -> Product<Self, K> {
        Product::new(self, other)
    }

    /// `k(x, y)ᵖ`.
    fn pow(self, exponent: u32) -> Power<Self> {
        Power::new(self, exponent)
    }

    /// `σ² · k(x, y)`.
    fn scaled(self, variance: f64) -> Scaled<Self> {
        Scaled::new(self, variance)
    }
}

impl<K: Kernel> KernelExt for K {}

/// A matrix-valued covariance function with `output_dim() × output_dim()` values.
pub trait MultiOutputKernel: Send + Sync + fmt::Debug {
    fn output_dim(&self) -> usize;

    /// Computes `dst ← dst + K(x, y)`.
    fn eval_accumulate(&self, x: &[f64], y: &[f64], dst: MatMut<'_, f64>);

    /// Computes `dst ← K(x, y)`.
    fn eval_into(&self, x: &[f64], y: &[f64], mut dst: MatMut<'_, f64>) {
        dst.fill(0.0);
        self.eval_accumulate(x, y, dst);
    }

    /// Returns `K(x, y)` as an owned matrix.
    fn eval(&self, x: &[f64], y: &[f64]) -> Mat<f64> {
        let d = self.output_dim();
        let mut out = Mat::zeros(d, d);
        self.eval_accumulate(x, y, out.as_mut());
        out
    }
}

impl<K: MultiOutputKernel + ?Sized> MultiOutputKernel for Arc<K> {
    #[inline]
    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }

    #[inline]
    fn eval_accumulate(&self, x: &[f64], y: &[f64], dst: MatMut<'_, f64>) {
        (**self).eval_accumulate(x, y, dst)
    }
}

/// The separable kernel `K(x, y) = B · k(x, y)` with a fixed coregionalization
/// matrix `B`.
///
/// If `B` is positive semidefinite, so is every Gramian of this kernel.
#[derive(Debug, Clone)]
pub struct Separable<K> {
    kernel: K,
    coregion: Mat<f64>,
}

impl<K: Kernel> Separable<K> {
    /// Pairs a scalar kernel with a square, non-empty coregionalization matrix.
    /// The output dimension is `coregion.nrows()`.
    pub fn new(kernel: K, coregion: Mat<f64>) -> Result<Self, BlockError> {
        if coregion.nrows() != coregion.ncols() || coregion.nrows() == 0 {
            return Err(BlockErrorKind::InputError(format!(
                "coregionalization matrix must be square and non-empty, got {}x{}",
                coregion.nrows(),
                coregion.ncols()
            ))
            .into());
        }
        Ok(Self { kernel, coregion })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn coregion(&self) -> &Mat<f64> {
        &self.coregion
    }
}

impl<K: Kernel> MultiOutputKernel for Separable<K> {
    #[inline]
    fn output_dim(&self) -> usize {
        self.coregion.nrows()
    }

    fn eval_accumulate(&self, x: &[f64], y: &[f64], mut dst: MatMut<'_, f64>) {
        let k = self.kernel.eval(x, y);
        let d = self.output_dim();
        for j in 0..d {
            for i in 0..d {
                dst[(i, j)] += k * self.coregion[(i, j)];
            }
        }
    }
}

/// `K₁(x, y) + K₂(x, y)` for two multi-output kernels of the same output dimension.
#[derive(Debug, Clone)]
pub struct MultiSum<A, B> {
    lhs: A,
    rhs: B,
}

impl<A: MultiOutputKernel, B: MultiOutputKernel> MultiSum<A, B> {
    /// Fails with [`BlockErrorKind::InputError`] when the output dimensions differ.
    pub fn new(lhs: A, rhs: B) -> Result<Self, BlockError> {
        if lhs.output_dim() != rhs.output_dim() {
            return Err(BlockErrorKind::InputError(format!(
                "cannot add multi-output kernels with output dimensions {} and {}",
                lhs.output_dim(),
                rhs.output_dim()
            ))
            .into());
        }
        Ok(Self { lhs, rhs })
    }
}

impl<A: MultiOutputKernel, B: MultiOutputKernel> MultiOutputKernel for MultiSum<A, B> {
    #[inline]
    fn output_dim(&self) -> usize {
        self.lhs.output_dim()
    }

    fn eval_accumulate(&self, x: &[f64], y: &[f64], mut dst: MatMut<'_, f64>) {
        self.lhs.eval_accumulate(x, y, dst.rb_mut());
        self.rhs.eval_accumulate(x, y, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separable_scales_coregion() {
        let b = Mat::<f64>::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 0.5 });
        let k = Separable::new(ExponentiatedQuadratic, b.clone()).unwrap();
        let (x, y) = ([0.0], [1.0]);
        let value = k.eval(&x, &y);
        let scalar = ExponentiatedQuadratic.eval(&x, &y);
        for i in 0..2 {
            for j in 0..2 {
                assert!((value[(i, j)] - scalar * b[(i, j)]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_eval_into_overwrites() {
        let k = Separable::new(Exponential, Mat::<f64>::identity(3, 3)).unwrap();
        let mut dst = Mat::<f64>::from_fn(3, 3, |_, _| 9.0);
        k.eval_into(&[0.0], &[0.0], dst.as_mut());
        assert_eq!(dst, Mat::<f64>::identity(3, 3));
    }

    #[test]
    fn test_multi_sum() {
        let a = Separable::new(Matern32, Mat::<f64>::identity(2, 2)).unwrap();
        let b = Separable::new(Matern52, Mat::<f64>::from_fn(2, 2, |_, _| 1.0)).unwrap();
        let sum = MultiSum::new(a.clone(), b.clone()).unwrap();
        let (x, y) = ([0.3, -1.0], [0.1, 0.4]);
        let (ea, eb, total) = (a.eval(&x, &y), b.eval(&x, &y), sum.eval(&x, &y));
        for i in 0..2 {
            for j in 0..2 {
                assert!((total[(i, j)] - ea[(i, j)] - eb[(i, j)]).abs() < 1e-15);
            }
        }

        let c = Separable::new(Matern32, Mat::<f64>::identity(3, 3)).unwrap();
        assert!(MultiSum::new(a, c).is_err());
    }

    #[test]
    fn test_separable_rejects_rectangular_coregion() {
        let err = Separable::new(Exponential, Mat::<f64>::zeros(2, 3)).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::InputError(_)));
    }
}
