//! Closure of kernels under sums, products, powers and positive scaling.
//!
//! Each combinator is a plain struct over its operands, so a composite kernel
//! is a concrete type and `eval` is fully inlined.

use super::Kernel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sum<A, B> {
    lhs: A,
    rhs: B,
}

impl<A: Kernel, B: Kernel> Sum<A, B> {
    pub fn new(lhs: A, rhs: B) -> Self {
        Self { lhs, rhs }
    }
}

impl<A: Kernel, B: Kernel> Kernel for Sum<A, B> {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        self.lhs.eval(x, y) + self.rhs.eval(x, y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Product<A, B> {
    lhs: A,
    rhs: B,
}

impl<A: Kernel, B: Kernel> Product<A, B> {
    pub fn new(lhs: A, rhs: B) -> Self {
        Self { lhs, rhs }
    }
}

impl<A: Kernel, B: Kernel> Kernel for Product<A, B> {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        self.lhs.eval(x, y) * self.rhs.eval(x, y)
    }
}

/// A kernel raised to a positive integer power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Power<K> {
    kernel: K,
    exponent: u32,
}

impl<K: Kernel> Power<K> {
    /// # Panics
    ///
    /// Panics if `exponent` is zero.
    pub fn new(kernel: K, exponent: u32) -> Self {
        assert!(exponent > 0, "kernel powers start at 1");
        Self { kernel, exponent }
    }
}

impl<K: Kernel> Kernel for Power<K> {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        self.kernel.eval(x, y).powi(self.exponent as i32)
    }
}

/// A kernel multiplied by a positive output variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaled<K> {
    kernel: K,
    variance: f64,
}

impl<K: Kernel> Scaled<K> {
    /// # Panics
    ///
    /// Panics unless `variance > 0`.
    pub fn new(kernel: K, variance: f64) -> Self {
        assert!(variance > 0.0, "kernel variance must be positive, got {variance}");
        Self { kernel, variance }
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

impl<K: Kernel> Kernel for Scaled<K> {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        self.variance * self.kernel.eval(x, y)
    }
}

#[cfg(test)]
mod tests {
    use crate::kernels::{Exponential, ExponentiatedQuadratic, Kernel, KernelExt, Matern32};

    #[test]
    fn test_algebra_matches_pointwise_arithmetic() {
        let (x, y) = ([0.2, 0.9], [-0.4, 1.1]);
        let a = ExponentiatedQuadratic.eval(&x, &y);
        let b = Matern32.eval(&x, &y);

        let sum = ExponentiatedQuadratic.plus(Matern32);
        let product = ExponentiatedQuadratic.times(Matern32);
        let power = Matern32.pow(3);
        let scaled = ExponentiatedQuadratic.scaled(2.5);

        assert!((sum.eval(&x, &y) - (a + b)).abs() < 1e-15);
        assert!((product.eval(&x, &y) - a * b).abs() < 1e-15);
        assert!((power.eval(&x, &y) - b * b * b).abs() < 1e-15);
        assert!((scaled.eval(&x, &y) - 2.5 * a).abs() < 1e-15);
    }

    #[test]
    fn test_composites_stay_symmetric() {
        let k = Exponential
            .times(Matern32.scaled(3.0))
            .plus(ExponentiatedQuadratic.pow(2));
        let (x, y) = ([1.0, 2.0, 3.0], [0.5, -1.0, 2.0]);
        assert_eq!(k.eval(&x, &y), k.eval(&y, &x));
    }

    #[test]
    #[should_panic]
    fn test_zero_power_rejected() {
        let _ = Matern32.pow(0);
    }
}
