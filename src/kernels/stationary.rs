//! Stationary isotropic kernels, which depend on their inputs only through the
//! Euclidean distance `r = ‖x - y‖`.
//!
//! Each kernel has unit variance and unit lengthscale; use
//! [`IsotropicKernel::with_lengthscale`] and [`super::KernelExt::scaled`] to
//! change either.

use super::Kernel;

/// A kernel of the form `k(x, y) = f(‖x - y‖²)`.
pub trait IsotropicKernel: Send + Sync + std::fmt::Debug {
    /// Evaluates `f` at the squared distance `r2`.
    fn of_squared_distance(&self, r2: f64) -> f64;

    /// Rescales the inputs: `k(x / ℓ, y / ℓ)`.
    fn with_lengthscale(self, lengthscale: f64) -> Lengthscale<Self>
    where
        Self: Sized,
    {
        Lengthscale::new(self, lengthscale)
    }
}

#[inline]
pub(crate) fn squared_distance(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}

macro_rules! isotropic_kernel {
    ($($ty:ty),* $(,)?) => {$(
        impl Kernel for $ty {
            #[inline]
            fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
                self.of_squared_distance(squared_distance(x, y))
            }
        }
    )*};
}

/// `exp(-r²/2)`, also known as the squared exponential or RBF kernel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExponentiatedQuadratic;

impl IsotropicKernel for ExponentiatedQuadratic {
    #[inline]
    fn of_squared_distance(&self, r2: f64) -> f64 {
        (-0.5 * r2).exp()
    }
}

/// `exp(-r)`, the Matérn kernel with ν = 1/2.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Exponential;

impl IsotropicKernel for Exponential {
    #[inline]
    fn of_squared_distance(&self, r2: f64) -> f64 {
        (-r2.sqrt()).exp()
    }
}

/// `(1 + √3 r) exp(-√3 r)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Matern32;

impl IsotropicKernel for Matern32 {
    #[inline]
    fn of_squared_distance(&self, r2: f64) -> f64 {
        let s = (3.0 * r2).sqrt();
        (1.0 + s) * (-s).exp()
    }
}

/// `(1 + √5 r + 5r²/3) exp(-√5 r)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Matern52;

impl IsotropicKernel for Matern52 {
    #[inline]
    fn of_squared_distance(&self, r2: f64) -> f64 {
        let s = (5.0 * r2).sqrt();
        (1.0 + s + 5.0 * r2 / 3.0) * (-s).exp()
    }
}

/// `(1 + r² / 2α)^(-α)`. Tends to [`ExponentiatedQuadratic`] as `α → ∞`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RationalQuadratic {
    pub alpha: f64,
}

impl RationalQuadratic {
    /// # Panics
    ///
    /// Panics unless `alpha > 0`.
    pub fn new(alpha: f64) -> Self {
        assert!(alpha > 0.0, "rational quadratic needs a positive shape, got {alpha}");
        Self { alpha }
    }
}

impl IsotropicKernel for RationalQuadratic {
    #[inline]
    fn of_squared_distance(&self, r2: f64) -> f64 {
        (1.0 + r2 / (2.0 * self.alpha)).powf(-self.alpha)
    }
}

/// An isotropic kernel evaluated on inputs divided by `lengthscale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lengthscale<K> {
    kernel: K,
    inv_sq: f64,
}

impl<K: IsotropicKernel> Lengthscale<K> {
    /// Panics unless `lengthscale > 0`.
    pub fn new(kernel: K, lengthscale: f64) -> Self {
        assert!(
            lengthscale > 0.0,
            "lengthscale must be positive, got {lengthscale}"
        );
        Self {
            kernel,
            inv_sq: 1.0 / (lengthscale * lengthscale),
        }
    }

    pub fn lengthscale(&self) -> f64 {
        self.inv_sq.sqrt().recip()
    }
}

impl<K: IsotropicKernel> IsotropicKernel for Lengthscale<K> {
    #[inline]
    fn of_squared_distance(&self, r2: f64) -> f64 {
        self.kernel.of_squared_distance(r2 * self.inv_sq)
    }
}

impl<K: IsotropicKernel> Kernel for Lengthscale<K> {
    #[inline]
    fn eval(&self, x: &[f64], y: &[f64]) -> f64 {
        self.of_squared_distance(squared_distance(x, y))
    }
}

isotropic_kernel!(
    ExponentiatedQuadratic,
    Exponential,
    Matern32,
    Matern52,
    RationalQuadratic,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_variance_at_zero_distance() {
        let x = [0.4, -2.0, 7.5];
        let kernels: [&dyn Kernel; 5] = [
            &ExponentiatedQuadratic,
            &Exponential,
            &Matern32,
            &Matern52,
            &RationalQuadratic { alpha: 0.7 },
        ];
        for k in kernels {
            assert!((k.eval(&x, &x) - 1.0).abs() < 1e-15, "{k:?}");
        }
    }

    #[test]
    fn test_known_values() {
        let (x, y) = ([0.0, 0.0], [3.0, 4.0]);
        assert!((ExponentiatedQuadratic.eval(&x, &y) - (-12.5f64).exp()).abs() < 1e-15);
        assert!((Exponential.eval(&x, &y) - (-5.0f64).exp()).abs() < 1e-15);
        let rq = RationalQuadratic::new(2.0);
        assert!((rq.eval(&x, &y) - (1.0f64 + 25.0 / 4.0).powf(-2.0)).abs() < 1e-15);
    }

    #[test]
    fn test_kernels_decay_with_distance() {
        let x = [0.0];
        for k in [&Matern32 as &dyn Kernel, &Matern52, &Exponential] {
            let near = k.eval(&x, &[0.5]);
            let far = k.eval(&x, &[1.5]);
            assert!(near > far && far > 0.0, "{k:?}");
        }
    }

    #[test]
    fn test_lengthscale_rescales_inputs() {
        let k = Matern52.with_lengthscale(2.0);
        assert!((k.lengthscale() - 2.0).abs() < 1e-15);
        let scaled = k.eval(&[0.0, 0.0], &[2.0, 4.0]);
        let unscaled = Matern52.eval(&[0.0, 0.0], &[1.0, 2.0]);
        assert!((scaled - unscaled).abs() < 1e-15);
    }

    #[test]
    fn test_rational_quadratic_approaches_exponentiated_quadratic() {
        let (x, y) = ([0.0], [1.3]);
        let rq = RationalQuadratic::new(1e8).eval(&x, &y);
        let eq = ExponentiatedQuadratic.eval(&x, &y);
        assert!((rq - eq).abs() < 1e-6);
    }
}
