//! This module routes linear solves against a block operator through an
//! iterative solver.
//!
//! The operator is never factorized. The solver only sees it through
//! [`faer::matrix_free::LinOp`], i.e. through the multiplication engine, and stops
//! once the residual norm falls below the operator's tolerance (or a per-call
//! override). A solve that runs out of iterations is reported as
//! [`BlockErrorKind::Convergence`], never returned as a best-effort answer.
//!
//! [`IterativeSolver`] is the seam for plugging in other Krylov methods;
//! [`ConjugateGradient`] adapts faer's matrix-free conjugate gradient to it.

use crate::{
    error::{BlockError, BlockErrorKind},
    factorization::BlockFactorization,
    matrix::Scalar,
};
use faer::{
    Col, ColMut, ColRef, MatMut, MatRef, Par,
    dyn_stack::{MemBuffer, MemStack, StackReq},
    matrix_free::{
        IdentityPrecond, LinOp,
        conjugate_gradient::{
            CgError, CgParams, conjugate_gradient, conjugate_gradient_scratch,
        },
    },
    prelude::{Reborrow, ReborrowMut},
    traits::ComplexField,
};

/// The outcome of an iterative solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// Whether the stopping criterion was met.
    pub converged: bool,
    /// Number of iterations executed.
    pub iterations: usize,
    /// Absolute residual norm `‖A·x - b‖` at the last iteration.
    pub residual: f64,
}

/// An iterative solver that needs nothing but the action of an operator.
pub trait IterativeSolver<T: Scalar> {
    /// Solves `operator · out = rhs`, using the contents of `out` as the
    /// initial guess, until the residual norm drops below `tolerance`.
    ///
    /// Running out of iterations is not an error at this level: it is reported
    /// through [`SolveReport::converged`].
    fn solve<O: LinOp<T>>(
        &self,
        operator: &O,
        out: ColMut<'_, T>,
        rhs: ColRef<'_, T>,
        tolerance: T::Real,
        par: Par,
    ) -> Result<SolveReport, BlockError>;
}

/// The conjugate gradient method of [`faer::matrix_free::conjugate_gradient`],
/// without preconditioning. Requires a Hermitian positive definite operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConjugateGradient {
    /// Iteration budget. `None` means ten times the operator dimension.
    pub max_iters: Option<usize>,
}

impl ConjugateGradient {
    /// Caps the solve at `max_iters` iterations.
    pub fn with_max_iters(max_iters: usize) -> Self {
        Self {
            max_iters: Some(max_iters),
        }
    }
}

/// Lends an operator to faer's solvers, which take their operator by value.
#[derive(Debug)]
struct Borrowed<'a, O>(&'a O);

impl<T: ComplexField, O: LinOp<T>> LinOp<T> for Borrowed<'_, O> {
    fn apply_scratch(&self, rhs_ncols: usize, par: Par) -> StackReq {
        self.0.apply_scratch(rhs_ncols, par)
    }

    fn nrows(&self) -> usize {
        self.0.nrows()
    }

    fn ncols(&self) -> usize {
        self.0.ncols()
    }

    fn apply(&self, out: MatMut<'_, T>, rhs: MatRef<'_, T>, par: Par, stack: &mut MemStack) {
        self.0.apply(out, rhs, par, stack)
    }

    fn conj_apply(&self, out: MatMut<'_, T>, rhs: MatRef<'_, T>, par: Par, stack: &mut MemStack) {
        self.0.conj_apply(out, rhs, par, stack)
    }
}

impl<T: Scalar> IterativeSolver<T> for ConjugateGradient {
    fn solve<O: LinOp<T>>(
        &self,
        operator: &O,
        mut out: ColMut<'_, T>,
        rhs: ColRef<'_, T>,
        tolerance: T::Real,
        par: Par,
    ) -> Result<SolveReport, BlockError> {
        let n = operator.nrows();
        let max_iters = self.max_iters.unwrap_or(10 * n.max(1));
        let mut params = CgParams::<T::Real>::default();
        params.abs_tolerance = tolerance;
        params.rel_tolerance = <T::Real as ComplexField>::zero_impl();
        params.max_iters = max_iters;

        let mut mem = MemBuffer::new(conjugate_gradient_scratch(
            IdentityPrecond { dim: n },
            Borrowed(operator),
            1,
            par,
        ));
        let result = conjugate_gradient(
            out.rb_mut().as_mat_mut(),
            IdentityPrecond { dim: n },
            Borrowed(operator),
            rhs.as_mat(),
            params,
            |_| {},
            par,
            MemStack::new(&mut mem),
        );

        match result {
            Ok(info) => Ok(SolveReport {
                converged: true,
                iterations: info.iter_count,
                residual: info.abs_residual.into(),
            }),
            // The residual carried by `NoConvergence` is not the one of the
            // final iterate, so it is measured again.
            Err(CgError::NoConvergence { .. }) => Ok(SolveReport {
                converged: false,
                iterations: max_iters,
                residual: residual_norm(operator, out.rb(), rhs, par),
            }),
            Err(CgError::NonPositiveDefiniteOperator) => {
                Err(BlockErrorKind::NotPositiveDefinite.into())
            }
            Err(other) => Err(BlockErrorKind::InputError(format!(
                "conjugate gradient failed: {other:?}"
            ))
            .into()),
        }
    }
}

/// `‖A·x - b‖` through the action of `operator`.
fn residual_norm<T: Scalar, O: LinOp<T>>(
    operator: &O,
    x: ColRef<'_, T>,
    rhs: ColRef<'_, T>,
    par: Par,
) -> f64 {
    let mut ax = Col::<T>::zeros(operator.nrows());
    let mut mem = MemBuffer::new(operator.apply_scratch(1, par));
    operator.apply(
        ax.as_mut().as_mat_mut(),
        x.as_mat(),
        par,
        MemStack::new(&mut mem),
    );
    let minus_one = T::from_f64_impl(-1.0);
    let r = Col::<T>::from_fn(ax.nrows(), |i| ax[i] + minus_one * rhs[i]);
    r.norm_l2().into()
}

impl<T: Scalar> BlockFactorization<T> {
    /// Solves `self · x = b` with conjugate gradient at the operator's tolerance.
    pub fn solve(&self, b: ColRef<'_, T>) -> Result<Col<T>, BlockError> {
        self.solve_with_tolerance(b, self.tolerance())
    }

    /// Solves `self · x = b` with a per-call tolerance. The operator keeps its
    /// own tolerance.
    pub fn solve_with_tolerance(
        &self,
        b: ColRef<'_, T>,
        tolerance: T::Real,
    ) -> Result<Col<T>, BlockError> {
        let mut x = Col::<T>::zeros(self.ncols());
        self.solve_with(
            &ConjugateGradient::default(),
            x.as_mut(),
            b,
            tolerance,
            Par::Seq,
        )?;
        Ok(x)
    }

    /// Solves `self · x = b` into `x`, overwriting its contents.
    ///
    /// On a dimension error `x` is left untouched.
    pub fn solve_into(&self, mut x: ColMut<'_, T>, b: ColRef<'_, T>) -> Result<(), BlockError> {
        self.check_solve_dims(x.nrows(), b.nrows())?;
        for i in 0..x.nrows() {
            x[i] = T::zero_impl();
        }
        self.solve_with(
            &ConjugateGradient::default(),
            x,
            b,
            self.tolerance(),
            Par::Seq,
        )?;
        Ok(())
    }

    /// Solves `self · x = b` with an arbitrary iterative solver.
    ///
    /// `x` holds the initial guess on entry. Fails with
    /// [`BlockErrorKind::Convergence`] when the solver exhausts its budget.
    pub fn solve_with<S: IterativeSolver<T>>(
        &self,
        solver: &S,
        x: ColMut<'_, T>,
        b: ColRef<'_, T>,
        tolerance: T::Real,
        par: Par,
    ) -> Result<SolveReport, BlockError> {
        self.check_solve_dims(x.nrows(), b.nrows())?;

        let report = solver.solve(self, x, b, tolerance, par)?;
        if !report.converged {
            log::warn!(
                "Iterative solve stopped after {} iterations with residual {:e}.",
                report.iterations,
                report.residual
            );
            return Err(BlockErrorKind::Convergence {
                residual: report.residual,
                iterations: report.iterations,
            }
            .into());
        }

        log::debug!(
            "Iterative solve converged in {} iterations (residual {:e}).",
            report.iterations,
            report.residual
        );
        Ok(report)
    }

    fn check_solve_dims(&self, x_len: usize, b_len: usize) -> Result<(), BlockError> {
        let (nrows, ncols) = self.shape();
        if nrows != ncols {
            return Err(BlockErrorKind::InputError(format!(
                "iterative solves need a square operator, this one is {nrows}x{ncols}"
            ))
            .into());
        }
        if b_len != nrows {
            return Err(BlockErrorKind::DimensionMismatch {
                what: "right-hand side",
                expected: nrows,
                found: b_len,
            }
            .into());
        }
        if x_len != ncols {
            return Err(BlockErrorKind::DimensionMismatch {
                what: "solution vector",
                expected: ncols,
                found: x_len,
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factorization::BlockStore,
        matrix::{Block, Diagonal, ZeroBlock},
    };
    use faer::Mat;

    fn diagonal_operator() -> BlockFactorization<f64> {
        let values = [2.0, 3.0, 5.0, 7.0];
        let store = BlockStore::from_fn(4, 4, |i, j| -> Box<dyn Block<f64>> {
            if i == j {
                Box::new(Diagonal::constant(2, values[i]))
            } else {
                Box::new(ZeroBlock::new(2, 2))
            }
        })
        .unwrap();
        BlockFactorization::with_block_size(store, 2).unwrap()
    }

    #[test]
    fn test_diagonal_solve_round_trip() {
        let op = diagonal_operator();
        let b = Col::<f64>::from_fn(8, |_| 1.0);
        let x = op.solve(b.as_ref()).unwrap();

        let values = [2.0, 3.0, 5.0, 7.0];
        for i in 0..8 {
            assert!((x[i] - 1.0 / values[i / 2]).abs() < 1e-10);
        }

        let bx = op.mul(x.as_ref(), Par::Seq).unwrap();
        assert!((bx.as_ref() - b.as_ref()).norm_l2() < op.tolerance());
    }

    #[test]
    fn test_solve_into_overwrites_initial_contents() {
        let op = diagonal_operator();
        let b = Col::<f64>::from_fn(8, |i| i as f64);
        let mut x = Col::<f64>::from_fn(8, |_| 100.0);
        op.solve_into(x.as_mut(), b.as_ref()).unwrap();
        let expected = op.solve(b.as_ref()).unwrap();
        for i in 0..8 {
            assert!((x[i] - expected[i]).abs() < 1e-10);
        }
    }

    fn spread_spectrum_operator() -> BlockFactorization<f64> {
        // A well-spread spectrum that CG cannot resolve in a few steps.
        let store = BlockStore::from_fn(1, 1, |_, _| {
            Mat::<f64>::from_fn(6, 6, |i, j| {
                if i == j {
                    (i + 1) as f64 * 10.0
                } else {
                    1.0 / (1.0 + (i as f64 - j as f64).abs())
                }
            })
        })
        .unwrap();
        BlockFactorization::from_uniform_blocks(store).unwrap()
    }

    #[test]
    fn test_exhausted_budget_is_an_error() {
        let op = spread_spectrum_operator();
        let b = Col::<f64>::from_fn(6, |i| (i + 1) as f64);
        let mut x = Col::<f64>::zeros(6);

        let err = op
            .solve_with(
                &ConjugateGradient::with_max_iters(1),
                x.as_mut(),
                b.as_ref(),
                1e-12,
                Par::Seq,
            )
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            BlockErrorKind::Convergence { iterations: 1, .. }
        ));
    }

    #[test]
    fn test_solve_checks_dimensions_before_work() {
        let op = diagonal_operator();
        let b = Col::<f64>::from_fn(7, |_| 1.0);
        let err = op.solve(b.as_ref()).unwrap_err();
        assert_eq!(
            err.kind(),
            &BlockErrorKind::DimensionMismatch {
                what: "right-hand side",
                expected: 8,
                found: 7,
            }
        );
    }

    #[test]
    fn test_unconverged_report_carries_final_residual() {
        let op = spread_spectrum_operator();
        let b = Col::<f64>::from_fn(6, |i| (i + 1) as f64);
        let mut x = Col::<f64>::zeros(6);

        let report = ConjugateGradient::with_max_iters(3)
            .solve(&op, x.as_mut(), b.as_ref(), 1e-14, Par::Seq)
            .unwrap();
        assert!(!report.converged);

        let bx = op.mul(x.as_ref(), Par::Seq).unwrap();
        let actual = (bx.as_ref() - b.as_ref()).norm_l2();
        assert!((report.residual - actual).abs() <= 1e-12 * b.norm_l2());
        // Three steps on a 6x6 SPD system make real progress from x = 0.
        assert!(report.residual < b.norm_l2());

        let mut x = Col::<f64>::zeros(6);
        let err = op
            .solve_with(
                &ConjugateGradient::with_max_iters(3),
                x.as_mut(),
                b.as_ref(),
                1e-14,
                Par::Seq,
            )
            .unwrap_err();
        match err.kind() {
            BlockErrorKind::Convergence { residual, iterations } => {
                assert_eq!(*iterations, 3);
                assert!((residual - actual).abs() <= 1e-12 * b.norm_l2());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_solve_into_leaves_short_vector_untouched() {
        let op = diagonal_operator();
        let b = Col::<f64>::from_fn(8, |_| 1.0);
        let mut x = Col::<f64>::from_fn(3, |_| 9.0);
        let err = op.solve_into(x.as_mut(), b.as_ref()).unwrap_err();
        assert_eq!(
            err.kind(),
            &BlockErrorKind::DimensionMismatch {
                what: "solution vector",
                expected: 8,
                found: 3,
            }
        );
        for i in 0..3 {
            assert_eq!(x[i], 9.0);
        }
    }
}
