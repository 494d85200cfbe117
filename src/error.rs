//! This module defines the custom error types for the library.
//!
//! Every failure that can arise while building a block operator, multiplying
//! with it, or solving against it is centralized into a single enum:
//! [`BlockErrorKind`], wrapped by the public [`BlockError`].
//!
//! Shape, partition and dimension errors are raised before any work is done.
//! [`BlockErrorKind::Convergence`] is the only error that may follow an
//! expensive computation, and it carries the achieved residual and the
//! iteration count so the caller can decide whether to retry.
use thiserror::Error;

/// Represents all possible errors that can occur in a block operator.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct BlockError(#[from] BlockErrorKind);

impl BlockError {
    /// Returns the kind of this error, for callers that need to branch on it.
    pub fn kind(&self) -> &BlockErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockErrorKind {
    /// A partition boundary sequence is not strictly increasing.
    #[error("Invalid partition: {axis} boundaries must be strictly increasing, found {bounds:?}.")]
    InvalidPartition {
        axis: &'static str,
        bounds: Vec<usize>,
    },

    /// A block's shape disagrees with its partition slice, or the block grid
    /// is not uniform where a uniform layout was requested.
    #[error(
        "Shape mismatch at block ({block_row}, {block_col}): expected {expected:?}, found {found:?}."
    )]
    ShapeMismatch {
        block_row: usize,
        block_col: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Indicates that the dimensions of the operator and a vector are
    /// incompatible for a matrix-vector product.
    #[error("Dimension mismatch: {what} has length {found} but the operator requires {expected}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// An element access outside of the operator's shape.
    #[error("Index ({row}, {col}) is out of bounds for an operator of shape {shape:?}.")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        shape: (usize, usize),
    },

    /// The block grid, or a block size, is zero in some dimension.
    #[error("Empty operator: {0}")]
    EmptyOperator(String),

    /// The iterative solver exhausted its budget without meeting the tolerance.
    /// `residual` is the absolute norm `‖A·x - b‖` of the last iterate.
    #[error(
        "Iterative solve did not converge after {iterations} iterations: residual norm {residual:e}."
    )]
    Convergence { residual: f64, iterations: usize },

    /// The iterative solver detected that the operator is not positive definite.
    #[error("The operator is not positive definite; conjugate gradient cannot proceed.")]
    NotPositiveDefinite,

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),
}

impl PartialEq for BlockError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
