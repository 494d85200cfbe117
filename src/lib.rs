//! Block-structured, matrix-free linear operators for kernel Gramians.
//!
//! This crate represents a large matrix as a grid of heterogeneous blocks (dense,
//! diagonal, low-rank, lazily evaluated kernel blocks, or any user type
//! implementing [`matrix::Block`]) and never forms the full matrix unless asked
//! to. The central type is [`BlockFactorization`], which supports:
//!
//! - matrix-vector multiplication `out ← alpha·B·rhs + beta·out`, dispatched per
//!   block, with a parallel strided path for uniform block sizes;
//! - element access and dense materialization;
//! - iterative solves through [`faer::matrix_free::conjugate_gradient`], since the
//!   operator implements [`faer::matrix_free::LinOp`].
//!
//! Built on the [`faer`] linear algebra framework, all scratch memory is carved
//! out of [`faer::dyn_stack::MemStack`] workspaces, and parallelism is driven by
//! [`faer::Par`].
//!
//! ## Layout
//!
//! **Partitions** ([`partition`]): where each block sits. Uniform partitions are
//! resolved at construction and select the strided multiplication algorithm.
//!
//! **Blocks** ([`matrix`]): the block capability trait and structured blocks.
//!
//! **Multiplication** ([`algorithms::multiply`]): the general per-block algorithm
//! and the strided algorithm, which reshapes flat vectors into block-column
//! views and splits block-rows across workers that each own one scratch block.
//!
//! **Solves** ([`solvers`]): the [`solvers::IterativeSolver`] seam and the conjugate
//! gradient adapter.
//!
//! **Kernels and Gramians** ([`kernels`], [`gramian`]): composable covariance
//! functions and constructors for their block-structured Gramians.
//!
//! ## Example Usage
//!
//! The following example builds a 6×6 operator out of a 3×3 grid of 2×2 blocks,
//! multiplies it with a vector, and solves a linear system against it.
//!
//! ```rust
//! use blockop::{BlockFactorization, BlockStore};
//! use blockop::matrix::{Block, Diagonal, ZeroBlock};
//! use faer::{Col, Par};
//!
//! let store = BlockStore::from_fn(3, 3, |i, j| -> Box<dyn Block<f64>> {
//!     if i == j {
//!         Box::new(Diagonal::constant(2, (i + 2) as f64))
//!     } else {
//!         Box::new(ZeroBlock::new(2, 2))
//!     }
//! })
//! .unwrap();
//! let op = BlockFactorization::with_block_size(store, 2).unwrap();
//! assert!(op.partition().is_uniform());
//!
//! let ones = Col::<f64>::from_fn(6, |_| 1.0);
//! let y = op.mul(ones.as_ref(), Par::Seq).unwrap();
//! assert_eq!(y[5], 4.0);
//!
//! let x = op.solve(y.as_ref()).unwrap();
//! assert!((x.as_ref() - ones.as_ref()).norm_l2() < 1e-8);
//! ```
//!
//! Kernel Gramians come out of [`gramian::blocked_gramian`]:
//!
//! ```rust
//! use blockop::gramian::{blocked_gramian, GramianOptions, PointSet};
//! use blockop::kernels::Matern52;
//!
//! let points = PointSet::from_scalars(&[0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
//! let op = blocked_gramian(Matern52, &points, 3, &GramianOptions::default()).unwrap();
//! assert_eq!(op.shape(), (6, 6));
//! assert_eq!(op.get(2, 2).unwrap(), 1.0);
//! ```

pub mod algorithms;
pub mod error;
pub mod factorization;
pub mod gramian;
pub mod kernels;
pub mod matrix;
pub mod partition;
pub mod solvers;
pub mod utils;

pub use error::{BlockError, BlockErrorKind};
pub use factorization::{BlockFactorization, BlockStore, DEFAULT_TOLERANCE};
pub use partition::Partition;
pub use solvers::{ConjugateGradient, IterativeSolver, SolveReport};
