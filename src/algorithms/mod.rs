//! Low-level kernels behind the block operator.
//!
//! [`multiply`] holds the two multiplication strategies. Prefer the methods on
//! [`crate::factorization::BlockFactorization`], which validate their inputs and
//! choose the strategy from the partition.

pub mod multiply;
