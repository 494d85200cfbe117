//! This module defines the capability every block of a block operator must provide.
//!
//! A block operator never inspects the concrete representation of its blocks. It
//! only needs to know a block's shape, how to accumulate its action on a vector,
//! and how to write it out densely. These three operations form the [`Block`]
//! trait, and any type implementing it can be stored in a
//! [`BlockStore`](crate::factorization::BlockStore), next to blocks of entirely
//! different types.
//!
//! The concrete blocks provided here cover the common structured cases:
//!
//! | block                   | `apply_accumulate`          | `materialize_into`              |
//! |-------------------------|-----------------------------|---------------------------------|
//! | [`Mat`]                 | one GEMV, no allocation     | copy                            |
//! | [`Diagonal`]            | elementwise, no allocation  | writes the diagonal only        |
//! | [`LowRank`]             | two GEMVs, rank-sized temp  | one GEMM `U·Vᵀ`                 |
//! | [`DiagonalPlusLowRank`] | three GEMVs, rank-sized temp| small `C·Vᵀ` correction + GEMM  |
//! | [`ZeroBlock`]           | no-op                       | fills zeros                     |
//!
//! Blocks that have no native accumulate path (for instance the lazy kernel
//! blocks of [`crate::gramian`]) materialize into a temporary first.

use faer::{
    Accum, Col, ColMut, ColRef, Mat, MatMut, Par,
    linalg::matmul::matmul,
    prelude::ReborrowMut,
    traits::ComplexField,
};
use std::{
    fmt,
    ops::{Add, Mul},
    sync::Arc,
};

/// The scalar types a block operator can hold.
///
/// This is [`ComplexField`] with plain value semantics, which holds for `f32`,
/// `f64` and faer's complex types.
pub trait Scalar:
    ComplexField<Real: Copy + Into<f64>>
    + Copy
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Mul<Output = Self>
{
}

impl<T> Scalar for T where
    T: ComplexField<Real: Copy + Into<f64>>
        + Copy
        + PartialEq
        + Send
        + Sync
        + 'static
        + Add<Output = T>
        + Mul<Output = T>
{
}

/// A rectangular piece of a block operator.
///
/// # Example
///
/// ```rust
/// use blockop::matrix::{Block, Diagonal};
/// use faer::{Col, Mat};
///
/// let d = Diagonal::new(Col::from_fn(3, |i| (i + 1) as f64));
/// let mut out = Col::<f64>::zeros(3);
/// let ones = Col::<f64>::from_fn(3, |_| 1.0);
/// d.apply_accumulate(out.as_mut(), ones.as_ref(), 2.0);
/// assert_eq!(out[2], 6.0);
///
/// let mut dense = Mat::<f64>::zeros(3, 3);
/// d.materialize_into(dense.as_mut());
/// assert_eq!(dense, d.to_dense());
/// ```
pub trait Block<T: Scalar>: Send + Sync + fmt::Debug {
    /// Returns the number of rows of the block.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the block.
    fn ncols(&self) -> usize;

    /// Computes `out ← out + alpha · self · rhs`.
    ///
    /// The caller guarantees `out.nrows() == self.nrows()` and
    /// `rhs.nrows() == self.ncols()`.
    fn apply_accumulate(&self, out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T);

    /// Returns an owned dense copy of the block.
    fn to_dense(&self) -> Mat<T>;

    /// Writes the dense representation of the block into `dst`, which has the
    /// block's shape. The result must be exact, not an approximation.
    ///
    /// The default goes through [`Block::to_dense`]; structured blocks override
    /// it to skip the intermediate allocation.
    fn materialize_into(&self, mut dst: MatMut<'_, T>) {
        dst.copy_from(self.to_dense().as_ref());
    }

    /// Returns the entry at `(row, col)` of the block.
    fn get(&self, row: usize, col: usize) -> T {
        self.to_dense()[(row, col)]
    }

    /// `(nrows, ncols)`.
    #[inline]
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

/// Dense blocks multiply with faer's GEMV kernel and copy on materialization.
impl<T: Scalar> Block<T> for Mat<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    fn apply_accumulate(&self, mut out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T) {
        matmul(
            out.rb_mut().as_mat_mut(),
            Accum::Add,
            self.as_ref(),
            rhs.as_mat(),
            alpha,
            Par::Seq,
        );
    }

    fn to_dense(&self) -> Mat<T> {
        self.clone()
    }

    fn materialize_into(&self, mut dst: MatMut<'_, T>) {
        dst.copy_from(self.as_ref());
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> T {
        self[(row, col)]
    }
}

/// Shared blocks: several operators (or several grid cells) may point at the
/// same read-only data.
impl<T: Scalar, B: Block<T> + ?Sized> Block<T> for Arc<B> {
    #[inline]
    fn nrows(&self) -> usize {
        (**self).nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        (**self).ncols()
    }

    #[inline]
    fn apply_accumulate(&self, out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T) {
        (**self).apply_accumulate(out, rhs, alpha)
    }

    fn to_dense(&self) -> Mat<T> {
        (**self).to_dense()
    }

    #[inline]
    fn materialize_into(&self, dst: MatMut<'_, T>) {
        (**self).materialize_into(dst)
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> T {
        (**self).get(row, col)
    }
}

/// Boxed blocks, so that grids can be assembled from closures returning
/// `Box<dyn Block<T>>`.
impl<T: Scalar, B: Block<T> + ?Sized> Block<T> for Box<B> {
    #[inline]
    fn nrows(&self) -> usize {
        (**self).nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        (**self).ncols()
    }

    #[inline]
    fn apply_accumulate(&self, out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T) {
        (**self).apply_accumulate(out, rhs, alpha)
    }

    fn to_dense(&self) -> Mat<T> {
        (**self).to_dense()
    }

    #[inline]
    fn materialize_into(&self, dst: MatMut<'_, T>) {
        (**self).materialize_into(dst)
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> T {
        (**self).get(row, col)
    }
}

/// A square diagonal block.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagonal<T: Scalar> {
    diag: Col<T>,
}

impl<T: Scalar> Diagonal<T> {
    /// The block `diag(d₀, …, dₙ₋₁)`; its size is the length of `diag`.
    pub fn new(diag: Col<T>) -> Self {
        Self { diag }
    }

    /// A block with `value` repeated `n` times on the diagonal.
    pub fn constant(n: usize, value: T) -> Self {
        Self::new(Col::from_fn(n, |_| value))
    }

    /// The identity block of size `n`.
    pub fn identity(n: usize) -> Self {
        Self::constant(n, T::one_impl())
    }

    /// The stored diagonal entries.
    pub fn diagonal(&self) -> ColRef<'_, T> {
        self.diag.as_ref()
    }
}

impl<T: Scalar> Block<T> for Diagonal<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.diag.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.diag.nrows()
    }

    fn apply_accumulate(&self, mut out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T) {
        for i in 0..self.diag.nrows() {
            out[i] = out[i] + alpha * self.diag[i] * rhs[i];
        }
    }

    fn to_dense(&self) -> Mat<T> {
        let n = self.diag.nrows();
        let mut dense = Mat::zeros(n, n);
        self.materialize_into(dense.as_mut());
        dense
    }

    fn materialize_into(&self, mut dst: MatMut<'_, T>) {
        dst.fill(T::zero_impl());
        for i in 0..self.diag.nrows() {
            dst[(i, i)] = self.diag[i];
        }
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> T {
        if row == col {
            self.diag[row]
        } else {
            T::zero_impl()
        }
    }
}

/// The low-rank product `U · Vᵀ`, with `U` of shape `p × k` and `V` of shape `q × k`.
#[derive(Debug, Clone, PartialEq)]
pub struct LowRank<T: Scalar> {
    u: Mat<T>,
    v: Mat<T>,
}

impl<T: Scalar> LowRank<T> {
    /// Builds `U · Vᵀ` from its factors. The block has shape
    /// `u.nrows() × v.nrows()` and is never formed unless materialized.
    ///
    /// Fails with [`BlockErrorKind::InputError`](crate::error::BlockErrorKind::InputError)
    /// when the factors disagree on the rank.
    pub fn new(u: Mat<T>, v: Mat<T>) -> Result<Self, crate::error::BlockError> {
        if u.ncols() != v.ncols() {
            return Err(crate::error::BlockErrorKind::InputError(format!(
                "low-rank factors have ranks {} and {}",
                u.ncols(),
                v.ncols()
            ))
            .into());
        }
        Ok(Self { u, v })
    }

    /// The inner dimension `k` shared by both factors.
    pub fn rank(&self) -> usize {
        self.u.ncols()
    }
}

impl<T: Scalar> Block<T> for LowRank<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.u.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.v.nrows()
    }

    fn apply_accumulate(&self, mut out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T) {
        let mut tmp = Col::<T>::zeros(self.rank());
        matmul(
            tmp.as_mut().as_mat_mut(),
            Accum::Replace,
            self.v.transpose(),
            rhs.as_mat(),
            T::one_impl(),
            Par::Seq,
        );
        matmul(
            out.rb_mut().as_mat_mut(),
            Accum::Add,
            self.u.as_ref(),
            tmp.as_ref().as_mat(),
            alpha,
            Par::Seq,
        );
    }

    fn to_dense(&self) -> Mat<T> {
        let mut dense = Mat::zeros(self.nrows(), self.ncols());
        self.materialize_into(dense.as_mut());
        dense
    }

    fn materialize_into(&self, dst: MatMut<'_, T>) {
        matmul(
            dst,
            Accum::Replace,
            self.u.as_ref(),
            self.v.transpose(),
            T::one_impl(),
            Par::Seq,
        );
    }
}

/// A square diagonal-plus-low-rank block `D + U · C · Vᵀ`, the shape that
/// Woodbury-style identities act on.
///
/// `D` is `n × n` diagonal, `U` and `V` are `n × k`, and `C` is `k × k`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalPlusLowRank<T: Scalar> {
    diag: Col<T>,
    u: Mat<T>,
    c: Mat<T>,
    v: Mat<T>,
}

impl<T: Scalar> DiagonalPlusLowRank<T> {
    /// Builds `D + U · C · Vᵀ` with `D = diag(diag)`.
    ///
    /// # Errors
    ///
    /// [`BlockErrorKind::InputError`](crate::error::BlockErrorKind::InputError)
    /// unless `u` and `v` are `n × k` and `c` is `k × k`, where `n` is the
    /// length of `diag`.
    pub fn new(
        diag: Col<T>,
        u: Mat<T>,
        c: Mat<T>,
        v: Mat<T>,
    ) -> Result<Self, crate::error::BlockError> {
        let n = diag.nrows();
        let k = c.nrows();
        let consistent = c.ncols() == k
            && u.nrows() == n
            && v.nrows() == n
            && u.ncols() == k
            && v.ncols() == k;
        if !consistent {
            return Err(crate::error::BlockErrorKind::InputError(format!(
                "inconsistent factor shapes: D {n}, U {:?}, C {:?}, V {:?}",
                (u.nrows(), u.ncols()),
                (c.nrows(), c.ncols()),
                (v.nrows(), v.ncols()),
            ))
            .into());
        }
        Ok(Self { diag, u, c, v })
    }
}

impl<T: Scalar> Block<T> for DiagonalPlusLowRank<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.diag.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.diag.nrows()
    }

    fn apply_accumulate(&self, mut out: ColMut<'_, T>, rhs: ColRef<'_, T>, alpha: T) {
        for i in 0..self.diag.nrows() {
            out[i] = out[i] + alpha * self.diag[i] * rhs[i];
        }

        let k = self.c.nrows();
        let mut vt_x = Col::<T>::zeros(k);
        let mut c_vt_x = Col::<T>::zeros(k);
        matmul(
            vt_x.as_mut().as_mat_mut(),
            Accum::Replace,
            self.v.transpose(),
            rhs.as_mat(),
            T::one_impl(),
            Par::Seq,
        );
        matmul(
            c_vt_x.as_mut().as_mat_mut(),
            Accum::Replace,
            self.c.as_ref(),
            vt_x.as_ref().as_mat(),
            T::one_impl(),
            Par::Seq,
        );
        matmul(
            out.rb_mut().as_mat_mut(),
            Accum::Add,
            self.u.as_ref(),
            c_vt_x.as_ref().as_mat(),
            alpha,
            Par::Seq,
        );
    }

    fn to_dense(&self) -> Mat<T> {
        let n = self.diag.nrows();
        let mut dense = Mat::zeros(n, n);
        self.materialize_into(dense.as_mut());
        dense
    }

    fn materialize_into(&self, mut dst: MatMut<'_, T>) {
        // Only the k × n correction C·Vᵀ is formed; the n × n product comes
        // from a single GEMM against U.
        let mut c_vt = Mat::<T>::zeros(self.c.nrows(), self.diag.nrows());
        matmul(
            c_vt.as_mut(),
            Accum::Replace,
            self.c.as_ref(),
            self.v.transpose(),
            T::one_impl(),
            Par::Seq,
        );
        matmul(
            dst.rb_mut(),
            Accum::Replace,
            self.u.as_ref(),
            c_vt.as_ref(),
            T::one_impl(),
            Par::Seq,
        );
        for i in 0..self.diag.nrows() {
            dst[(i, i)] = dst[(i, i)] + self.diag[i];
        }
    }
}

/// An all-zero block, for sparse block patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroBlock {
    nrows: usize,
    ncols: usize,
}

impl ZeroBlock {
    /// A zero block of shape `nrows × ncols`. Multiplying by it is a no-op.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self { nrows, ncols }
    }
}

impl<T: Scalar> Block<T> for ZeroBlock {
    #[inline]
    fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    fn apply_accumulate(&self, _out: ColMut<'_, T>, _rhs: ColRef<'_, T>, _alpha: T) {}

    fn to_dense(&self) -> Mat<T> {
        Mat::zeros(self.nrows, self.ncols)
    }

    fn materialize_into(&self, mut dst: MatMut<'_, T>) {
        dst.fill(T::zero_impl());
    }

    #[inline]
    fn get(&self, _row: usize, _col: usize) -> T {
        T::zero_impl()
    }
}
