//! Matrix-vector multiplication for block operators.
//!
//! ** NOTE: We recommend using the high-level methods
//! [`BlockFactorization::mul_add_into`](crate::factorization::BlockFactorization::mul_add_into)
//! and friends instead. This module is intended for benchmarking the two
//! strategies against each other on the same block grid.
//!
//! Both strategies compute `out ← alpha · (B · rhs) + beta · out` and visit block
//! columns in the fixed order `j = 0..C`, so a given block row is always summed in
//! the same order.
//!
//! ## General algorithm
//!
//! [`general`] works for any partition. It takes zero-copy sub-vector views of
//! `rhs` and `out` per block boundary and lets each block accumulate its own
//! contribution through [`Block::apply_accumulate`](crate::matrix::Block::apply_accumulate).
//! No engine scratch is used; a block may allocate internally.
//!
//! ## Strided algorithm
//!
//! [`strided`] requires every block to have the same shape `dr × dc`. The flat
//! vectors are then reinterpreted as a `dc × C` and a `dr × R` matrix, so column
//! `j` of the first is the input of block column `j` and column `i` of the second
//! is the output of block row `i`. Each block is materialized into a dense
//! scratch buffer and applied with a single GEMV, which keeps the pass free of
//! heap allocation.
//!
//! Block rows are split into contiguous chunks, one per worker, and each worker
//! owns one scratch buffer carved out of the caller's [`MemStack`]. Workers write
//! to disjoint output columns and only read `rhs`, so no synchronization is
//! needed and the result does not depend on the number of workers.

use crate::{factorization::BlockStore, matrix::Scalar, partition::Partition};
use faer::{
    Accum, ColMut, ColRef, MatMut, MatRef, Par,
    dyn_stack::MemStack,
    linalg::{matmul::matmul, temp_mat_zeroed},
    mat::AsMatMut,
    prelude::{Reborrow, ReborrowMut},
};

/// The number of workers a strided pass uses for parallelism `par`: one per
/// thread of `par`, but never more than there are block rows.
pub fn worker_count(par: Par, nblock_rows: usize) -> usize {
    par.degree().clamp(1, nblock_rows.max(1))
}

/// Shape of a uniform block grid, as consumed by [`strided`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StridedLayout {
    pub block_rows: usize,
    pub block_cols: usize,
    pub nblock_rows: usize,
    pub nblock_cols: usize,
}

/// `v ← beta · v`. A zero `beta` overwrites `v`, so stale NaNs do not leak
/// into the result.
fn scale<T: Scalar>(mut v: ColMut<'_, T>, beta: T) {
    if beta == T::one_impl() {
        return;
    }
    if beta == T::zero_impl() {
        for i in 0..v.nrows() {
            v[i] = T::zero_impl();
        }
        return;
    }
    for i in 0..v.nrows() {
        v[i] = beta * v[i];
    }
}

/// Multiplies through each block's own accumulate operation.
///
/// The caller guarantees that `blocks` matches `partition` and that the vector
/// lengths match the partition's shape.
pub fn general<T: Scalar>(
    blocks: &BlockStore<T>,
    partition: &Partition,
    mut out: ColMut<'_, T>,
    rhs: ColRef<'_, T>,
    alpha: T,
    beta: T,
) {
    let (nblock_rows, nblock_cols) = partition.nblocks();
    for i in 0..nblock_rows {
        let rows = partition.row_range(i);
        let mut out_i = out.rb_mut().subrows_mut(rows.start, rows.len());
        scale(out_i.rb_mut(), beta);
        for j in 0..nblock_cols {
            let cols = partition.col_range(j);
            blocks.get(i, j).apply_accumulate(
                out_i.rb_mut(),
                rhs.subrows(cols.start, cols.len()),
                alpha,
            );
        }
    }
}

/// Multiplies a uniform block grid through per-worker dense scratch blocks.
///
/// `stack` must hold a `block_rows × (block_cols · workers)` temporary matrix,
/// where `workers` is [`worker_count`]`(par, nblock_rows)`. The caller
/// guarantees that the vector lengths match `layout`.
#[allow(clippy::too_many_arguments)]
pub fn strided<T: Scalar>(
    blocks: &BlockStore<T>,
    layout: StridedLayout,
    out: ColMut<'_, T>,
    rhs: ColRef<'_, T>,
    alpha: T,
    beta: T,
    par: Par,
    stack: &mut MemStack,
) {
    let workers = worker_count(par, layout.nblock_rows);

    // One dense block per worker, side by side.
    let (mut scratch_storage, _) =
        temp_mat_zeroed::<T, _, _>(layout.block_rows, layout.block_cols * workers, stack);
    let scratch = scratch_storage.as_mat_mut();

    let pass = StridedPass {
        blocks,
        layout,
        rhs_blocks: reshape(rhs, layout.block_cols, layout.nblock_cols),
        alpha,
        beta,
    };
    pass.run(
        reshape_mut(out, layout.block_rows, layout.nblock_rows),
        scratch,
        0,
    );
}

/// Read-only state shared by all workers of one strided pass.
struct StridedPass<'a, T: Scalar> {
    blocks: &'a BlockStore<T>,
    layout: StridedLayout,
    rhs_blocks: MatRef<'a, T>,
    alpha: T,
    beta: T,
}

impl<T: Scalar> StridedPass<'_, T> {
    /// Processes the block rows `first_row..first_row + out_blocks.ncols()`.
    ///
    /// `scratch` holds one buffer per worker assigned to this range. The range
    /// and the buffers are halved together until each half has one worker, so
    /// every worker touches only its own buffer and its own output columns.
    fn run(&self, mut out_blocks: MatMut<'_, T>, mut scratch: MatMut<'_, T>, first_row: usize) {
        let workers = scratch.ncols() / self.layout.block_cols;
        let nrows = out_blocks.ncols();

        if workers <= 1 {
            for local in 0..nrows {
                self.block_row(
                    first_row + local,
                    out_blocks.rb_mut().col_mut(local),
                    scratch.rb_mut(),
                );
            }
            return;
        }

        // workers <= nrows holds on entry and on both halves.
        let left_workers = workers / 2;
        let left_rows = nrows * left_workers / workers;
        let (out_left, out_right) = out_blocks.split_at_col_mut(left_rows);
        let (scratch_left, scratch_right) =
            scratch.split_at_col_mut(left_workers * self.layout.block_cols);

        rayon::join(
            || self.run(out_left, scratch_left, first_row),
            || self.run(out_right, scratch_right, first_row + left_rows),
        );
    }

    fn block_row(&self, i: usize, mut out_i: ColMut<'_, T>, mut buf: MatMut<'_, T>) {
        scale(out_i.rb_mut(), self.beta);
        for j in 0..self.layout.nblock_cols {
            self.blocks.get(i, j).materialize_into(buf.rb_mut());
            matmul(
                out_i.rb_mut().as_mat_mut(),
                Accum::Add,
                buf.rb(),
                self.rhs_blocks.col(j).as_mat(),
                self.alpha,
                Par::Seq,
            );
        }
    }
}

/// Views a column of length `nrows · ncols` as an `nrows × ncols` matrix.
fn reshape<T: Scalar>(v: ColRef<'_, T>, nrows: usize, ncols: usize) -> MatRef<'_, T> {
    assert_eq!(v.nrows(), nrows * ncols);
    let stride = v.row_stride();
    // SAFETY: element (r, c) of the view is element r + c·nrows of `v`, which is
    // in bounds because `v` has exactly nrows·ncols elements. The view borrows
    // `v` immutably for the same lifetime.
    unsafe {
        MatRef::from_raw_parts(
            v.as_ptr(),
            nrows,
            ncols,
            stride,
            stride * nrows as isize,
        )
    }
}

/// Mutable counterpart of [`reshape`].
fn reshape_mut<T: Scalar>(v: ColMut<'_, T>, nrows: usize, ncols: usize) -> MatMut<'_, T> {
    assert_eq!(v.nrows(), nrows * ncols);
    let stride = v.row_stride();
    // SAFETY: as in `reshape`. The view maps each element of `v` exactly once,
    // and `v` is consumed, so the mutable borrow stays unique.
    unsafe {
        MatMut::from_raw_parts_mut(
            v.as_ptr_mut(),
            nrows,
            ncols,
            stride,
            stride * nrows as isize,
        )
    }
}
