//! The block-structured operator and the grid of blocks it owns.
//!
//! A [`BlockFactorization`] binds a [`BlockStore`] (a row-major grid of
//! heterogeneous [`Block`]s) to a [`Partition`] describing where each block sits.
//! It never materializes the full matrix unless [`BlockFactorization::to_dense`] is
//! called. Multiplication goes through [`crate::algorithms::multiply`], solves go
//! through [`crate::solvers`].
//!
//! The operator also implements [`faer::matrix_free::LinOp`], so it can be handed
//! directly to faer's matrix-free algorithms.

use crate::{
    algorithms::multiply::{self, worker_count},
    error::{BlockError, BlockErrorKind},
    matrix::{Block, Scalar},
    partition::Partition,
};
use faer::{
    Col, ColMut, ColRef, Mat, MatMut, MatRef, Par,
    dyn_stack::{MemBuffer, MemStack, StackReq},
    linalg::temp_mat_scratch,
    matrix_free::LinOp,
    prelude::ReborrowMut,
    traits::ComplexField,
};

/// Default convergence threshold for solves against an operator.
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// A row-major grid of blocks.
#[derive(Debug)]
pub struct BlockStore<T: Scalar> {
    nblock_rows: usize,
    nblock_cols: usize,
    blocks: Vec<Box<dyn Block<T>>>,
}

impl<T: Scalar> BlockStore<T> {
    /// Builds a grid from blocks listed in row-major order.
    pub fn new(
        nblock_rows: usize,
        nblock_cols: usize,
        blocks: Vec<Box<dyn Block<T>>>,
    ) -> Result<Self, BlockError> {
        if nblock_rows == 0 || nblock_cols == 0 {
            return Err(BlockErrorKind::EmptyOperator(format!(
                "block grid of shape ({nblock_rows}, {nblock_cols})"
            ))
            .into());
        }
        if blocks.len() != nblock_rows * nblock_cols {
            return Err(BlockErrorKind::InputError(format!(
                "a {nblock_rows}x{nblock_cols} grid needs {} blocks, got {}",
                nblock_rows * nblock_cols,
                blocks.len()
            ))
            .into());
        }
        Ok(Self {
            nblock_rows,
            nblock_cols,
            blocks,
        })
    }

    /// Builds a grid by calling `f(i, j)` for every block position.
    pub fn from_fn<B, F>(nblock_rows: usize, nblock_cols: usize, mut f: F) -> Result<Self, BlockError>
    where
        B: Block<T> + 'static,
        F: FnMut(usize, usize) -> B,
    {
        let mut blocks: Vec<Box<dyn Block<T>>> = Vec::with_capacity(nblock_rows * nblock_cols);
        for i in 0..nblock_rows {
            for j in 0..nblock_cols {
                blocks.push(Box::new(f(i, j)));
            }
        }
        Self::new(nblock_rows, nblock_cols, blocks)
    }

    /// Builds a grid from nested rows of blocks.
    pub fn from_rows(rows: Vec<Vec<Box<dyn Block<T>>>>) -> Result<Self, BlockError> {
        let nblock_rows = rows.len();
        let nblock_cols = rows.first().map_or(0, Vec::len);
        if let Some(i) = rows.iter().position(|row| row.len() != nblock_cols) {
            return Err(BlockErrorKind::InputError(format!(
                "block row {i} has {} blocks, expected {nblock_cols}",
                rows[i].len()
            ))
            .into());
        }
        Self::new(nblock_rows, nblock_cols, rows.into_iter().flatten().collect())
    }

    /// `(block rows, block columns)`.
    #[inline]
    pub fn nblocks(&self) -> (usize, usize) {
        (self.nblock_rows, self.nblock_cols)
    }

    /// The block at grid position `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if `(i, j)` is outside the grid.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> &dyn Block<T> {
        assert!(i < self.nblock_rows && j < self.nblock_cols);
        self.blocks[i * self.nblock_cols + j].as_ref()
    }
}

/// A matrix-free operator assembled from a grid of blocks.
///
/// Immutable once built: there is no API to replace a block, and solves take
/// tolerance overrides per call rather than writing them back.
#[derive(Debug)]
pub struct BlockFactorization<T: Scalar> {
    blocks: BlockStore<T>,
    partition: Partition,
    tolerance: T::Real,
}

impl<T: Scalar> BlockFactorization<T> {
    /// Binds `blocks` to `partition`, checking that every block has the shape of
    /// its partition slice.
    ///
    /// A hand-built `partition` is checked with [`Partition::validate`] first.
    pub fn new(blocks: BlockStore<T>, partition: Partition) -> Result<Self, BlockError> {
        partition.validate()?;
        let (nblock_rows, nblock_cols) = partition.nblocks();
        if blocks.nblocks() != (nblock_rows, nblock_cols) {
            return Err(BlockErrorKind::InputError(format!(
                "block grid is {:?} but the partition describes {:?} blocks",
                blocks.nblocks(),
                (nblock_rows, nblock_cols)
            ))
            .into());
        }

        for i in 0..nblock_rows {
            for j in 0..nblock_cols {
                let expected = (partition.row_range(i).len(), partition.col_range(j).len());
                let found = blocks.get(i, j).shape();
                if expected != found {
                    return Err(BlockErrorKind::ShapeMismatch {
                        block_row: i,
                        block_col: j,
                        expected,
                        found,
                    }
                    .into());
                }
            }
        }

        let (nrows, ncols) = partition.shape();
        log::debug!(
            "Built {nblock_rows}x{nblock_cols} block operator of shape {nrows}x{ncols} ({}).",
            if partition.is_uniform() { "uniform" } else { "irregular" }
        );

        Ok(Self {
            blocks,
            partition,
            tolerance: <T::Real as ComplexField>::from_f64_impl(DEFAULT_TOLERANCE),
        })
    }

    /// Binds `blocks` to explicit row and column boundaries.
    pub fn from_bounds(
        blocks: BlockStore<T>,
        row_bounds: &[usize],
        col_bounds: &[usize],
    ) -> Result<Self, BlockError> {
        Self::new(blocks, Partition::from_bounds(row_bounds, col_bounds)?)
    }

    /// Binds `blocks` to a uniform partition of square `block_size × block_size` blocks.
    pub fn with_block_size(blocks: BlockStore<T>, block_size: usize) -> Result<Self, BlockError> {
        let (nblock_rows, nblock_cols) = blocks.nblocks();
        Self::new(
            blocks,
            Partition::uniform(nblock_rows, nblock_cols, block_size)?,
        )
    }

    /// Infers a uniform partition from the shape of block `(0, 0)`.
    ///
    /// Fails with [`BlockErrorKind::ShapeMismatch`] if any other block has a
    /// different shape.
    pub fn from_uniform_blocks(blocks: BlockStore<T>) -> Result<Self, BlockError> {
        let (nblock_rows, nblock_cols) = blocks.nblocks();
        let (block_rows, block_cols) = blocks.get(0, 0).shape();
        Self::new(
            blocks,
            Partition::uniform_rect(nblock_rows, nblock_cols, block_rows, block_cols)?,
        )
    }

    /// Returns a copy of this operator's configuration with a different default
    /// solve tolerance.
    pub fn with_tolerance(mut self, tolerance: T::Real) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.partition.shape()
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.shape().0
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.shape().1
    }

    #[inline]
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    #[inline]
    pub fn blocks(&self) -> &BlockStore<T> {
        &self.blocks
    }

    /// The block at grid position `(i, j)`.
    #[inline]
    pub fn block(&self, i: usize, j: usize) -> &dyn Block<T> {
        self.blocks.get(i, j)
    }

    /// The default convergence threshold of solves against this operator.
    #[inline]
    pub fn tolerance(&self) -> T::Real {
        self.tolerance
    }

    /// Materializes the whole operator into a freshly allocated dense matrix.
    pub fn to_dense(&self) -> Mat<T> {
        let (nrows, ncols) = self.shape();
        let (nblock_rows, nblock_cols) = self.partition.nblocks();
        let mut dense = Mat::<T>::zeros(nrows, ncols);
        for i in 0..nblock_rows {
            let rows = self.partition.row_range(i);
            for j in 0..nblock_cols {
                let cols = self.partition.col_range(j);
                let dst = dense
                    .as_mut()
                    .submatrix_mut(rows.start, cols.start, rows.len(), cols.len());
                self.blocks.get(i, j).materialize_into(dst);
            }
        }
        dense
    }

    /// Returns the entry at `(row, col)`, delegating to the owning block.
    pub fn get(&self, row: usize, col: usize) -> Result<T, BlockError> {
        let shape = self.shape();
        if row >= shape.0 || col >= shape.1 {
            return Err(BlockErrorKind::IndexOutOfBounds { row, col, shape }.into());
        }
        let (block_row, local_row) = self.partition.block_of_row(row);
        let (block_col, local_col) = self.partition.block_of_col(col);
        Ok(self.blocks.get(block_row, block_col).get(local_row, local_col))
    }

    /// The scratch space [`Self::mul_add_into`] needs for parallelism `par`.
    ///
    /// Uniform partitions need one dense block per worker; irregular
    /// partitions need none.
    pub fn mul_scratch(&self, par: Par) -> StackReq {
        match &self.partition {
            Partition::Uniform {
                block_rows,
                block_cols,
                nblock_rows,
                ..
            } => {
                let workers = worker_count(par, *nblock_rows);
                temp_mat_scratch::<T>(*block_rows, block_cols * workers)
            }
            Partition::Irregular { .. } => StackReq::empty(),
        }
    }

    /// Computes `out ← alpha · (self · rhs) + beta · out` in place.
    ///
    /// `stack` must provide at least [`Self::mul_scratch`]`(par)`. Dimensions are
    /// checked before anything is written.
    pub fn mul_add_into(
        &self,
        out: ColMut<'_, T>,
        rhs: ColRef<'_, T>,
        alpha: T,
        beta: T,
        par: Par,
        stack: &mut MemStack,
    ) -> Result<(), BlockError> {
        let (nrows, ncols) = self.shape();
        if rhs.nrows() != ncols {
            return Err(BlockErrorKind::DimensionMismatch {
                what: "input vector",
                expected: ncols,
                found: rhs.nrows(),
            }
            .into());
        }
        if out.nrows() != nrows {
            return Err(BlockErrorKind::DimensionMismatch {
                what: "output vector",
                expected: nrows,
                found: out.nrows(),
            }
            .into());
        }

        match &self.partition {
            Partition::Uniform {
                block_rows,
                block_cols,
                nblock_rows,
                nblock_cols,
            } => multiply::strided(
                &self.blocks,
                multiply::StridedLayout {
                    block_rows: *block_rows,
                    block_cols: *block_cols,
                    nblock_rows: *nblock_rows,
                    nblock_cols: *nblock_cols,
                },
                out,
                rhs,
                alpha,
                beta,
                par,
                stack,
            ),
            Partition::Irregular { .. } => {
                multiply::general(&self.blocks, &self.partition, out, rhs, alpha, beta)
            }
        }
        Ok(())
    }

    /// Same as [`Self::mul_add_into`], allocating the scratch space itself.
    pub fn mul_add(
        &self,
        out: ColMut<'_, T>,
        rhs: ColRef<'_, T>,
        alpha: T,
        beta: T,
        par: Par,
    ) -> Result<(), BlockError> {
        let mut mem = MemBuffer::new(self.mul_scratch(par));
        let stack = MemStack::new(&mut mem);
        self.mul_add_into(out, rhs, alpha, beta, par, stack)
    }

    /// Returns `self · rhs`.
    pub fn mul(&self, rhs: ColRef<'_, T>, par: Par) -> Result<Col<T>, BlockError> {
        let mut out = Col::<T>::zeros(self.nrows());
        self.mul_add(out.as_mut(), rhs, T::one_impl(), T::zero_impl(), par)?;
        Ok(out)
    }
}

impl<T: Scalar> LinOp<T> for BlockFactorization<T> {
    fn apply_scratch(&self, rhs_ncols: usize, par: Par) -> StackReq {
        let _ = rhs_ncols;
        self.mul_scratch(par)
    }

    #[inline]
    fn nrows(&self) -> usize {
        self.shape().0
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.shape().1
    }

    /// # Panics
    ///
    /// Panics on a dimension mismatch, since this signature cannot report errors.
    fn apply(&self, mut out: MatMut<'_, T>, rhs: MatRef<'_, T>, par: Par, stack: &mut MemStack) {
        assert_eq!(
            out.ncols(),
            rhs.ncols(),
            "Dimension mismatch: output has {} columns but rhs has {}.",
            out.ncols(),
            rhs.ncols(),
        );
        for k in 0..rhs.ncols() {
            if let Err(e) = self.mul_add_into(
                out.rb_mut().col_mut(k),
                rhs.col(k),
                T::one_impl(),
                T::zero_impl(),
                par,
                stack,
            ) {
                panic!("{e}");
            }
        }
    }

    fn conj_apply(&self, mut out: MatMut<'_, T>, rhs: MatRef<'_, T>, par: Par, stack: &mut MemStack) {
        // conj(A)·x = conj(A·conj(x)).
        let rhs_conj = Mat::<T>::from_fn(rhs.nrows(), rhs.ncols(), |i, j| {
            T::conj_impl(&rhs[(i, j)])
        });
        self.apply(out.rb_mut(), rhs_conj.as_ref(), par, stack);
        for j in 0..out.ncols() {
            for i in 0..out.nrows() {
                out[(i, j)] = T::conj_impl(&out[(i, j)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Diagonal, ZeroBlock};
    use faer::mat;

    fn identity_grid() -> BlockFactorization<f64> {
        let store = BlockStore::from_fn(2, 2, |i, j| {
            if i == j {
                Mat::<f64>::identity(2, 2)
            } else {
                Mat::<f64>::zeros(2, 2)
            }
        })
        .unwrap();
        BlockFactorization::from_uniform_blocks(store).unwrap()
    }

    #[test]
    fn test_identity_scenario() {
        let b = identity_grid();
        assert_eq!(b.shape(), (4, 4));
        assert!(b.partition().is_uniform());
        assert_eq!(b.to_dense(), Mat::<f64>::identity(4, 4));

        let x = Col::from_fn(4, |i| (i + 1) as f64);
        let y = b.mul(x.as_ref(), Par::Seq).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_element_access() {
        let store = BlockStore::from_fn(2, 3, |i, j| {
            Mat::<f64>::from_fn(2, 2, |r, c| (10 * (i * 2 + r) + (j * 2 + c)) as f64)
        })
        .unwrap();
        let b = BlockFactorization::with_block_size(store, 2).unwrap();
        assert_eq!(b.get(3, 5).unwrap(), 35.0);
        assert_eq!(b.get(2, 1).unwrap(), 21.0);

        let err = b.get(4, 0).unwrap_err();
        assert_eq!(
            err.kind(),
            &BlockErrorKind::IndexOutOfBounds {
                row: 4,
                col: 0,
                shape: (4, 6)
            }
        );
    }

    #[test]
    fn test_irregular_element_access() {
        let blocks: Vec<Box<dyn Block<f64>>> = vec![
            Box::new(Diagonal::constant(1, 5.0)),
            Box::new(ZeroBlock::new(1, 2)),
            Box::new(ZeroBlock::new(2, 1)),
            Box::new(mat![[1.0, 2.0], [3.0, 4.0]]),
        ];
        let store = BlockStore::new(2, 2, blocks).unwrap();
        let b = BlockFactorization::from_bounds(store, &[0, 1, 3], &[0, 1, 3]).unwrap();
        assert!(!b.partition().is_uniform());
        assert_eq!(b.get(0, 0).unwrap(), 5.0);
        assert_eq!(b.get(2, 1).unwrap(), 3.0);
        assert_eq!(b.get(1, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_non_uniform_blocks_are_rejected() {
        let blocks: Vec<Box<dyn Block<f64>>> = vec![
            Box::new(Mat::<f64>::zeros(2, 2)),
            Box::new(Mat::<f64>::zeros(2, 2)),
            Box::new(Mat::<f64>::zeros(3, 2)),
            Box::new(Mat::<f64>::zeros(2, 2)),
        ];
        let store = BlockStore::new(2, 2, blocks).unwrap();
        let err = BlockFactorization::from_uniform_blocks(store).unwrap_err();
        assert_eq!(
            err.kind(),
            &BlockErrorKind::ShapeMismatch {
                block_row: 1,
                block_col: 0,
                expected: (2, 2),
                found: (3, 2),
            }
        );
    }

    #[test]
    fn test_grid_and_store_validation() {
        let err = BlockStore::<f64>::new(0, 2, Vec::new()).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::EmptyOperator(_)));

        let too_few: Vec<Box<dyn Block<f64>>> = vec![Box::new(ZeroBlock::new(1, 1))];
        let err = BlockStore::new(1, 2, too_few).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::InputError(_)));

        let store = BlockStore::from_fn(2, 2, |_, _| ZeroBlock::new(2, 2)).unwrap();
        let err = BlockFactorization::<f64>::new(store, Partition::uniform(3, 2, 2).unwrap())
            .unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::InputError(_)));
    }

    #[test]
    fn test_hand_built_partitions_are_rejected() {
        // Block shapes agree with the partition, so only the partition itself is at fault.
        let rows = [2, 0, 2];
        let store = BlockStore::from_fn(3, 1, |i, _| ZeroBlock::new(rows[i], 4)).unwrap();
        let repeated = Partition::Irregular {
            row_bounds: vec![0, 2, 2, 4],
            col_bounds: vec![0, 4],
        };
        let err = BlockFactorization::<f64>::new(store, repeated).unwrap_err();
        assert!(matches!(
            err.kind(),
            BlockErrorKind::InvalidPartition { axis: "row", .. }
        ));

        let store = BlockStore::from_fn(2, 2, |_, _| ZeroBlock::new(2, 0)).unwrap();
        let zero_width = Partition::Uniform {
            block_rows: 2,
            block_cols: 0,
            nblock_rows: 2,
            nblock_cols: 2,
        };
        let err = BlockFactorization::<f64>::new(store, zero_width).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::EmptyOperator(_)));
    }

    #[test]
    fn test_linop_apply_matches_mul() {
        let b = identity_grid();
        let rhs = Mat::<f64>::from_fn(4, 2, |i, j| (i + 4 * j) as f64);
        let mut out = Mat::<f64>::zeros(4, 2);
        let mut mem = MemBuffer::new(LinOp::apply_scratch(&b, 2, Par::Seq));
        LinOp::apply(&b, out.as_mut(), rhs.as_ref(), Par::Seq, MemStack::new(&mut mem));
        assert_eq!(out, rhs);

        let mut conj_out = Mat::<f64>::zeros(4, 2);
        LinOp::conj_apply(&b, conj_out.as_mut(), rhs.as_ref(), Par::Seq, MemStack::new(&mut mem));
        assert_eq!(conj_out, rhs);
    }

    #[test]
    fn test_tolerance_override_is_per_operator_copy() {
        let b = identity_grid();
        assert_eq!(b.tolerance(), DEFAULT_TOLERANCE);
        let b = b.with_tolerance(1e-3);
        assert_eq!(b.tolerance(), 1e-3);
    }
}
