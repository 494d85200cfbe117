//! Builds kernel Gramians, either densely or as block operators.
//!
//! [`kernel_matrix`] is the plain dense Gramian `K[i, j] = k(xᵢ, yⱼ)`.
//!
//! [`blocked_gramian`] groups the points of a [`PointSet`] into consecutive
//! chunks and returns the Gramian as a [`BlockFactorization`] with one block per
//! pair of chunks. [`multi_output_gramian`] does the same for a
//! [`MultiOutputKernel`], one `d × d` block per pair of points. In both cases
//! [`Evaluation`] picks between computing every block up front and keeping
//! blocks that evaluate the kernel on demand.

use crate::{
    error::{BlockError, BlockErrorKind},
    factorization::{BlockFactorization, BlockStore, DEFAULT_TOLERANCE},
    kernels::{Kernel, MultiOutputKernel},
    matrix::Block,
    partition::Partition,
};
use faer::{Accum, ColMut, ColRef, Mat, MatMut, Par, linalg::matmul::matmul, prelude::ReborrowMut};
use rayon::prelude::*;
use std::{ops::Range, sync::Arc};

/// `n` points of dimension `dim`, stored contiguously point after point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    dim: usize,
    coords: Vec<f64>,
}

impl PointSet {
    /// Splits `coords` into consecutive points of `dim` coordinates each.
    ///
    /// Fails with [`BlockErrorKind::InputError`] if `dim` is zero or does not
    /// divide `coords.len()`.
    pub fn new(dim: usize, coords: Vec<f64>) -> Result<Self, BlockError> {
        if dim == 0 || coords.len() % dim != 0 {
            return Err(BlockErrorKind::InputError(format!(
                "{} coordinates cannot be split into points of dimension {dim}",
                coords.len()
            ))
            .into());
        }
        Ok(Self { dim, coords })
    }

    /// Builds a set of one-dimensional points.
    pub fn from_scalars(values: &[f64]) -> Self {
        Self {
            dim: 1,
            coords: values.to_vec(),
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coords.len() / self.dim
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// The coordinates of point `i`.
    #[inline]
    pub fn point(&self, i: usize) -> &[f64] {
        &self.coords[i * self.dim..(i + 1) * self.dim]
    }
}

/// How the blocks of a Gramian operator are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Evaluation {
    /// Every block is computed once, in parallel, and stored densely.
    Eager,
    /// Blocks keep the kernel and the points, and evaluate entries on demand.
    #[default]
    Lazy,
}

/// How [`blocked_gramian`] and [`multi_output_gramian`] assemble their operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GramianOptions {
    pub evaluation: Evaluation,
    /// Added to the diagonal of the Gramian.
    pub jitter: f64,
    /// Solve tolerance of the resulting operator.
    pub tolerance: f64,
}

impl Default for GramianOptions {
    fn default() -> Self {
        Self {
            evaluation: Evaluation::default(),
            jitter: 0.0,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

fn check_dims(x: &PointSet, y: &PointSet) -> Result<(), BlockError> {
    if x.dim() != y.dim() {
        return Err(BlockErrorKind::DimensionMismatch {
            what: "second point set",
            expected: x.dim(),
            found: y.dim(),
        }
        .into());
    }
    Ok(())
}

/// Returns the dense Gramian `K[i, j] = k(xᵢ, yⱼ)`, computed column by column in
/// parallel.
pub fn kernel_matrix<K: Kernel>(kernel: &K, x: &PointSet, y: &PointSet) -> Result<Mat<f64>, BlockError> {
    check_dims(x, y)?;
    let (m, n) = (x.len(), y.len());
    let columns: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|j| (0..m).map(|i| kernel.eval(x.point(i), y.point(j))).collect())
        .collect();
    Ok(Mat::from_fn(m, n, |i, j| columns[j][i]))
}

/// A block of a scalar Gramian that evaluates the kernel on demand.
///
/// Multiplication runs row by row without materializing the block.
#[derive(Debug)]
pub struct KernelBlock<K> {
    kernel: Arc<K>,
    points: Arc<PointSet>,
    rows: Range<usize>,
    cols: Range<usize>,
    jitter: f64,
}

impl<K: Kernel> KernelBlock<K> {
    /// The block covering points `rows × cols` of `points`.
    ///
    /// Fails with [`BlockErrorKind::InputError`] if either range is reversed or
    /// reaches past the last point.
    pub fn new(
        kernel: Arc<K>,
        points: Arc<PointSet>,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<Self, BlockError> {
        let n = points.len();
        for range in [&rows, &cols] {
            if range.start > range.end || range.end > n {
                return Err(BlockErrorKind::InputError(format!(
                    "point range {range:?} does not fit in a set of {n} points"
                ))
                .into());
            }
        }
        Ok(Self {
            kernel,
            points,
            rows,
            cols,
            jitter: 0.0,
        })
    }

    /// Adds `jitter` to the entries that lie on the diagonal of the full Gramian.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    #[inline]
    fn entry(&self, i: usize, j: usize) -> f64 {
        let (r, c) = (self.rows.start + i, self.cols.start + j);
        let value = self.kernel.eval(self.points.point(r), self.points.point(c));
        if r == c { value + self.jitter } else { value }
    }
}

impl<K: Kernel> Block<f64> for KernelBlock<K> {
    #[inline]
    fn nrows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.cols.len()
    }

    fn apply_accumulate(&self, mut out: ColMut<'_, f64>, rhs: ColRef<'_, f64>, alpha: f64) {
        for i in 0..self.nrows() {
            let mut acc = 0.0;
            for j in 0..self.ncols() {
                acc += self.entry(i, j) * rhs[j];
            }
            out[i] += alpha * acc;
        }
    }

    fn to_dense(&self) -> Mat<f64> {
        Mat::from_fn(self.nrows(), self.ncols(), |i, j| self.entry(i, j))
    }

    fn materialize_into(&self, mut dst: MatMut<'_, f64>) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                dst[(i, j)] = self.entry(i, j);
            }
        }
    }

    #[inline]
    fn get(&self, row: usize, col: usize) -> f64 {
        self.entry(row, col)
    }
}

/// The `d × d` block `K(xᵢ, xⱼ)` of a multi-output Gramian.
///
/// Has no native accumulate path: multiplication evaluates the block into a
/// temporary and runs one GEMV.
#[derive(Debug)]
pub struct MultiOutputBlock<K> {
    kernel: Arc<K>,
    points: Arc<PointSet>,
    row_point: usize,
    col_point: usize,
    jitter: f64,
}

impl<K: MultiOutputKernel> MultiOutputBlock<K> {
    /// The block `K(x_row_point, x_col_point)`, or an
    /// [`BlockErrorKind::InputError`] if either index is not a point of `points`.
    pub fn new(
        kernel: Arc<K>,
        points: Arc<PointSet>,
        row_point: usize,
        col_point: usize,
    ) -> Result<Self, BlockError> {
        let n = points.len();
        if row_point >= n || col_point >= n {
            return Err(BlockErrorKind::InputError(format!(
                "point pair ({row_point}, {col_point}) is out of bounds for {n} points"
            ))
            .into());
        }
        Ok(Self {
            kernel,
            points,
            row_point,
            col_point,
            jitter: 0.0,
        })
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

impl<K: MultiOutputKernel> Block<f64> for MultiOutputBlock<K> {
    #[inline]
    fn nrows(&self) -> usize {
        self.kernel.output_dim()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.kernel.output_dim()
    }

    fn apply_accumulate(&self, mut out: ColMut<'_, f64>, rhs: ColRef<'_, f64>, alpha: f64) {
        let dense = self.to_dense();
        matmul(
            out.rb_mut().as_mat_mut(),
            Accum::Add,
            dense.as_ref(),
            rhs.as_mat(),
            alpha,
            Par::Seq,
        );
    }

    fn to_dense(&self) -> Mat<f64> {
        let d = self.kernel.output_dim();
        let mut dense = Mat::zeros(d, d);
        self.materialize_into(dense.as_mut());
        dense
    }

    fn materialize_into(&self, mut dst: MatMut<'_, f64>) {
        self.kernel.eval_into(
            self.points.point(self.row_point),
            self.points.point(self.col_point),
            dst.rb_mut(),
        );
        if self.row_point == self.col_point && self.jitter != 0.0 {
            for i in 0..dst.nrows() {
                dst[(i, i)] += self.jitter;
            }
        }
    }
}

/// `[0, b, 2b, …, n]`: the last chunk is shorter when `b` does not divide `n`.
fn chunk_bounds(n: usize, block_size: usize) -> Vec<usize> {
    let mut bounds: Vec<usize> = (0..n).step_by(block_size).collect();
    bounds.push(n);
    bounds
}

/// Returns the Gramian of `kernel` over `points` as a block operator with blocks
/// of `block_size × block_size` points (smaller along the last block row and
/// column when `block_size` does not divide the number of points).
///
/// The partition is uniform exactly when `block_size` divides the number of
/// points, in which case multiplication takes the strided path.
pub fn blocked_gramian<K: Kernel + 'static>(
    kernel: K,
    points: &PointSet,
    block_size: usize,
    options: &GramianOptions,
) -> Result<BlockFactorization<f64>, BlockError> {
    let n = points.len();
    if n == 0 || block_size == 0 {
        return Err(BlockErrorKind::EmptyOperator(format!(
            "Gramian of {n} points in blocks of {block_size}"
        ))
        .into());
    }

    let bounds = chunk_bounds(n, block_size);
    let partition = Partition::from_bounds(&bounds, &bounds)?;
    let (nblock_rows, nblock_cols) = partition.nblocks();
    let kernel = Arc::new(kernel);
    let points = Arc::new(points.clone());

    let block = |i: usize, j: usize| {
        KernelBlock::new(
            kernel.clone(),
            points.clone(),
            partition.row_range(i),
            partition.col_range(j),
        )
        .map(|block| block.with_jitter(options.jitter))
    };

    let blocks: Vec<Box<dyn Block<f64>>> = match options.evaluation {
        Evaluation::Eager => {
            let dense: Vec<Mat<f64>> = (0..nblock_rows * nblock_cols)
                .into_par_iter()
                .map(|idx| block(idx / nblock_cols, idx % nblock_cols).map(|b| b.to_dense()))
                .collect::<Result<_, BlockError>>()?;
            dense
                .into_iter()
                .map(|block| Box::new(block) as Box<dyn Block<f64>>)
                .collect()
        }
        Evaluation::Lazy => (0..nblock_rows * nblock_cols)
            .map(|idx| {
                block(idx / nblock_cols, idx % nblock_cols)
                    .map(|b| Box::new(b) as Box<dyn Block<f64>>)
            })
            .collect::<Result<_, BlockError>>()?,
    };
    let store = BlockStore::new(nblock_rows, nblock_cols, blocks)?;

    log::debug!(
        "Assembled {:?} Gramian of {n} points in {nblock_rows}x{nblock_cols} blocks.",
        options.evaluation
    );
    Ok(BlockFactorization::new(store, partition)?.with_tolerance(options.tolerance))
}

/// Returns the `n·d × n·d` Gramian of a multi-output kernel over `n` points, one
/// `d × d` block per pair of points.
pub fn multi_output_gramian<K: MultiOutputKernel + 'static>(
    kernel: K,
    points: &PointSet,
    options: &GramianOptions,
) -> Result<BlockFactorization<f64>, BlockError> {
    let n = points.len();
    let d = kernel.output_dim();
    if n == 0 || d == 0 {
        return Err(BlockErrorKind::EmptyOperator(format!(
            "multi-output Gramian of {n} points with output dimension {d}"
        ))
        .into());
    }

    let kernel = Arc::new(kernel);
    let points = Arc::new(points.clone());
    let block = |i: usize, j: usize| {
        MultiOutputBlock::new(kernel.clone(), points.clone(), i, j)
            .map(|block| block.with_jitter(options.jitter))
    };

    let blocks: Vec<Box<dyn Block<f64>>> = match options.evaluation {
        Evaluation::Eager => {
            let dense: Vec<Mat<f64>> = (0..n * n)
                .into_par_iter()
                .map(|idx| block(idx / n, idx % n).map(|b| b.to_dense()))
                .collect::<Result<_, BlockError>>()?;
            dense
                .into_iter()
                .map(|block| Box::new(block) as Box<dyn Block<f64>>)
                .collect()
        }
        Evaluation::Lazy => (0..n * n)
            .map(|idx| block(idx / n, idx % n).map(|b| Box::new(b) as Box<dyn Block<f64>>))
            .collect::<Result<_, BlockError>>()?,
    };
    let store = BlockStore::new(n, n, blocks)?;

    log::debug!(
        "Assembled {:?} multi-output Gramian of {n} points with output dimension {d}.",
        options.evaluation
    );
    Ok(BlockFactorization::with_block_size(store, d)?.with_tolerance(options.tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{ExponentiatedQuadratic, IsotropicKernel, Matern52, Separable};
    use faer::Col;

    fn grid_points(n: usize) -> PointSet {
        let coords = (0..n).flat_map(|i| [i as f64 * 0.3, (i as f64 * 0.7).sin()]).collect();
        PointSet::new(2, coords).unwrap()
    }

    #[test]
    fn test_point_set_rejects_ragged_coordinates() {
        assert!(PointSet::new(3, vec![0.0; 7]).is_err());
        assert!(PointSet::new(0, vec![]).is_err());
        let points = PointSet::new(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points.point(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_kernel_matrix_is_symmetric() {
        let points = grid_points(9);
        let k = kernel_matrix(&Matern52, &points, &points).unwrap();
        for i in 0..9 {
            assert!((k[(i, i)] - 1.0).abs() < 1e-15);
            for j in 0..9 {
                assert_eq!(k[(i, j)], k[(j, i)]);
            }
        }
    }

    #[test]
    fn test_kernel_matrix_checks_point_dimensions() {
        let x = grid_points(3);
        let y = PointSet::from_scalars(&[0.0, 1.0]);
        let err = kernel_matrix(&Matern52, &x, &y).unwrap_err();
        assert!(matches!(
            err.kind(),
            BlockErrorKind::DimensionMismatch { expected: 2, found: 1, .. }
        ));
    }

    #[test]
    fn test_blocked_gramian_matches_dense() {
        let points = grid_points(10);
        let kernel = ExponentiatedQuadratic.with_lengthscale(0.8);
        let dense = kernel_matrix(&kernel, &points, &points).unwrap();

        for (block_size, uniform) in [(5, true), (2, true), (3, false), (10, true), (16, true)] {
            for evaluation in [Evaluation::Eager, Evaluation::Lazy] {
                let options = GramianOptions {
                    evaluation,
                    ..Default::default()
                };
                let op = blocked_gramian(kernel, &points, block_size, &options).unwrap();
                assert_eq!(op.partition().is_uniform(), uniform, "block size {block_size}");
                assert_eq!(op.to_dense(), dense);

                let x = Col::<f64>::from_fn(10, |i| 1.0 - 0.1 * i as f64);
                let y = op.mul(x.as_ref(), Par::Seq).unwrap();
                let expected = &dense * &x;
                for i in 0..10 {
                    assert!((y[i] - expected[i]).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_jitter_only_touches_the_diagonal() {
        let points = grid_points(6);
        let plain = blocked_gramian(Matern52, &points, 4, &GramianOptions::default())
            .unwrap()
            .to_dense();
        let options = GramianOptions {
            jitter: 0.5,
            ..Default::default()
        };
        let jittered = blocked_gramian(Matern52, &points, 4, &options).unwrap().to_dense();
        for i in 0..6 {
            for j in 0..6 {
                let shift = if i == j { 0.5 } else { 0.0 };
                assert!((jittered[(i, j)] - plain[(i, j)] - shift).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_multi_output_gramian_layout() {
        let points = grid_points(4);
        let coregion = Mat::<f64>::from_fn(3, 3, |i, j| if i == j { 2.0 } else { 0.5 });
        let kernel = Separable::new(Matern52, coregion.clone()).unwrap();
        let options = GramianOptions {
            evaluation: Evaluation::Eager,
            jitter: 1e-6,
            ..Default::default()
        };
        let op = multi_output_gramian(kernel, &points, &options).unwrap();
        assert_eq!(op.shape(), (12, 12));
        assert!(op.partition().is_uniform());

        let scalar = kernel_matrix(&Matern52, &points, &points).unwrap();
        for p in 0..4 {
            for q in 0..4 {
                for a in 0..3 {
                    for b in 0..3 {
                        let jitter = if p == q && a == b { 1e-6 } else { 0.0 };
                        let expected = scalar[(p, q)] * coregion[(a, b)] + jitter;
                        let found = op.get(3 * p + a, 3 * q + b).unwrap();
                        assert!((found - expected).abs() < 1e-14);
                    }
                }
            }
        }
    }

    #[test]
    fn test_gramian_solve() {
        let points = grid_points(12);
        let options = GramianOptions {
            jitter: 1e-2,
            tolerance: 1e-10,
            ..Default::default()
        };
        let op = blocked_gramian(Matern52, &points, 4, &options).unwrap();
        let b = Col::<f64>::from_fn(12, |i| (i as f64).cos());
        let x = op.solve(b.as_ref()).unwrap();
        let bx = op.mul(x.as_ref(), Par::Seq).unwrap();
        assert!((bx.as_ref() - b.as_ref()).norm_l2() < 1e-8);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let points = grid_points(4);
        let err = blocked_gramian(Matern52, &points, 0, &GramianOptions::default()).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::EmptyOperator(_)));
        let empty = PointSet::from_scalars(&[]);
        assert!(blocked_gramian(Matern52, &empty, 2, &GramianOptions::default()).is_err());
    }

    #[test]
    fn test_out_of_range_blocks_are_errors() {
        let points = Arc::new(grid_points(5));
        let kernel = Arc::new(Matern52);

        let err = KernelBlock::new(kernel.clone(), points.clone(), 0..3, 4..7).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::InputError(_)));
        let reversed = Range { start: 3, end: 1 };
        let err = KernelBlock::new(kernel.clone(), points.clone(), reversed, 0..2).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::InputError(_)));
        let block = KernelBlock::new(kernel, points.clone(), 3..5, 0..5).unwrap();
        assert_eq!(Block::<f64>::shape(&block), (2, 5));

        let separable = Arc::new(Separable::new(Matern52, Mat::<f64>::identity(2, 2)).unwrap());
        let err = MultiOutputBlock::new(separable.clone(), points.clone(), 5, 0).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::InputError(_)));
        let block = MultiOutputBlock::new(separable, points, 4, 4).unwrap();
        assert_eq!(Block::<f64>::shape(&block), (2, 2));
    }
}
