//! Row and column boundary schemes that divide an operator into blocks.
//!
//! A [`Partition`] is resolved once, at construction, into one of two variants.
//! The `Uniform` variant stores only the block size, so locating a block is a
//! division and the multiplication engine can reinterpret flat vectors as
//! `block_size × nblocks` matrices. The `Irregular` variant stores explicit
//! boundary sequences and is served by the general multiplication algorithm.
//!
//! Boundary sequences are zero-based: block `i` spans
//! `bounds[i] - bounds[0] .. bounds[i + 1] - bounds[0]`.

use crate::error::{BlockError, BlockErrorKind};
use std::ops::Range;

/// The boundary scheme of a block operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// Every block has shape `block_rows × block_cols`.
    Uniform {
        block_rows: usize,
        block_cols: usize,
        nblock_rows: usize,
        nblock_cols: usize,
    },
    /// Explicit, strictly increasing boundaries starting at zero.
    Irregular {
        row_bounds: Vec<usize>,
        col_bounds: Vec<usize>,
    },
}

impl Partition {
    /// A grid of `nblock_rows × nblock_cols` square blocks of size `block_size`.
    ///
    /// Fails with [`BlockErrorKind::EmptyOperator`] if any argument is zero.
    pub fn uniform(
        nblock_rows: usize,
        nblock_cols: usize,
        block_size: usize,
    ) -> Result<Self, BlockError> {
        Self::uniform_rect(nblock_rows, nblock_cols, block_size, block_size)
    }

    /// A grid of `nblock_rows × nblock_cols` blocks of shape `block_rows × block_cols`.
    ///
    /// The operator then has shape
    /// `(nblock_rows · block_rows) × (nblock_cols · block_cols)`.
    pub fn uniform_rect(
        nblock_rows: usize,
        nblock_cols: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Result<Self, BlockError> {
        if nblock_rows == 0 || nblock_cols == 0 {
            return Err(BlockErrorKind::EmptyOperator(format!(
                "block grid of shape ({nblock_rows}, {nblock_cols})"
            ))
            .into());
        }
        if block_rows == 0 || block_cols == 0 {
            return Err(BlockErrorKind::EmptyOperator(format!(
                "block size ({block_rows}, {block_cols})"
            ))
            .into());
        }
        Ok(Partition::Uniform {
            block_rows,
            block_cols,
            nblock_rows,
            nblock_cols,
        })
    }

    /// Builds a partition from explicit boundary sequences.
    ///
    /// Both sequences must be strictly increasing and contain at least two
    /// entries. They are shifted so that the first boundary becomes zero.
    /// Sequences that turn out to be arithmetic progressions are normalized to
    /// [`Partition::Uniform`], so the strided algorithm is always selected when
    /// it applies.
    ///
    /// # Arguments
    ///
    /// * `row_bounds` - Boundaries of the block rows, e.g. `[0, 2, 7, 8]`.
    /// * `col_bounds` - Boundaries of the block columns.
    ///
    /// # Returns
    ///
    /// The partition, or [`BlockErrorKind::EmptyOperator`] when a sequence has
    /// fewer than two entries and [`BlockErrorKind::InvalidPartition`] when it
    /// is not strictly increasing.
    ///
    /// # Example
    ///
    /// ```rust
    /// use blockop::Partition;
    ///
    /// let p = Partition::from_bounds(&[0, 2, 7, 8], &[0, 4])?;
    /// assert_eq!(p.shape(), (8, 4));
    /// assert_eq!(p.block_of_row(5), (1, 3));
    ///
    /// // Evenly spaced bounds select the strided algorithm.
    /// assert!(Partition::from_bounds(&[3, 5, 7], &[0, 4])?.is_uniform());
    /// # Ok::<(), blockop::BlockError>(())
    /// ```
    pub fn from_bounds(row_bounds: &[usize], col_bounds: &[usize]) -> Result<Self, BlockError> {
        let rows = normalize_bounds("row", row_bounds)?;
        let cols = normalize_bounds("col", col_bounds)?;

        match (uniform_step(&rows), uniform_step(&cols)) {
            (Some(block_rows), Some(block_cols)) => Self::uniform_rect(
                rows.len() - 1,
                cols.len() - 1,
                block_rows,
                block_cols,
            ),
            _ => Ok(Partition::Irregular {
                row_bounds: rows,
                col_bounds: cols,
            }),
        }
    }

    /// Checks a partition whose variant was built by hand.
    ///
    /// The constructors above only produce valid partitions. A literal
    /// `Partition` may not be: a `Uniform` grid with a zero field is an
    /// [`BlockErrorKind::EmptyOperator`], and `Irregular` boundaries must be
    /// strictly increasing, start at zero and describe at least one block.
    pub fn validate(&self) -> Result<(), BlockError> {
        match self {
            Partition::Uniform {
                block_rows,
                block_cols,
                nblock_rows,
                nblock_cols,
            } => Self::uniform_rect(*nblock_rows, *nblock_cols, *block_rows, *block_cols).map(drop),
            Partition::Irregular {
                row_bounds,
                col_bounds,
            } => {
                check_bounds("row", row_bounds)?;
                check_bounds("col", col_bounds)?;
                for (axis, bounds) in [("row", row_bounds), ("col", col_bounds)] {
                    if bounds[0] != 0 {
                        return Err(BlockErrorKind::InvalidPartition {
                            axis,
                            bounds: bounds.clone(),
                        }
                        .into());
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns `true` for the `Uniform` variant.
    #[inline]
    pub fn is_uniform(&self) -> bool {
        matches!(self, Partition::Uniform { .. })
    }

    /// The number of block rows and block columns.
    pub fn nblocks(&self) -> (usize, usize) {
        match self {
            Partition::Uniform {
                nblock_rows,
                nblock_cols,
                ..
            } => (*nblock_rows, *nblock_cols),
            Partition::Irregular {
                row_bounds,
                col_bounds,
            } => (row_bounds.len() - 1, col_bounds.len() - 1),
        }
    }

    /// The total number of scalar rows and columns covered.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Partition::Uniform {
                block_rows,
                block_cols,
                nblock_rows,
                nblock_cols,
            } => (block_rows * nblock_rows, block_cols * nblock_cols),
            Partition::Irregular {
                row_bounds,
                col_bounds,
            } => (last(row_bounds), last(col_bounds)),
        }
    }

    /// Scalar row range of block row `i`.
    pub fn row_range(&self, i: usize) -> Range<usize> {
        match self {
            Partition::Uniform { block_rows, .. } => i * block_rows..(i + 1) * block_rows,
            Partition::Irregular { row_bounds, .. } => row_bounds[i]..row_bounds[i + 1],
        }
    }

    /// Scalar column range of block column `j`.
    pub fn col_range(&self, j: usize) -> Range<usize> {
        match self {
            Partition::Uniform { block_cols, .. } => j * block_cols..(j + 1) * block_cols,
            Partition::Irregular { col_bounds, .. } => col_bounds[j]..col_bounds[j + 1],
        }
    }

    /// Maps a scalar row to `(block row, offset within the block)`.
    ///
    /// The caller is responsible for `row < self.shape().0`.
    pub fn block_of_row(&self, row: usize) -> (usize, usize) {
        match self {
            Partition::Uniform { block_rows, .. } => (row / block_rows, row % block_rows),
            Partition::Irregular { row_bounds, .. } => locate(row_bounds, row),
        }
    }

    /// Maps a scalar column to `(block column, offset within the block)`.
    ///
    /// The caller is responsible for `col < self.shape().1`.
    pub fn block_of_col(&self, col: usize) -> (usize, usize) {
        match self {
            Partition::Uniform { block_cols, .. } => (col / block_cols, col % block_cols),
            Partition::Irregular { col_bounds, .. } => locate(col_bounds, col),
        }
    }
}

fn last(bounds: &[usize]) -> usize {
    bounds.last().copied().unwrap_or(0)
}

fn locate(bounds: &[usize], index: usize) -> (usize, usize) {
    // Index of the last boundary that is <= index.
    let block = bounds.partition_point(|&b| b <= index) - 1;
    (block, index - bounds[block])
}

fn normalize_bounds(axis: &'static str, bounds: &[usize]) -> Result<Vec<usize>, BlockError> {
    check_bounds(axis, bounds)?;
    let origin = bounds[0];
    Ok(bounds.iter().map(|&b| b - origin).collect())
}

fn check_bounds(axis: &'static str, bounds: &[usize]) -> Result<(), BlockError> {
    if bounds.len() < 2 {
        return Err(BlockErrorKind::EmptyOperator(format!(
            "{axis} boundaries {bounds:?} describe no blocks"
        ))
        .into());
    }
    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(BlockErrorKind::InvalidPartition {
            axis,
            bounds: bounds.to_vec(),
        }
        .into());
    }
    Ok(())
}

fn uniform_step(bounds: &[usize]) -> Option<usize> {
    let step = bounds[1] - bounds[0];
    bounds
        .windows(2)
        .all(|w| w[1] - w[0] == step)
        .then_some(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_increasing_bounds_are_rejected() {
        let err = Partition::from_bounds(&[1, 4, 3, 10], &[0, 5, 10]).unwrap_err();
        assert!(matches!(
            err.kind(),
            BlockErrorKind::InvalidPartition { axis: "row", .. }
        ));

        let err = Partition::from_bounds(&[0, 5], &[0, 5, 5]).unwrap_err();
        assert!(matches!(
            err.kind(),
            BlockErrorKind::InvalidPartition { axis: "col", .. }
        ));
    }

    #[test]
    fn test_arithmetic_bounds_become_uniform() {
        let p = Partition::from_bounds(&[1, 4, 7, 10], &[0, 2, 4]).unwrap();
        assert_eq!(
            p,
            Partition::Uniform {
                block_rows: 3,
                block_cols: 2,
                nblock_rows: 3,
                nblock_cols: 2,
            }
        );
        assert_eq!(p.shape(), (9, 4));
    }

    #[test]
    fn test_irregular_ranges_and_lookup() {
        let p = Partition::from_bounds(&[0, 2, 7, 8], &[0, 3, 4]).unwrap();
        assert!(!p.is_uniform());
        assert_eq!(p.nblocks(), (3, 2));
        assert_eq!(p.shape(), (8, 4));
        assert_eq!(p.row_range(1), 2..7);
        assert_eq!(p.col_range(1), 3..4);
        assert_eq!(p.block_of_row(0), (0, 0));
        assert_eq!(p.block_of_row(6), (1, 4));
        assert_eq!(p.block_of_row(7), (2, 0));
        assert_eq!(p.block_of_col(3), (1, 0));
    }

    #[test]
    fn test_uniform_lookup_uses_division() {
        let p = Partition::uniform(4, 4, 3).unwrap();
        assert_eq!(p.shape(), (12, 12));
        assert_eq!(p.row_range(2), 6..9);
        assert_eq!(p.block_of_row(7), (2, 1));
        assert_eq!(p.block_of_col(11), (3, 2));
    }

    #[test]
    fn test_empty_partitions_are_rejected() {
        let err = Partition::uniform(0, 3, 2).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::EmptyOperator(_)));
        let err = Partition::from_bounds(&[0], &[0, 1]).unwrap_err();
        assert!(matches!(err.kind(), BlockErrorKind::EmptyOperator(_)));
    }

    #[test]
    fn test_hand_built_partitions_are_validated() {
        let repeated = Partition::Irregular {
            row_bounds: vec![0, 2, 2, 4],
            col_bounds: vec![0, 4],
        };
        assert!(matches!(
            repeated.validate().unwrap_err().kind(),
            BlockErrorKind::InvalidPartition { axis: "row", .. }
        ));

        let shifted = Partition::Irregular {
            row_bounds: vec![0, 4],
            col_bounds: vec![1, 3, 4],
        };
        assert!(matches!(
            shifted.validate().unwrap_err().kind(),
            BlockErrorKind::InvalidPartition { axis: "col", .. }
        ));

        let zero_width = Partition::Uniform {
            block_rows: 2,
            block_cols: 0,
            nblock_rows: 2,
            nblock_cols: 2,
        };
        assert!(matches!(
            zero_width.validate().unwrap_err().kind(),
            BlockErrorKind::EmptyOperator(_)
        ));

        assert!(Partition::from_bounds(&[0, 2, 7], &[0, 1, 4]).unwrap().validate().is_ok());
        assert!(Partition::uniform(3, 2, 4).unwrap().validate().is_ok());
    }
}
