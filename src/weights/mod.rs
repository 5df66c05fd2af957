//! # Spatial weights
//!
//! Thin adapter around the spot × spot weight matrix. Row `i`, column `j` holds the
//! influence of spot `j` on spot `i`; the matrix does not have to be symmetric.
//! The weights are consumed read-only by both statistic engines and are never permuted.

use anyhow::{bail, Context};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array1, Array2, ArrayView2};
use num_traits::AsPrimitive;

use crate::error::SpatialError;
use crate::sparse::{MatrixCrossProduct, MatrixSum, SpatialLag};
use crate::NumericOps;

#[derive(Debug, Clone)]
pub struct SpatialWeights {
    matrix: CsrMatrix<f64>,
}

impl SpatialWeights {
    /// Wraps a square CSR matrix. Values are widened to `f64`.
    pub fn new<M: NumericOps>(matrix: CsrMatrix<M>) -> anyhow::Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            bail!(SpatialError::DimensionMismatch(format!(
                "spatial weight matrix must be square, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix.values().iter().any(|v| !v.is_finite()) {
            bail!(SpatialError::InvalidInput(
                "spatial weight matrix contains non-finite values".to_string()
            ));
        }

        let values: Vec<f64> = matrix
            .values()
            .iter()
            .map(|&v| AsPrimitive::<f64>::as_(v))
            .collect();
        let matrix = CsrMatrix::try_from_csr_data(
            matrix.nrows(),
            matrix.ncols(),
            matrix.row_offsets().to_vec(),
            matrix.col_indices().to_vec(),
            values,
        )
        .map_err(|e| anyhow::anyhow!("Failed to rebuild CSR matrix: {}", e))?;

        Ok(SpatialWeights { matrix })
    }

    /// Builds the weights from `(row, col, value)` triplets; duplicate entries are summed.
    pub fn from_triplets(
        n_spots: usize,
        triplets: &[(usize, usize, f64)],
    ) -> anyhow::Result<Self> {
        let coo = CooMatrix::try_from_triplets(
            n_spots,
            n_spots,
            triplets.iter().map(|&(i, _, _)| i).collect(),
            triplets.iter().map(|&(_, j, _)| j).collect(),
            triplets.iter().map(|&(_, _, v)| v).collect(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create COO matrix: {}", e))?;
        Self::new(CsrMatrix::from(&coo))
    }

    /// Keeps only entries whose absolute value exceeds `threshold`.
    pub fn from_dense(dense: ArrayView2<f64>, threshold: f64) -> anyhow::Result<Self> {
        if dense.nrows() != dense.ncols() {
            bail!(SpatialError::DimensionMismatch(format!(
                "spatial weight matrix must be square, got {}x{}",
                dense.nrows(),
                dense.ncols()
            )));
        }
        let triplets: Vec<(usize, usize, f64)> = dense
            .indexed_iter()
            .filter(|(_, v)| v.abs() > threshold)
            .map(|((i, j), &v)| (i, j, v))
            .collect();
        Self::from_triplets(dense.nrows(), &triplets)
    }

    pub fn n_spots(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }

    /// `W · x`
    pub fn lag(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        self.matrix.lag(x)
    }

    /// `W · x[perm, :]`
    pub fn lag_permuted(&self, x: ArrayView2<f64>, perm: &[usize]) -> anyhow::Result<Array2<f64>> {
        self.matrix.lag_permuted(x, perm)
    }

    /// Per-row sum of squared weights, `wij_sq[i] = Σ_j W[i,j]²`
    pub fn squared_row_sums(&self) -> anyhow::Result<Array1<f64>> {
        Ok(Array1::from(self.matrix.sum_squared_row::<f64>()?))
    }

    /// Theoretical variance of the global statistic under the null. Depends on `W` only.
    ///
    /// `[N²·Σ(W∘Wᵀ) − 2N·Σ(rowsum∘colsum) + (ΣW)²] / [N²(N−1)²]`
    pub fn global_variance(&self) -> anyhow::Result<f64> {
        let n = self.n_spots();
        if n < 2 {
            bail!(SpatialError::InvalidInput(format!(
                "global variance needs at least two spots, got {}",
                n
            )));
        }
        let n = n as f64;

        let cross = self
            .matrix
            .sum_hadamard_transpose()
            .context("Failed to compute the W∘Wᵀ sum")?;
        let row_sums: Vec<f64> = self.matrix.sum_row()?;
        let col_sums: Vec<f64> = self.matrix.sum_col()?;
        let margins: f64 = row_sums
            .iter()
            .zip(col_sums.iter())
            .map(|(r, c)| r * c)
            .sum();
        let total: f64 = self.matrix.sum_total()?;

        let numerator = n * n * cross - 2.0 * n * margins + total * total;
        let denominator = n * n * (n - 1.0) * (n - 1.0);
        Ok(numerator / denominator)
    }
}
