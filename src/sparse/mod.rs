use std::iter::Sum;
use std::ops::AddAssign;

use ndarray::{Array2, ArrayView2};
use num_traits::{Float, NumCast};

pub mod csr;

pub trait MatrixSum {
    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + Sum;

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + Sum;

    fn sum_total<T>(&self) -> anyhow::Result<T>
    where
        T: Float + NumCast + AddAssign + Sum;

    /// Row-wise sum of squared entries, `Σ_j x[i,j]²`
    fn sum_squared_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + Sum;
}

pub trait MatrixCrossProduct {
    /// `Σ_ij x[i,j] · x[j,i]`, i.e. the sum of the Hadamard product with the transpose.
    /// Only defined for square matrices.
    fn sum_hadamard_transpose(&self) -> anyhow::Result<f64>;
}

/// Sparse (N×M) times dense (M×K) products.
pub trait SpatialLag {
    /// `self · x`
    fn lag(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>>;

    /// `self · x[perm, :]` without materializing the permuted copy of `x`.
    fn lag_permuted(&self, x: ArrayView2<f64>, perm: &[usize]) -> anyhow::Result<Array2<f64>>;
}

/// Dense extraction of selected columns out of a sparse matrix.
pub trait ColumnGather {
    fn gather_columns(&self, columns: &[usize]) -> anyhow::Result<Array2<f64>>;
}
