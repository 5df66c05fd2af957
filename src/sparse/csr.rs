use std::iter::Sum;
use std::ops::AddAssign;

use anyhow::{anyhow, bail};
use nalgebra_sparse::{CsrMatrix, SparseEntry};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, Axis};
use num_traits::{AsPrimitive, Float, NumCast};

use crate::error::SpatialError;
use crate::NumericOps;

use super::{ColumnGather, MatrixCrossProduct, MatrixSum, SpatialLag};

fn cast<M: NumericOps, T: NumCast>(value: M) -> anyhow::Result<T> {
    T::from(value).ok_or_else(|| anyhow!("Failed to convert to target type"))
}

impl<M: NumericOps> MatrixSum for CsrMatrix<M> {
    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + Sum,
    {
        let mut result = vec![T::zero(); self.ncols()];
        for (&col_index, &value) in self.col_indices().iter().zip(self.values().iter()) {
            result[col_index] += cast(value)?;
        }
        Ok(result)
    }

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + Sum,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for (row, row_vec) in self.row_iter().enumerate() {
            for &value in row_vec.values() {
                result[row] += cast(value)?;
            }
        }
        Ok(result)
    }

    fn sum_total<T>(&self) -> anyhow::Result<T>
    where
        T: Float + NumCast + AddAssign + Sum,
    {
        let mut total = T::zero();
        for &value in self.values() {
            total += cast(value)?;
        }
        Ok(total)
    }

    fn sum_squared_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + Sum,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for (row, row_vec) in self.row_iter().enumerate() {
            for &value in row_vec.values() {
                let v: T = cast(value)?;
                result[row] += v * v;
            }
        }
        Ok(result)
    }
}

impl<M: NumericOps> MatrixCrossProduct for CsrMatrix<M> {
    fn sum_hadamard_transpose(&self) -> anyhow::Result<f64> {
        if self.nrows() != self.ncols() {
            bail!(SpatialError::DimensionMismatch(format!(
                "expected a square matrix, got {}x{}",
                self.nrows(),
                self.ncols()
            )));
        }

        let mut total = 0.0;
        for (row, col, &value) in self.triplet_iter() {
            // CSR indices are sorted within a row, so the lookup is a binary search
            if let Some(SparseEntry::NonZero(&mirrored)) = self.get_entry(col, row) {
                let v: f64 = value.as_();
                let t: f64 = mirrored.as_();
                total += v * t;
            }
        }
        Ok(total)
    }
}

fn lag_rows<M, F>(matrix: &CsrMatrix<M>, x: ArrayView2<f64>, source_row: F) -> Array2<f64>
where
    M: NumericOps,
    F: Fn(usize) -> usize + Sync,
{
    let mut out = Array2::<f64>::zeros((matrix.nrows(), x.ncols()));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out_row)| {
            let row = matrix.row(i);
            for (&j, &w) in row.col_indices().iter().zip(row.values().iter()) {
                let w: f64 = w.as_();
                out_row.scaled_add(w, &x.row(source_row(j)));
            }
        });
    out
}

impl<M: NumericOps> SpatialLag for CsrMatrix<M> {
    fn lag(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        if x.nrows() != self.ncols() {
            bail!(SpatialError::DimensionMismatch(format!(
                "cannot multiply a {}x{} sparse matrix with a {}x{} dense matrix",
                self.nrows(),
                self.ncols(),
                x.nrows(),
                x.ncols()
            )));
        }
        Ok(lag_rows(self, x, |j| j))
    }

    fn lag_permuted(&self, x: ArrayView2<f64>, perm: &[usize]) -> anyhow::Result<Array2<f64>> {
        if x.nrows() != self.ncols() || perm.len() != x.nrows() {
            bail!(SpatialError::DimensionMismatch(format!(
                "cannot multiply a {}x{} sparse matrix with a {}x{} dense matrix permuted by {} labels",
                self.nrows(),
                self.ncols(),
                x.nrows(),
                x.ncols(),
                perm.len()
            )));
        }
        if let Some(&bad) = perm.iter().find(|&&p| p >= x.nrows()) {
            bail!(SpatialError::InvalidInput(format!(
                "permutation index {} out of range for {} rows",
                bad,
                x.nrows()
            )));
        }
        Ok(lag_rows(self, x, |j| perm[j]))
    }
}

impl<M: NumericOps> ColumnGather for CsrMatrix<M> {
    fn gather_columns(&self, columns: &[usize]) -> anyhow::Result<Array2<f64>> {
        let mut lookup: Vec<Option<usize>> = vec![None; self.ncols()];
        for (target, &col) in columns.iter().enumerate() {
            let slot = lookup.get_mut(col).ok_or_else(|| {
                SpatialError::InvalidInput(format!(
                    "column {} out of range for {} columns",
                    col,
                    self.ncols()
                ))
            })?;
            if slot.is_some() {
                bail!(SpatialError::InvalidInput(format!(
                    "column {} requested twice",
                    col
                )));
            }
            *slot = Some(target);
        }

        let mut out = Array2::<f64>::zeros((self.nrows(), columns.len()));
        for (row, col, &value) in self.triplet_iter() {
            if let Some(target) = lookup[col] {
                out[[row, target]] = AsPrimitive::<f64>::as_(value);
            }
        }
        Ok(out)
    }
}
