//! # Spatial co-expression statistics
//!
//! Engines for the bivariate Moran's-I-like statistic of ligand-receptor pairs:
//!
//! - [`standardize`]: centering / L2 scaling of the per-pair signals
//! - [`global`]: one score per pair, z-test and permutation null
//! - [`local`]: per-spot decomposition of the score, z-test and permutation test
//! - [`permutation`]: seeded spot-label shuffles shared by both engines
//!
//! All engines are pure functions over read-only inputs; the permutation loops run on
//! the rayon pool and write to disjoint output slices.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use ndarray::{Array, Array1, ArrayView, ArrayView1, ArrayView2, Dimension, Zip};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::SpatialError;

pub mod global;
pub mod local;
pub mod permutation;
pub mod standardize;

pub use permutation::Permuter;
pub use standardize::{standardize, Standardization, Standardized};

/// Significance testing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Closed-form normal approximation
    ZScore,
    /// Empirical null from spot-label permutations
    Permutation,
    #[default]
    Both,
}

impl Method {
    pub fn uses_z_score(&self) -> bool {
        matches!(self, Method::ZScore | Method::Both)
    }

    pub fn uses_permutation(&self) -> bool {
        matches!(self, Method::Permutation | Method::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ZScore => "z-score",
            Method::Permutation => "permutation",
            Method::Both => "both",
        }
    }
}

impl FromStr for Method {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "z-score" | "zscore" | "z_score" => Ok(Method::ZScore),
            "permutation" => Ok(Method::Permutation),
            "both" => Ok(Method::Both),
            _ => Err(SpatialError::InvalidMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element-wise upper-tail probability of the standard normal, `P(Z ≥ z)`.
pub fn normal_sf<D: Dimension>(z: ArrayView<f64, D>) -> anyhow::Result<Array<f64, D>> {
    let normal = Normal::new(0.0, 1.0).context("Failed to build the standard normal")?;
    Ok(z.mapv(|v| normal.sf(v)))
}

/// One-sided empirical p-value: fraction of null draws at least as large as `observed`.
///
/// An empty null sample yields `NaN`.
pub fn empirical_p_value(observed: f64, null: ArrayView1<f64>) -> f64 {
    if null.is_empty() {
        return f64::NAN;
    }
    let hits = null.iter().filter(|&&v| v >= observed).count();
    hits as f64 / null.len() as f64
}

/// [`empirical_p_value`] for every pair of an observed vector and the rows of a
/// `pairs × n_perm` null matrix.
pub fn empirical_p_values(
    observed: ArrayView1<f64>,
    null: ArrayView2<f64>,
) -> anyhow::Result<Array1<f64>> {
    if observed.len() != null.nrows() {
        anyhow::bail!(SpatialError::DimensionMismatch(format!(
            "{} observed scores for a null sample with {} rows",
            observed.len(),
            null.nrows()
        )));
    }
    let mut out = Array1::<f64>::zeros(observed.len());
    Zip::from(&mut out)
        .and(&observed)
        .and(null.rows())
        .par_for_each(|p, &obs, row| *p = empirical_p_value(obs, row));
    Ok(out)
}
