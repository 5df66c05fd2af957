//! Local statistic: per-spot decomposition of the pair score.
//!
//! For centered signals `L`, `R` (spots × pairs):
//! - ligand term   `(W·R)[i,p] · L[i,p]`
//! - receptor term `(W·L)[i,p] · R[i,p]`
//!
//! and the combined local score is their sum.

use anyhow::bail;
use log::debug;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};

use crate::error::SpatialError;
use crate::weights::SpatialWeights;

use super::{normal_sf, Permuter};

#[derive(Debug, Clone)]
pub struct LocalScores {
    /// `(W·R) ∘ L`, spots × pairs
    pub ligand_term: Array2<f64>,
    /// `(W·L) ∘ R`, spots × pairs
    pub receptor_term: Array2<f64>,
}

impl LocalScores {
    pub fn combined(&self) -> Array2<f64> {
        &self.ligand_term + &self.receptor_term
    }
}

fn check_signals(
    weights: &SpatialWeights,
    ligand: &ArrayView2<f64>,
    receptor: &ArrayView2<f64>,
) -> anyhow::Result<()> {
    if ligand.dim() != receptor.dim() {
        bail!(SpatialError::DimensionMismatch(format!(
            "ligand signals are {:?} but receptor signals are {:?}",
            ligand.dim(),
            receptor.dim()
        )));
    }
    if ligand.nrows() != weights.n_spots() {
        bail!(SpatialError::DimensionMismatch(format!(
            "signals cover {} spots but the weight matrix has {}",
            ligand.nrows(),
            weights.n_spots()
        )));
    }
    Ok(())
}

pub fn local_scores(
    weights: &SpatialWeights,
    ligand: ArrayView2<f64>,
    receptor: ArrayView2<f64>,
) -> anyhow::Result<LocalScores> {
    check_signals(weights, &ligand, &receptor)?;
    let ligand_term = weights.lag(receptor)? * &ligand;
    let receptor_term = weights.lag(ligand)? * &receptor;
    Ok(LocalScores {
        ligand_term,
        receptor_term,
    })
}

/// Maximum-likelihood normal fit (population standard deviation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalFit {
    pub mean: f64,
    pub std: f64,
}

impl NormalFit {
    pub fn fit(x: ArrayView1<f64>) -> Self {
        let mean = x.mean().unwrap_or(0.0);
        let std = if x.is_empty() { 0.0 } else { x.std(0.0) };
        NormalFit { mean, std }
    }

    /// Bias-corrected variance, `std² · N / (N − 1)`
    pub fn corrected_variance(&self, n: usize) -> f64 {
        let n = n as f64;
        self.std * self.std * n / (n - 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct LocalZTest {
    /// Standard deviation of the local score, spots × pairs
    pub std: Array2<f64>,
    pub z: Array2<f64>,
    /// One-sided (upper tail) p-values, spots × pairs
    pub p_values: Array2<f64>,
}

/// Standard deviation of the local score for one pair at every spot.
///
/// `var_I[i] = 2·((N−1)/N)²·σ1²·σ2²·wij_sq[i] + 2·((N−1)/N)²·σ1²·σ2²`, where σ1², σ2² are
/// fitted once per pair and shared by all spots.
pub fn local_std(sigma1_sq: f64, sigma2_sq: f64, wij_sq: ArrayView1<f64>, n: usize) -> Array1<f64> {
    let n = n as f64;
    let shrink = (n - 1.0) * (n - 1.0) / (n * n);
    let base = 2.0 * shrink * sigma1_sq * sigma2_sq;
    wij_sq.mapv(|w| (base * w + base).sqrt())
}

pub fn local_z_test(
    weights: &SpatialWeights,
    ligand: ArrayView2<f64>,
    receptor: ArrayView2<f64>,
    combined: ArrayView2<f64>,
) -> anyhow::Result<LocalZTest> {
    check_signals(weights, &ligand, &receptor)?;
    if combined.dim() != ligand.dim() {
        bail!(SpatialError::DimensionMismatch(format!(
            "local scores are {:?} but signals are {:?}",
            combined.dim(),
            ligand.dim()
        )));
    }
    let n_spots = ligand.nrows();
    if n_spots < 2 {
        bail!(SpatialError::InvalidInput(format!(
            "local z-test needs at least two spots, got {}",
            n_spots
        )));
    }

    let wij_sq = weights.squared_row_sums()?;
    let mut std = Array2::<f64>::zeros(ligand.dim());
    for (p, mut column) in std.axis_iter_mut(Axis(1)).enumerate() {
        let sigma1_sq = NormalFit::fit(ligand.column(p)).corrected_variance(n_spots);
        let sigma2_sq = NormalFit::fit(receptor.column(p)).corrected_variance(n_spots);
        if !(sigma1_sq > 0.0 && sigma2_sq > 0.0) {
            bail!(SpatialError::InvalidInput(format!(
                "signal column {} has zero variance",
                p
            )));
        }
        column.assign(&local_std(sigma1_sq, sigma2_sq, wij_sq.view(), n_spots));
    }

    let z = &combined / &std;
    let p_values = normal_sf(z.view())?;
    Ok(LocalZTest { std, z, p_values })
}

#[derive(Debug, Clone)]
pub struct LocalPermutationTest {
    pub n_perm: usize,
    /// `#(null ≥ observed) / n_perm`, spots × pairs
    pub p_values: Array2<f64>,
    /// Combined null scores, pairs × n_perm × spots, when retained
    pub null: Option<Array3<f64>>,
}

/// Combined local score with both signals shuffled by `perm`: the receptor rows feed
/// the ligand term, the ligand rows feed the receptor term.
fn permuted_combined(
    weights: &SpatialWeights,
    ligand: ArrayView2<f64>,
    receptor: ArrayView2<f64>,
    perm: &[usize],
) -> anyhow::Result<Array2<f64>> {
    let mut combined = weights.lag_permuted(receptor, perm)? * &ligand;
    combined += &(weights.lag_permuted(ligand, perm)? * &receptor);
    Ok(combined)
}

/// Empirical per-spot test of the combined local score.
///
/// Without `retain_null` each worker folds its permutations into a private count
/// matrix and the counts are summed at the end, so memory stays at a few spots × pairs
/// buffers per thread. With `retain_null` the full pairs × n_perm × spots array is kept.
pub fn local_permutation_test(
    weights: &SpatialWeights,
    ligand: ArrayView2<f64>,
    receptor: ArrayView2<f64>,
    observed: ArrayView2<f64>,
    n_perm: usize,
    permuter: &Permuter,
    retain_null: bool,
) -> anyhow::Result<LocalPermutationTest> {
    check_signals(weights, &ligand, &receptor)?;
    if observed.dim() != ligand.dim() {
        bail!(SpatialError::DimensionMismatch(format!(
            "local scores are {:?} but signals are {:?}",
            observed.dim(),
            ligand.dim()
        )));
    }
    if n_perm == 0 {
        bail!(SpatialError::InvalidConfig(
            "n_perm must be positive for a permutation test".to_string()
        ));
    }

    let (n_spots, n_pairs) = ligand.dim();
    debug!(
        "local permutation test: {} pairs, {} permutations, {} spots (retain null: {})",
        n_pairs, n_perm, n_spots, retain_null
    );

    if retain_null {
        let mut null = Array3::<f64>::zeros((n_pairs, n_perm, n_spots));
        null.axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .try_for_each(|(k, mut slab)| -> anyhow::Result<()> {
                let perm = permuter.permutation(k, n_spots);
                let combined = permuted_combined(weights, ligand, receptor, &perm)?;
                slab.assign(&combined.t());
                Ok(())
            })?;

        let mut p_values = Array2::<f64>::zeros((n_spots, n_pairs));
        Zip::indexed(&mut p_values).par_for_each(|(i, p), out| {
            let obs = observed[[i, p]];
            let hits = null
                .slice(ndarray::s![p, .., i])
                .iter()
                .filter(|&&v| v >= obs)
                .count();
            *out = hits as f64 / n_perm as f64;
        });

        return Ok(LocalPermutationTest {
            n_perm,
            p_values,
            null: Some(null),
        });
    }

    let counts = (0..n_perm)
        .into_par_iter()
        .try_fold(
            || Array2::<usize>::zeros((n_spots, n_pairs)),
            |mut acc, k| -> anyhow::Result<Array2<usize>> {
                let perm = permuter.permutation(k, n_spots);
                let combined = permuted_combined(weights, ligand, receptor, &perm)?;
                Zip::from(&mut acc)
                    .and(&combined)
                    .and(&observed)
                    .for_each(|c, &null, &obs| {
                        if null >= obs {
                            *c += 1;
                        }
                    });
                Ok(acc)
            },
        )
        .try_reduce(
            || Array2::<usize>::zeros((n_spots, n_pairs)),
            |a, b| Ok(a + b),
        )?;

    Ok(LocalPermutationTest {
        n_perm,
        p_values: counts.mapv(|c| c as f64 / n_perm as f64),
        null: None,
    })
}
