//! Global bivariate statistic: one score per ligand-receptor pair over the whole tissue.
//!
//! With `L` and `R` standardized to zero mean and unit norm,
//! `score[p] = Σ_i Σ_j W[i,j] · L[j,p] · R[i,p]`.

use anyhow::bail;
use log::debug;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

use crate::error::SpatialError;
use crate::weights::SpatialWeights;

use super::{normal_sf, Permuter};

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

/// Observed global score of every pair (column).
pub fn global_scores(
    weights: &SpatialWeights,
    ligand: ArrayView2<f64>,
    receptor: ArrayView2<f64>,
) -> anyhow::Result<Array1<f64>> {
    check_signals(weights, &ligand, &receptor)?;
    let lagged = weights.lag(ligand)?;
    Ok((&lagged * &receptor).sum_axis(Axis(0)))
}

#[derive(Debug, Clone)]
pub struct GlobalZTest {
    /// Theoretical variance of the score, shared by all pairs
    pub variance: f64,
    pub z: Array1<f64>,
    /// One-sided (upper tail) p-values
    pub p_values: Array1<f64>,
}

/// Normal approximation: `z = score / sqrt(var)`, `p = P(Z ≥ z)`.
pub fn global_z_test(scores: ArrayView1<f64>, variance: f64) -> anyhow::Result<GlobalZTest> {
    if !(variance.is_finite() && variance > 0.0) {
        bail!(SpatialError::InvalidInput(format!(
            "global variance must be positive and finite, got {}",
            variance
        )));
    }
    let z = scores.mapv(|s| s / variance.sqrt());
    let p_values = normal_sf(z.view())?;
    Ok(GlobalZTest {
        variance,
        z,
        p_values,
    })
}

/// Null sample of the global score, `pairs × n_perm`.
///
/// Each permutation shuffles the receptor spot labels while the ligand side and the
/// weights stay fixed. Permutations run as independent tasks, each writing its own
/// column of the output.
pub fn global_permutation_null(
    weights: &SpatialWeights,
    ligand: ArrayView2<f64>,
    receptor: ArrayView2<f64>,
    n_perm: usize,
    permuter: &Permuter,
) -> anyhow::Result<Array2<f64>> {
    check_signals(weights, &ligand, &receptor)?;
    let n_spots = weights.n_spots();
    let n_pairs = ligand.ncols();
    debug!(
        "global permutation null: {} pairs, {} permutations, {} spots",
        n_pairs, n_perm, n_spots
    );

    // The ligand side is never shuffled, so its spatial lag is computed once
    let lagged = weights.lag(ligand)?;
    let mut null = Array2::<f64>::zeros((n_pairs, n_perm));

    null.axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .for_each(|(k, mut column)| {
            let perm = permuter.permutation(k, n_spots);
            Zip::from(&mut column)
                .and(lagged.columns())
                .and(receptor.columns())
                .for_each(|out, lag, rec| {
                    *out = lag
                        .iter()
                        .zip(perm.iter())
                        .map(|(&l, &src)| l * rec[src])
                        .sum();
                });
        });

    Ok(null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::{standardize, Standardization};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{array, Array2};
    use rand::distr::{Distribution, Uniform};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn path_graph() -> SpatialWeights {
        SpatialWeights::from_triplets(
            4,
            &[
                (0, 1, 1.0),
                (1, 0, 1.0),
                (1, 2, 1.0),
                (2, 1, 1.0),
                (2, 3, 1.0),
                (3, 2, 1.0),
            ],
        )
        .unwrap()
    }

    fn random_symmetric_weights(n: usize, seed: u64) -> SpatialWeights {
        let mut rng = StdRng::seed_from_u64(seed);
        let value = Uniform::try_from(0.0..1.0).unwrap();
        let mut triplets = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if value.sample(&mut rng) < 0.2 {
                    let w = value.sample(&mut rng);
                    triplets.push((i, j, w));
                    triplets.push((j, i, w));
                }
            }
        }
        SpatialWeights::from_triplets(n, &triplets).unwrap()
    }

    fn random_signals(n: usize, k: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let value = Uniform::try_from(0.0..5.0).unwrap();
        let raw = Array2::from_shape_fn((n, k), |_| value.sample(&mut rng));
        standardize(raw.view(), Standardization::Global).values
    }

    #[test]
    fn test_path_graph_golden_score() {
        // W·L = [-1, 2, -2, 1]; (W·L)·R = -1 - 2 - 2 - 1
        let weights = path_graph();
        let signal = array![[1.0], [-1.0], [1.0], [-1.0]];
        let scores = global_scores(&weights, signal.view(), signal.view()).unwrap();
        assert_relative_eq!(scores[0], -6.0);
    }

    #[test]
    fn test_symmetric_weights_commute() {
        let weights = random_symmetric_weights(30, 3);
        let l = random_signals(30, 5, 4);
        let r = random_signals(30, 5, 5);

        let lr = global_scores(&weights, l.view(), r.view()).unwrap();
        let rl = global_scores(&weights, r.view(), l.view()).unwrap();
        for (a, b) in lr.iter().zip(rl.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let weights = path_graph();
        let l = Array2::<f64>::zeros((4, 2));
        let r = Array2::<f64>::zeros((4, 3));
        let err = global_scores(&weights, l.view(), r.view()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpatialError>(),
            Some(SpatialError::DimensionMismatch(_))
        ));

        let short = Array2::<f64>::zeros((3, 2));
        assert!(global_scores(&weights, short.view(), short.view()).is_err());
    }

    #[test]
    fn test_z_test() {
        let scores = array![0.0, 0.6, -0.6];
        let result = global_z_test(scores.view(), 0.36).unwrap();
        assert_relative_eq!(result.z[1], 1.0);
        assert_abs_diff_eq!(result.p_values[0], 0.5, epsilon = 1e-12);
        assert!(result.p_values[1] < result.p_values[0]);
        assert!(result.p_values[2] > result.p_values[0]);

        assert!(global_z_test(scores.view(), 0.0).is_err());
        assert!(global_z_test(scores.view(), f64::NAN).is_err());
    }

    #[test]
    fn test_null_matches_explicit_shuffle() {
        let weights = random_symmetric_weights(20, 9);
        let l = random_signals(20, 3, 10);
        let r = random_signals(20, 3, 11);
        let permuter = Permuter::new(Some(99));

        let null = global_permutation_null(&weights, l.view(), r.view(), 4, &permuter).unwrap();
        assert_eq!(null.dim(), (3, 4));

        for k in 0..4 {
            let perm = permuter.permutation(k, 20);
            let shuffled = r.select(Axis(0), &perm);
            let expected = global_scores(&weights, l.view(), shuffled.view()).unwrap();
            for p in 0..3 {
                assert_abs_diff_eq!(null[[p, k]], expected[p], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_null_is_seeded() {
        let weights = random_symmetric_weights(15, 1);
        let l = random_signals(15, 2, 2);
        let r = random_signals(15, 2, 3);

        let a = global_permutation_null(&weights, l.view(), r.view(), 10, &Permuter::new(Some(5)))
            .unwrap();
        let b = global_permutation_null(&weights, l.view(), r.view(), 10, &Permuter::new(Some(5)))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_mean_near_zero() {
        let n_perm = 2000;
        let weights = random_symmetric_weights(40, 21);
        let l = random_signals(40, 1, 22);
        let r = random_signals(40, 1, 23);

        let null = global_permutation_null(
            &weights,
            l.view(),
            r.view(),
            n_perm,
            &Permuter::new(Some(24)),
        )
        .unwrap();
        let row = null.row(0);
        let mean = row.mean().unwrap();
        let std = row.std(1.0);
        assert!(std > 0.0);
        assert!(mean.abs() < 4.0 * std / (n_perm as f64).sqrt());
    }
}
