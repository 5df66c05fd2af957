//! End-to-end ligand-receptor analysis over one expression matrix and one weight graph.
//!
//! Inputs are borrowed and never mutated; every run returns fresh result structs.

mod config;
mod result;

pub use config::{AnalysisConfig, AnalysisConfigBuilder, DEFAULT_N_PERM};
pub use result::{
    AnalysisResult, FilterReason, FilteredPair, GlobalPermutation, GlobalRecord, GlobalResult,
    LocalRecord, LocalResult, Side,
};

use std::collections::HashSet;

use anyhow::{bail, Context};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, Axis};

use crate::data::{ExpressionMatrix, LrPair, LrPairTable};
use crate::error::SpatialError;
use crate::statistics::global::{global_permutation_null, global_scores, global_z_test};
use crate::statistics::local::{local_permutation_test, local_scores, local_z_test};
use crate::statistics::{
    empirical_p_values, standardize, Permuter, Standardization, Standardized,
};
use crate::weights::SpatialWeights;

/// Ligand and receptor signals of the kept pairs under one standardization, spots × pairs.
#[derive(Debug, Clone)]
struct Signals {
    ligand: Array2<f64>,
    receptor: Array2<f64>,
}

impl Signals {
    fn select(ligand: &Standardized, receptor: &Standardized, keep: &[usize]) -> Self {
        Signals {
            ligand: ligand.values.select(Axis(1), keep),
            receptor: receptor.values.select(Axis(1), keep),
        }
    }
}

/// Pairs that survived filtering.
///
/// Standardization happens once here, so the engines see exactly the columns the
/// filter accepted.
#[derive(Debug, Clone)]
pub struct PreparedPairs {
    names: Vec<String>,
    ligand: Array2<f64>,
    receptor: Array2<f64>,
    global: Signals,
    local: Signals,
    filtered: Vec<FilteredPair>,
}

impl PreparedPairs {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Raw gene-set means of the ligands, spots × kept pairs
    pub fn ligand(&self) -> ArrayView2<'_, f64> {
        self.ligand.view()
    }

    /// Raw gene-set means of the receptors, spots × kept pairs
    pub fn receptor(&self) -> ArrayView2<'_, f64> {
        self.receptor.view()
    }

    pub fn filtered(&self) -> &[FilteredPair] {
        &self.filtered
    }
}

pub struct LrAnalysis<'a> {
    expression: &'a ExpressionMatrix,
    weights: &'a SpatialWeights,
    pairs: &'a LrPairTable,
    config: AnalysisConfig,
}

impl<'a> LrAnalysis<'a> {
    pub fn new(
        expression: &'a ExpressionMatrix,
        weights: &'a SpatialWeights,
        pairs: &'a LrPairTable,
        config: AnalysisConfig,
    ) -> anyhow::Result<Self> {
        if weights.n_spots() != expression.n_spots() {
            bail!(SpatialError::DimensionMismatch(format!(
                "weight matrix covers {} spots but the expression matrix has {}",
                weights.n_spots(),
                expression.n_spots()
            )));
        }
        if expression.n_spots() < 2 {
            bail!(SpatialError::InvalidInput(format!(
                "at least two spots are required, got {}",
                expression.n_spots()
            )));
        }
        Ok(LrAnalysis {
            expression,
            weights,
            pairs,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn permuter(&self) -> Permuter {
        let permuter = Permuter::new(self.config.seed());
        debug!("permutation base seed {}", permuter.seed());
        permuter
    }

    /// Resolves gene sets, averages members per spot and drops pairs that cannot be scored.
    pub fn prepare(&self) -> anyhow::Result<PreparedPairs> {
        let mut filtered = Vec::new();
        let mut candidates: Vec<&LrPair> = Vec::with_capacity(self.pairs.len());

        for pair in self.pairs.pairs() {
            let mut missing = self.expression.missing_genes(&pair.ligand);
            missing.extend(self.expression.missing_genes(&pair.receptor));
            if missing.is_empty() {
                candidates.push(pair);
            } else {
                let reason = FilterReason::MissingGenes(missing);
                warn!("dropping pair {}: {}", pair.name, reason);
                filtered.push(FilteredPair {
                    name: pair.name.clone(),
                    reason,
                });
            }
        }

        let ligand_sets: Vec<_> = candidates.iter().map(|p| &p.ligand).collect();
        let receptor_sets: Vec<_> = candidates.iter().map(|p| &p.receptor).collect();
        let ligand = self
            .expression
            .gene_set_means(&ligand_sets)
            .context("averaging ligand gene sets")?;
        let receptor = self
            .expression
            .gene_set_means(&receptor_sets)
            .context("averaging receptor gene sets")?;

        let ligand_global = standardize(ligand.view(), Standardization::Global);
        let receptor_global = standardize(receptor.view(), Standardization::Global);
        let ligand_local = standardize(ligand.view(), Standardization::Local);
        let receptor_local = standardize(receptor.view(), Standardization::Local);

        // Both modes run the same constant-column test on the same raw columns
        let ligand_flat: HashSet<usize> = ligand_global
            .degenerate
            .iter()
            .chain(ligand_local.degenerate.iter())
            .copied()
            .collect();
        let receptor_flat: HashSet<usize> = receptor_global
            .degenerate
            .iter()
            .chain(receptor_local.degenerate.iter())
            .copied()
            .collect();

        let mut keep = Vec::with_capacity(candidates.len());
        for (idx, pair) in candidates.iter().enumerate() {
            let ligand_total = ligand.column(idx).sum();
            let receptor_total = receptor.column(idx).sum();
            let reason = if let Some(side) =
                Side::from_flags(ligand_total <= 0.0, receptor_total <= 0.0)
            {
                Some(FilterReason::ZeroExpression(side))
            } else {
                Side::from_flags(ligand_flat.contains(&idx), receptor_flat.contains(&idx))
                    .map(FilterReason::ZeroVariance)
            };

            match reason {
                Some(reason) => {
                    warn!("dropping pair {}: {}", pair.name, reason);
                    filtered.push(FilteredPair {
                        name: pair.name.clone(),
                        reason,
                    });
                }
                None => keep.push(idx),
            }
        }

        info!(
            "{} of {} pairs kept, {} filtered",
            keep.len(),
            self.pairs.len(),
            filtered.len()
        );

        Ok(PreparedPairs {
            names: keep.iter().map(|&idx| candidates[idx].name.clone()).collect(),
            ligand: ligand.select(Axis(1), &keep),
            receptor: receptor.select(Axis(1), &keep),
            global: Signals::select(&ligand_global, &receptor_global, &keep),
            local: Signals::select(&ligand_local, &receptor_local, &keep),
            filtered,
        })
    }

    pub fn run_global(&self, prepared: &PreparedPairs) -> anyhow::Result<GlobalResult> {
        let method = self.config.method();
        info!(
            "global statistic for {} pairs over {} spots ({})",
            prepared.len(),
            self.weights.n_spots(),
            method
        );

        // The variance depends only on W, so a bad graph fails before any scoring
        let variance = if method.uses_z_score() {
            let variance = self.weights.global_variance()?;
            if !(variance.is_finite() && variance > 0.0) {
                bail!(SpatialError::InvalidInput(format!(
                    "weight matrix gives a non-positive global variance ({}), the z-test is undefined",
                    variance
                )));
            }
            Some(variance)
        } else {
            None
        };

        let ligand = &prepared.global.ligand;
        let receptor = &prepared.global.receptor;
        let scores = global_scores(self.weights, ligand.view(), receptor.view())?;

        let z_test = match variance {
            Some(variance) => {
                debug!("global theoretical variance {}", variance);
                Some(global_z_test(scores.view(), variance)?)
            }
            None => None,
        };

        let permutation = if method.uses_permutation() {
            let null = global_permutation_null(
                self.weights,
                ligand.view(),
                receptor.view(),
                self.config.n_perm(),
                &self.permuter(),
            )?;
            let p_values = empirical_p_values(scores.view(), null.view())?;
            Some(GlobalPermutation { null, p_values })
        } else {
            None
        };

        Ok(GlobalResult {
            pairs: prepared.names.clone(),
            scores,
            z_test,
            permutation,
        })
    }

    pub fn run_local(&self, prepared: &PreparedPairs) -> anyhow::Result<LocalResult> {
        let method = self.config.method();
        info!(
            "local statistic for {} pairs over {} spots ({})",
            prepared.len(),
            self.weights.n_spots(),
            method
        );

        let ligand = &prepared.local.ligand;
        let receptor = &prepared.local.receptor;
        let scores = local_scores(self.weights, ligand.view(), receptor.view())?;
        let combined = scores.combined();

        let z_test = if method.uses_z_score() {
            Some(local_z_test(
                self.weights,
                ligand.view(),
                receptor.view(),
                combined.view(),
            )?)
        } else {
            None
        };

        let permutation = if method.uses_permutation() {
            Some(local_permutation_test(
                self.weights,
                ligand.view(),
                receptor.view(),
                combined.view(),
                self.config.n_perm(),
                &self.permuter(),
                self.config.retain_local_null(),
            )?)
        } else {
            None
        };

        Ok(LocalResult {
            pairs: prepared.names.clone(),
            spots: self.expression.spots().to_vec(),
            scores,
            combined,
            z_test,
            permutation,
        })
    }

    pub fn run(&self) -> anyhow::Result<AnalysisResult> {
        let prepared = self.prepare()?;
        let global = self.run_global(&prepared)?;
        let local = self.run_local(&prepared)?;
        Ok(AnalysisResult {
            global,
            local,
            filtered: prepared.filtered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GeneSet;
    use approx::assert_relative_eq;
    use ndarray::array;

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

    fn expression() -> ExpressionMatrix {
        // genes: A B C Z F
        let dense = array![
            [2.0, 0.0, 1.0, 0.0, 3.0],
            [0.0, 2.0, 2.0, 0.0, 3.0],
            [2.0, 0.0, 1.0, 0.0, 3.0],
            [0.0, 2.0, 2.0, 0.0, 3.0],
        ];
        let genes = ["A", "B", "C", "Z", "F"].iter().map(|g| g.to_string()).collect();
        let spots = (0..4).map(|i| format!("spot{}", i)).collect();
        ExpressionMatrix::from_dense(dense.view(), genes, spots).unwrap()
    }

    fn pairs() -> LrPairTable {
        LrPairTable::new(vec![
            LrPair::single("A_B", "A", "B").unwrap(),
            LrPair::single("A_A", "A", "A").unwrap(),
            LrPair::single("Z_B", "Z", "B").unwrap(),
            LrPair::single("A_F", "A", "F").unwrap(),
            LrPair::single("A_Q", "A", "Q").unwrap(),
            LrPair::new(
                "AC_B",
                GeneSet::new(["A", "C"]).unwrap(),
                GeneSet::new(["B"]).unwrap(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_dimension_mismatch() {
        let expr = expression();
        let table = pairs();
        let weights = SpatialWeights::from_triplets(3, &[(0, 1, 1.0), (1, 0, 1.0)]).unwrap();
        let err = LrAnalysis::new(&expr, &weights, &table, AnalysisConfig::default())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<SpatialError>(),
            Some(SpatialError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_prepare_filters() {
        let expr = expression();
        let weights = path_graph();
        let table = pairs();
        let analysis =
            LrAnalysis::new(&expr, &weights, &table, AnalysisConfig::default()).unwrap();
        let prepared = analysis.prepare().unwrap();

        assert_eq!(prepared.names(), ["A_B", "A_A", "AC_B"]);
        assert_eq!(prepared.ligand().dim(), (4, 3));

        let reason = |name: &str| {
            prepared
                .filtered()
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.reason.clone())
        };
        assert_eq!(
            reason("A_Q"),
            Some(FilterReason::MissingGenes(vec!["Q".to_string()]))
        );
        assert_eq!(
            reason("Z_B"),
            Some(FilterReason::ZeroExpression(Side::Ligand))
        );
        assert_eq!(
            reason("A_F"),
            Some(FilterReason::ZeroVariance(Side::Receptor))
        );

        // mean of A and C
        assert_relative_eq!(prepared.ligand()[[0, 2]], 1.5);
        assert_relative_eq!(prepared.ligand()[[1, 2]], 1.0);
    }

    #[test]
    fn test_run_global_z_only() {
        let expr = expression();
        let weights = path_graph();
        let table = pairs();
        let config = AnalysisConfig::builder()
            .method(crate::statistics::Method::ZScore)
            .build()
            .unwrap();
        let analysis = LrAnalysis::new(&expr, &weights, &table, config).unwrap();
        let prepared = analysis.prepare().unwrap();
        let global = analysis.run_global(&prepared).unwrap();

        assert!(global.permutation.is_none());
        let z_test = global.z_test.as_ref().unwrap();
        assert_relative_eq!(z_test.variance, 52.0 / 144.0, epsilon = 1e-12);

        // A = [2,0,2,0] alternates, so A_A behaves like the golden path-graph case scaled
        // to unit norm: -6 / 4
        let a_a = global.get("A_A").unwrap();
        assert_relative_eq!(a_a.score, -1.5, epsilon = 1e-12);
        // B is A's mirror image
        let a_b = global.get("A_B").unwrap();
        assert_relative_eq!(a_b.score, 1.5, epsilon = 1e-12);
        assert!(a_b.z_p.unwrap() < a_a.z_p.unwrap());
    }

    #[test]
    fn test_run_local_seeded() {
        let expr = expression();
        let weights = path_graph();
        let table = pairs();
        let config = || {
            AnalysisConfig::builder()
                .method_str("permutation")
                .n_perm(40)
                .seed(17)
                .build()
                .unwrap()
        };
        let first = LrAnalysis::new(&expr, &weights, &table, config())
            .unwrap()
            .run()
            .unwrap();
        let second = LrAnalysis::new(&expr, &weights, &table, config())
            .unwrap()
            .run()
            .unwrap();

        let p1 = &first.local.permutation.as_ref().unwrap().p_values;
        let p2 = &second.local.permutation.as_ref().unwrap().p_values;
        assert_eq!(p1, p2);
        assert_eq!(first.local.combined.dim(), (4, 3));
        assert!(first.local.z_test.is_none());
        assert!(first.is_filtered("Z_B"));
        assert!(!first.is_filtered("A_B"));
    }

    #[test]
    fn test_all_pairs_filtered() {
        let expr = expression();
        let weights = path_graph();
        let table = LrPairTable::new(vec![LrPair::single("Z_Z", "Z", "Z").unwrap()]).unwrap();
        let config = AnalysisConfig::builder().n_perm(10).seed(1).build().unwrap();
        let result = LrAnalysis::new(&expr, &weights, &table, config)
            .unwrap()
            .run()
            .unwrap();

        assert!(result.global.is_empty());
        assert_eq!(result.local.n_pairs(), 0);
        assert_eq!(
            result.filtered[0].reason,
            FilterReason::ZeroExpression(Side::Both)
        );
    }
}
