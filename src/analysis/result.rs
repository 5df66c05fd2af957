use std::fmt;

use anyhow::{anyhow, bail};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::SpatialError;
use crate::statistics::global::GlobalZTest;
use crate::statistics::local::{LocalPermutationTest, LocalScores, LocalZTest};
use crate::statistics::Method;

/// Which side of a pair triggered a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ligand,
    Receptor,
    Both,
}

impl Side {
    pub(crate) fn from_flags(ligand: bool, receptor: bool) -> Option<Side> {
        match (ligand, receptor) {
            (true, true) => Some(Side::Both),
            (true, false) => Some(Side::Ligand),
            (false, true) => Some(Side::Receptor),
            (false, false) => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Ligand => f.write_str("ligand"),
            Side::Receptor => f.write_str("receptor"),
            Side::Both => f.write_str("ligand and receptor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    MissingGenes(Vec<String>),
    ZeroExpression(Side),
    ZeroVariance(Side),
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterReason::MissingGenes(genes) => {
                write!(f, "genes not in expression matrix: {}", genes.join(", "))
            }
            FilterReason::ZeroExpression(side) => write!(f, "no {} expression", side),
            FilterReason::ZeroVariance(side) => write!(f, "constant {} signal", side),
        }
    }
}

/// A pair excluded before any statistic was computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPair {
    pub name: String,
    pub reason: FilterReason,
}

fn single_method(method: Method) -> anyhow::Result<Method> {
    if method == Method::Both {
        bail!(SpatialError::InvalidConfig(
            "selection needs a single method, either 'z-score' or 'permutation'".to_string()
        ));
    }
    Ok(method)
}

fn not_computed(method: Method) -> anyhow::Error {
    anyhow!(SpatialError::InvalidConfig(format!(
        "{} results were not computed in this run",
        method
    )))
}

#[derive(Debug, Clone)]
pub struct GlobalPermutation {
    /// pairs × n_perm
    pub null: Array2<f64>,
    pub p_values: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct GlobalResult {
    pub pairs: Vec<String>,
    pub scores: Array1<f64>,
    pub z_test: Option<GlobalZTest>,
    pub permutation: Option<GlobalPermutation>,
}

/// One row of the global table.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRecord<'a> {
    pub pair: &'a str,
    pub score: f64,
    pub z: Option<f64>,
    pub z_p: Option<f64>,
    pub perm_p: Option<f64>,
    pub null: Option<ArrayView1<'a, f64>>,
}

impl GlobalResult {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn index_of(&self, pair: &str) -> Option<usize> {
        self.pairs.iter().position(|p| p == pair)
    }

    fn record(&self, idx: usize) -> GlobalRecord<'_> {
        GlobalRecord {
            pair: &self.pairs[idx],
            score: self.scores[idx],
            z: self.z_test.as_ref().map(|t| t.z[idx]),
            z_p: self.z_test.as_ref().map(|t| t.p_values[idx]),
            perm_p: self.permutation.as_ref().map(|t| t.p_values[idx]),
            null: self.permutation.as_ref().map(|t| t.null.row(idx)),
        }
    }

    pub fn get(&self, pair: &str) -> Option<GlobalRecord<'_>> {
        self.index_of(pair).map(|idx| self.record(idx))
    }

    pub fn records(&self) -> impl Iterator<Item = GlobalRecord<'_>> {
        (0..self.len()).map(move |idx| self.record(idx))
    }

    pub fn p_values(&self, method: Method) -> anyhow::Result<ArrayView1<'_, f64>> {
        match single_method(method)? {
            Method::ZScore => self
                .z_test
                .as_ref()
                .map(|t| t.p_values.view())
                .ok_or_else(|| not_computed(method)),
            _ => self
                .permutation
                .as_ref()
                .map(|t| t.p_values.view())
                .ok_or_else(|| not_computed(method)),
        }
    }

    /// Pairs whose raw p-value under `method` is below `alpha`, in table order.
    pub fn selected_pairs(&self, method: Method, alpha: f64) -> anyhow::Result<Vec<&str>> {
        let p_values = self.p_values(method)?;
        Ok(self
            .pairs
            .iter()
            .zip(p_values.iter())
            .filter(|(_, &p)| p < alpha)
            .map(|(name, _)| name.as_str())
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct LocalResult {
    pub pairs: Vec<String>,
    pub spots: Vec<String>,
    pub scores: LocalScores,
    /// ligand term + receptor term, spots × pairs
    pub combined: Array2<f64>,
    pub z_test: Option<LocalZTest>,
    pub permutation: Option<LocalPermutationTest>,
}

/// One (pair, spot) cell of the local table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalRecord {
    pub score: f64,
    pub ligand_term: f64,
    pub receptor_term: f64,
    pub z_p: Option<f64>,
    pub perm_p: Option<f64>,
}

impl LocalResult {
    pub fn n_pairs(&self) -> usize {
        self.pairs.len()
    }

    pub fn n_spots(&self) -> usize {
        self.spots.len()
    }

    pub fn index_of(&self, pair: &str) -> Option<usize> {
        self.pairs.iter().position(|p| p == pair)
    }

    pub fn get(&self, pair: &str, spot: usize) -> Option<LocalRecord> {
        let p = self.index_of(pair)?;
        if spot >= self.n_spots() {
            return None;
        }
        Some(LocalRecord {
            score: self.combined[[spot, p]],
            ligand_term: self.scores.ligand_term[[spot, p]],
            receptor_term: self.scores.receptor_term[[spot, p]],
            z_p: self.z_test.as_ref().map(|t| t.p_values[[spot, p]]),
            perm_p: self.permutation.as_ref().map(|t| t.p_values[[spot, p]]),
        })
    }

    /// Combined local score of one pair at every spot.
    pub fn pair_scores(&self, pair: &str) -> Option<ArrayView1<'_, f64>> {
        self.index_of(pair)
            .map(|p| self.combined.index_axis(Axis(1), p))
    }

    pub fn p_values(&self, pair: &str, method: Method) -> anyhow::Result<ArrayView1<'_, f64>> {
        let p = self.index_of(pair).ok_or_else(|| {
            SpatialError::InvalidInput(format!("pair '{}' not in local result", pair))
        })?;
        let table = match single_method(method)? {
            Method::ZScore => self.z_test.as_ref().map(|t| &t.p_values),
            _ => self.permutation.as_ref().map(|t| &t.p_values),
        }
        .ok_or_else(|| not_computed(method))?;
        Ok(table.index_axis(Axis(1), p))
    }

    /// Spots where `pair` has a local p-value below `alpha`, in spot order.
    pub fn selected_spots(
        &self,
        pair: &str,
        method: Method,
        alpha: f64,
    ) -> anyhow::Result<Vec<&str>> {
        let p_values = self.p_values(pair, method)?;
        Ok(self
            .spots
            .iter()
            .zip(p_values.iter())
            .filter(|(_, &p)| p < alpha)
            .map(|(spot, _)| spot.as_str())
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub global: GlobalResult,
    pub local: LocalResult,
    pub filtered: Vec<FilteredPair>,
}

impl AnalysisResult {
    pub fn is_filtered(&self, pair: &str) -> bool {
        self.filtered.iter().any(|f| f.name == pair)
    }
}
