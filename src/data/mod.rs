//! # Input data
//!
//! Immutable inputs of an analysis run: the spots × genes expression matrix and the
//! table of ligand-receptor pairs. Loading these from disk is left to the caller.

use std::collections::{HashMap, HashSet};

use anyhow::bail;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array2, ArrayView2, Axis};

use crate::error::SpatialError;
use crate::sparse::ColumnGather;

/// Spots × genes expression, stored sparse.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    data: CsrMatrix<f64>,
    genes: Vec<String>,
    spots: Vec<String>,
    gene_index: HashMap<String, usize>,
}

impl ExpressionMatrix {
    pub fn new(data: CsrMatrix<f64>, genes: Vec<String>, spots: Vec<String>) -> anyhow::Result<Self> {
        if genes.len() != data.ncols() {
            bail!(SpatialError::DimensionMismatch(format!(
                "{} gene names for an expression matrix with {} columns",
                genes.len(),
                data.ncols()
            )));
        }
        if spots.len() != data.nrows() {
            bail!(SpatialError::DimensionMismatch(format!(
                "{} spot names for an expression matrix with {} rows",
                spots.len(),
                data.nrows()
            )));
        }
        if data.values().iter().any(|v| !v.is_finite()) {
            bail!(SpatialError::InvalidInput(
                "expression matrix contains non-finite values".to_string()
            ));
        }

        let mut gene_index = HashMap::with_capacity(genes.len());
        for (i, gene) in genes.iter().enumerate() {
            if gene_index.insert(gene.clone(), i).is_some() {
                bail!(SpatialError::DuplicateGene(gene.clone()));
            }
        }

        Ok(ExpressionMatrix {
            data,
            genes,
            spots,
            gene_index,
        })
    }

    /// Builds the sparse matrix from a dense spots × genes array, dropping exact zeros.
    pub fn from_dense(
        dense: ArrayView2<f64>,
        genes: Vec<String>,
        spots: Vec<String>,
    ) -> anyhow::Result<Self> {
        let mut coo = CooMatrix::new(dense.nrows(), dense.ncols());
        for ((i, j), &v) in dense.indexed_iter() {
            if v != 0.0 {
                coo.push(i, j, v);
            }
        }
        Self::new(CsrMatrix::from(&coo), genes, spots)
    }

    pub fn n_spots(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_genes(&self) -> usize {
        self.data.ncols()
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn spots(&self) -> &[String] {
        &self.spots
    }

    pub fn data(&self) -> &CsrMatrix<f64> {
        &self.data
    }

    pub fn gene_position(&self, gene: &str) -> Option<usize> {
        self.gene_index.get(gene).copied()
    }

    /// Genes of `set` that are not columns of this matrix.
    pub fn missing_genes(&self, set: &GeneSet) -> Vec<String> {
        set.genes()
            .iter()
            .filter(|g| !self.gene_index.contains_key(g.as_str()))
            .cloned()
            .collect()
    }

    /// Per-spot mean expression over the members of each gene set, one column per set.
    ///
    /// Every gene of every set has to be present, see [`ExpressionMatrix::missing_genes`].
    pub fn gene_set_means(&self, sets: &[&GeneSet]) -> anyhow::Result<Array2<f64>> {
        let mut columns: Vec<usize> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();
        let mut members: Vec<Vec<usize>> = Vec::with_capacity(sets.len());

        for set in sets {
            let mut local = Vec::with_capacity(set.len());
            for gene in set.genes() {
                let col = self.gene_position(gene).ok_or_else(|| {
                    SpatialError::InvalidInput(format!("gene '{}' not in expression matrix", gene))
                })?;
                let idx = *slot.entry(col).or_insert_with(|| {
                    columns.push(col);
                    columns.len() - 1
                });
                local.push(idx);
            }
            members.push(local);
        }

        let gathered = self.data.gather_columns(&columns)?;
        let mut out = Array2::<f64>::zeros((self.n_spots(), sets.len()));
        for (mut target, local) in out.axis_iter_mut(Axis(1)).zip(members.iter()) {
            for &idx in local {
                target += &gathered.column(idx);
            }
            target /= local.len() as f64;
        }
        Ok(out)
    }
}

/// Non-empty, duplicate-free, ordered set of gene identifiers.
///
/// Multi-subunit ligands and receptors carry more than one gene; their signal is the
/// per-spot mean of the members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneSet {
    genes: Vec<String>,
}

impl GeneSet {
    pub fn new<I, S>(genes: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let genes: Vec<String> = genes
            .into_iter()
            .map(Into::into)
            .filter(|g: &String| seen.insert(g.clone()))
            .collect();
        if genes.is_empty() {
            bail!(SpatialError::EmptyGeneSet);
        }
        Ok(GeneSet { genes })
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrPair {
    pub name: String,
    pub ligand: GeneSet,
    pub receptor: GeneSet,
}

impl LrPair {
    pub fn new(name: impl Into<String>, ligand: GeneSet, receptor: GeneSet) -> Self {
        LrPair {
            name: name.into(),
            ligand,
            receptor,
        }
    }

    /// Convenience for the common single-gene case.
    pub fn single(
        name: impl Into<String>,
        ligand: impl Into<String>,
        receptor: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let ligand: String = ligand.into();
        let receptor: String = receptor.into();
        Ok(LrPair::new(
            name,
            GeneSet::new([ligand])?,
            GeneSet::new([receptor])?,
        ))
    }
}

/// Ordered collection of uniquely named ligand-receptor pairs.
#[derive(Debug, Clone, Default)]
pub struct LrPairTable {
    pairs: Vec<LrPair>,
}

impl LrPairTable {
    pub fn new(pairs: Vec<LrPair>) -> anyhow::Result<Self> {
        let mut names = HashSet::with_capacity(pairs.len());
        for pair in &pairs {
            if !names.insert(pair.name.as_str()) {
                bail!(SpatialError::DuplicatePair(pair.name.clone()));
            }
        }
        Ok(LrPairTable { pairs })
    }

    pub fn pairs(&self) -> &[LrPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LrPair> {
        self.pairs.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn create_expression() -> ExpressionMatrix {
        // genes: A B C
        let dense = array![[1.0, 0.0, 2.0], [0.0, 0.0, 4.0], [3.0, 1.0, 0.0]];
        ExpressionMatrix::from_dense(
            dense.view(),
            vec!["A".into(), "B".into(), "C".into()],
            names("spot", 3),
        )
        .unwrap()
    }

    #[test]
    fn test_expression_shape_checks() {
        let dense = Array2::<f64>::zeros((3, 2));
        let err = ExpressionMatrix::from_dense(dense.view(), names("g", 3), names("s", 3))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpatialError>(),
            Some(SpatialError::DimensionMismatch(_))
        ));

        let err = ExpressionMatrix::from_dense(dense.view(), vec!["x".into(), "x".into()], names("s", 3))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SpatialError>(),
            Some(&SpatialError::DuplicateGene("x".into()))
        );
    }

    #[test]
    fn test_gene_set_means() {
        let expr = create_expression();
        let single = GeneSet::new(["C"]).unwrap();
        let complex = GeneSet::new(["A", "C"]).unwrap();
        let means = expr.gene_set_means(&[&single, &complex]).unwrap();

        assert_eq!(means.dim(), (3, 2));
        assert_relative_eq!(means[[0, 0]], 2.0);
        assert_relative_eq!(means[[1, 0]], 4.0);
        assert_relative_eq!(means[[0, 1]], 1.5);
        assert_relative_eq!(means[[1, 1]], 2.0);
        assert_relative_eq!(means[[2, 1]], 1.5);
    }

    #[test]
    fn test_missing_genes() {
        let expr = create_expression();
        let set = GeneSet::new(["A", "Z", "Y"]).unwrap();
        assert_eq!(expr.missing_genes(&set), vec!["Z".to_string(), "Y".to_string()]);
        assert!(expr.gene_set_means(&[&set]).is_err());
    }

    #[test]
    fn test_gene_set_dedup_and_empty() {
        let set = GeneSet::new(["A", "B", "A"]).unwrap();
        assert_eq!(set.len(), 2);

        let err = GeneSet::new(Vec::<String>::new()).unwrap_err();
        assert_eq!(err.downcast_ref::<SpatialError>(), Some(&SpatialError::EmptyGeneSet));
    }

    #[test]
    fn test_duplicate_pairs_rejected() {
        let a = LrPair::single("P", "A", "B").unwrap();
        let b = LrPair::single("P", "C", "B").unwrap();
        let err = LrPairTable::new(vec![a.clone(), b]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SpatialError>(),
            Some(&SpatialError::DuplicatePair("P".into()))
        );

        let table = LrPairTable::new(vec![a]).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get("P").is_some());
        assert!(table.get("Q").is_none());
    }
}
