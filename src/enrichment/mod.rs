//! Pathway over-representation of selected interactions.
//!
//! For a query list of interaction names and every pathway of an [`InteractionDb`],
//! `p = P(X ≥ overlap)` with `X ~ Hypergeometric(total interactions, pathway size,
//! query size)`, the one-sided ("greater") Fisher exact test.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{bail, Context};
use log::debug;
use statrs::distribution::{DiscreteCDF, Hypergeometric};

use crate::data::{GeneSet, LrPair, LrPairTable};
use crate::error::SpatialError;

/// One database entry. Names are stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub name: String,
    pub pathway: String,
    pub ligand: GeneSet,
    pub receptor: GeneSet,
}

impl Interaction {
    pub fn new(
        name: impl Into<String>,
        pathway: impl Into<String>,
        ligand: GeneSet,
        receptor: GeneSet,
    ) -> Self {
        Interaction {
            name: name.into().to_uppercase(),
            pathway: pathway.into(),
            ligand,
            receptor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InteractionDb {
    interactions: Vec<Interaction>,
    /// pathway -> member interaction names
    pathways: BTreeMap<String, BTreeSet<String>>,
    names: HashSet<String>,
}

impl InteractionDb {
    pub fn new(interactions: Vec<Interaction>) -> anyhow::Result<Self> {
        let mut names = HashSet::with_capacity(interactions.len());
        let mut pathways: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for interaction in &interactions {
            if !names.insert(interaction.name.clone()) {
                bail!(SpatialError::DuplicatePair(interaction.name.clone()));
            }
            pathways
                .entry(interaction.pathway.clone())
                .or_default()
                .insert(interaction.name.clone());
        }
        Ok(InteractionDb {
            interactions,
            pathways,
            names,
        })
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_uppercase())
    }

    /// Pathway names in sorted order.
    pub fn pathways(&self) -> impl Iterator<Item = &str> {
        self.pathways.keys().map(String::as_str)
    }

    pub fn pathway_members(&self, pathway: &str) -> Option<&BTreeSet<String>> {
        self.pathways.get(pathway)
    }

    /// The interactions as ligand-receptor pairs, named after the interaction.
    pub fn pair_table(&self) -> anyhow::Result<LrPairTable> {
        LrPairTable::new(
            self.interactions
                .iter()
                .map(|i| LrPair::new(i.name.clone(), i.ligand.clone(), i.receptor.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathwayEnrichment {
    pub group: String,
    pub pathway: String,
    pub fisher_p: f64,
    pub pathway_size: usize,
    pub overlap_size: usize,
    /// Sorted
    pub overlap: Vec<String>,
}

/// `P(X ≥ overlap)` for `X ~ Hypergeometric(population, successes, draws)`.
pub fn hypergeometric_upper_tail(
    overlap: u64,
    population: u64,
    successes: u64,
    draws: u64,
) -> anyhow::Result<f64> {
    if overlap == 0 {
        return Ok(1.0);
    }
    let dist = Hypergeometric::new(population, successes, draws).with_context(|| {
        format!(
            "hypergeometric with population {}, successes {}, draws {}",
            population, successes, draws
        )
    })?;
    // sf(k) is P(X > k)
    Ok(dist.sf(overlap - 1))
}

/// Enrichment of every pathway for each named group of interaction names.
///
/// Query names are upper-cased and intersected with the database; unknown names are
/// ignored. Rows come out group by group, pathways in sorted order.
pub fn compute_pathway<S: AsRef<str>>(
    db: &InteractionDb,
    groups: &[(String, Vec<S>)],
) -> anyhow::Result<Vec<PathwayEnrichment>> {
    let total = db.len() as u64;
    let mut rows = Vec::with_capacity(groups.len() * db.pathways.len());

    for (group, names) in groups {
        let query: BTreeSet<String> = names
            .iter()
            .map(|n| n.as_ref().to_uppercase())
            .filter(|n| db.names.contains(n))
            .collect();
        debug!(
            "group {}: {} of {} names found in the interaction database",
            group,
            query.len(),
            names.len()
        );

        for (pathway, members) in &db.pathways {
            let overlap: Vec<String> = query.intersection(members).cloned().collect();
            let fisher_p = hypergeometric_upper_tail(
                overlap.len() as u64,
                total,
                members.len() as u64,
                query.len() as u64,
            )?;
            rows.push(PathwayEnrichment {
                group: group.clone(),
                pathway: pathway.clone(),
                fisher_p,
                pathway_size: members.len(),
                overlap_size: overlap.len(),
                overlap,
            });
        }
    }
    Ok(rows)
}
