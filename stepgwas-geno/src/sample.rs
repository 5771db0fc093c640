//! Taxa intersection and matching logic.
//!
//! Genotype sources and phenotype files list taxa in their own orders. Analyses
//! run on the shared taxa, in phenotype order.

use std::collections::{BTreeSet, HashMap};

/// Result of intersecting taxa names from multiple sources.
#[derive(Debug, Clone)]
pub struct TaxaIntersection {
    /// Taxa in the intersection, in the order they appear in the primary source.
    pub ids: Vec<String>,
    /// Indices into each source for the intersected taxa.
    pub indices: Vec<Vec<usize>>,
}

/// Intersect taxa names from multiple sources.
///
/// Returns the intersection in the order they appear in the first (primary) source.
pub fn intersect_taxa(sources: &[&[String]]) -> TaxaIntersection {
    if sources.is_empty() {
        return TaxaIntersection {
            ids: Vec::new(),
            indices: Vec::new(),
        };
    }

    let maps: Vec<HashMap<&str, usize>> = sources
        .iter()
        .map(|ids| {
            ids.iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i))
                .collect()
        })
        .collect();

    let mut result_ids = Vec::new();
    let mut result_indices: Vec<Vec<usize>> = vec![Vec::new(); sources.len()];

    for (primary_idx, id) in sources[0].iter().enumerate() {
        let in_all = maps[1..].iter().all(|m| m.contains_key(id.as_str()));
        if in_all {
            result_ids.push(id.clone());
            result_indices[0].push(primary_idx);
            for (src, map) in maps[1..].iter().enumerate() {
                result_indices[src + 1].push(map[id.as_str()]);
            }
        }
    }

    TaxaIntersection {
        ids: result_ids,
        indices: result_indices,
    }
}

/// How to read genotype data for a list of analysis rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxaMap {
    /// Distinct genotype taxa that are used, ascending.
    pub unique_taxa: Vec<usize>,
    /// For each analysis row, its position in `unique_taxa`.
    pub taxa_index: Vec<usize>,
}

impl TaxaMap {
    /// Build from the genotype taxon index of every analysis row.
    pub fn from_row_taxa(row_taxa: &[usize]) -> Self {
        let unique_taxa: Vec<usize> = row_taxa
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position: HashMap<usize, usize> = unique_taxa
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i))
            .collect();
        let taxa_index = row_taxa.iter().map(|t| position[t]).collect();
        Self {
            unique_taxa,
            taxa_index,
        }
    }
}
