//! Candidate sites and the covariates they supply.
//!
//! A site is either backed by discrete genotype calls (major/minor presence
//! bits per taxon) or by continuous reference-allele probabilities. Both
//! produce one additive covariate value per analysis row.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use stepgwas_geno::{GenotypeTable, SiteCalls};

/// Model selection criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    /// F-test p-value, scored as -log10(p).
    Pval,
    Aic,
    Bic,
    /// BIC with an extra penalty scaling with the number of candidate sites.
    Mbic,
}

impl Criterion {
    /// +1 when larger scores are preferred, -1 when smaller ones are.
    pub fn direction(self) -> f64 {
        match self {
            Criterion::Pval => 1.0,
            _ => -1.0,
        }
    }

    /// Order two scores so that `Greater` means `a` is preferred.
    ///
    /// Undefined (NaN) scores are less preferred than any defined score.
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                if self.direction() > 0.0 {
                    ord
                } else {
                    ord.reverse()
                }
            }
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Criterion::Pval => "pval",
            Criterion::Aic => "aic",
            Criterion::Bic => "bic",
            Criterion::Mbic => "mbic",
        };
        f.write_str(s)
    }
}

impl FromStr for Criterion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pval" | "p" | "pvalue" => Ok(Criterion::Pval),
            "aic" => Ok(Criterion::Aic),
            "bic" => Ok(Criterion::Bic),
            "mbic" => Ok(Criterion::Mbic),
            other => bail!("Unknown selection criterion '{}' (pval, aic, bic, mbic)", other),
        }
    }
}

/// Per-taxon data behind a site's additive covariate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SiteCovariate {
    Genotype(SiteCalls),
    ReferenceProbability(Vec<f32>),
}

impl SiteCovariate {
    fn n_taxa(&self) -> usize {
        match self {
            SiteCovariate::Genotype(calls) => calls.len(),
            SiteCovariate::ReferenceProbability(p) => p.len(),
        }
    }

    /// Value for stored taxon `t`. Genotypes give the major allele count.
    #[inline]
    fn value(&self, t: usize) -> f64 {
        match self {
            SiteCovariate::Genotype(calls) => calls.major_count(t),
            SiteCovariate::ReferenceProbability(p) => p[t] as f64,
        }
    }

    fn select(&self, taxa: &[usize]) -> Self {
        match self {
            SiteCovariate::Genotype(calls) => SiteCovariate::Genotype(calls.select(taxa)),
            SiteCovariate::ReferenceProbability(p) => {
                SiteCovariate::ReferenceProbability(taxa.iter().map(|&t| p[t]).collect())
            }
        }
    }
}

impl From<SiteCalls> for SiteCovariate {
    fn from(calls: SiteCalls) -> Self {
        SiteCovariate::Genotype(calls)
    }
}

fn undefined_score() -> f64 {
    f64::NAN
}

/// A candidate site for inclusion in the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditiveSite {
    index: usize,
    chrom: String,
    position: u64,
    name: String,
    criterion: Criterion,
    #[serde(skip, default = "undefined_score")]
    score: f64,
    covariate: SiteCovariate,
    /// Analysis row -> stored taxon, once reindexed.
    taxa_index: Option<Vec<usize>>,
}

impl AdditiveSite {
    pub fn new(
        index: usize,
        chrom: impl Into<String>,
        position: u64,
        name: impl Into<String>,
        criterion: Criterion,
        covariate: SiteCovariate,
    ) -> Self {
        Self {
            index,
            chrom: chrom.into(),
            position,
            name: name.into(),
            criterion,
            score: f64::NAN,
            covariate,
            taxa_index: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn chromosome(&self) -> &str {
        &self.chrom
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    pub fn set_criterion(&mut self, criterion: Criterion) {
        self.criterion = criterion;
    }

    /// Most recent score under this site's criterion (NaN if never scored).
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn set_score(&mut self, value: f64) {
        self.score = value;
    }

    /// Number of analysis rows this site supplies values for.
    pub fn n_rows(&self) -> usize {
        match &self.taxa_index {
            Some(idx) => idx.len(),
            None => self.covariate.n_taxa(),
        }
    }

    /// Additive covariate for every analysis row.
    pub fn covariate(&self) -> Vec<f64> {
        match &self.taxa_index {
            Some(idx) => idx.iter().map(|&t| self.covariate.value(t)).collect(),
            None => (0..self.covariate.n_taxa())
                .map(|t| self.covariate.value(t))
                .collect(),
        }
    }

    /// Additive covariate for the given analysis rows, in that order.
    pub fn covariate_subset(&self, rows: &[usize]) -> Vec<f64> {
        rows.iter()
            .map(|&r| {
                let t = match &self.taxa_index {
                    Some(idx) => idx[r],
                    None => r,
                };
                self.covariate.value(t)
            })
            .collect()
    }

    /// Restrict stored data to `unique_taxa` and map analysis rows onto it.
    ///
    /// `unique_taxa` are rows of this site as it currently stands, so a site
    /// that was reindexed before is resolved through its existing row map.
    /// `taxa_index[i]` is the position in `unique_taxa` of new row i.
    pub fn reindex_taxa(&mut self, taxa_index: Vec<usize>, unique_taxa: &[usize]) {
        let stored: Vec<usize> = match &self.taxa_index {
            Some(old) => unique_taxa.iter().map(|&r| old[r]).collect(),
            None => unique_taxa.to_vec(),
        };
        self.covariate = self.covariate.select(&stored);
        self.taxa_index = Some(taxa_index);
    }

    /// Compare scores so that `Greater` means self is preferred.
    pub fn compare(&self, other: &AdditiveSite) -> Ordering {
        self.criterion.compare(self.score, other.score)
    }

    /// Whether the backing data are discrete calls.
    pub fn is_genotype(&self) -> bool {
        matches!(self.covariate, SiteCovariate::Genotype(_))
    }
}

/// Build one site per table site, from calls when offered, else probabilities.
pub fn build_site_list(table: &dyn GenotypeTable, criterion: Criterion) -> Result<Vec<AdditiveSite>> {
    let use_calls = if table.has_genotype() {
        true
    } else if table.has_reference_probability() {
        false
    } else {
        bail!("Input has neither genotype nor reference probability.");
    };

    let start = std::time::Instant::now();
    let sites = (0..table.n_sites())
        .into_par_iter()
        .map(|s| -> Result<AdditiveSite> {
            let info = table
                .marker_info(s)
                .with_context(|| format!("Failed to read site {}", s))?;
            let covariate = if use_calls {
                SiteCovariate::from(table.genotype_calls(s)?)
            } else {
                SiteCovariate::ReferenceProbability(table.reference_probability(s)?)
            };
            Ok(AdditiveSite::new(
                s, info.chrom, info.pos, info.id, criterion, covariate,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Site list created with {} sites ({}) in {:.1?}",
        sites.len(),
        if use_calls { "genotype calls" } else { "reference probabilities" },
        start.elapsed()
    );
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgwas_geno::memory::InMemoryGenotypeTable;
    use stepgwas_geno::MarkerInfo;

    fn marker(i: usize) -> MarkerInfo {
        MarkerInfo {
            chrom: "1".into(),
            pos: 10 * i as u64,
            id: format!("s{}", i),
            major_allele: "A".into(),
            minor_allele: "C".into(),
        }
    }

    fn scored(criterion: Criterion, score: f64) -> AdditiveSite {
        let mut site = AdditiveSite::new(
            0,
            "1",
            1,
            "x",
            criterion,
            SiteCovariate::ReferenceProbability(vec![0.5]),
        );
        site.set_score(score);
        site
    }

    #[test]
    fn test_pval_prefers_larger_neg_log10() {
        // p = 1e-8 vs p = 1e-3
        let strong = scored(Criterion::Pval, 8.0);
        let weak = scored(Criterion::Pval, 3.0);
        assert_eq!(strong.compare(&weak), Ordering::Greater);
        assert_eq!(weak.compare(&strong), Ordering::Less);
    }

    #[test]
    fn test_information_criteria_prefer_smaller_values() {
        for c in [Criterion::Aic, Criterion::Bic, Criterion::Mbic] {
            let good = scored(c, 100.0);
            let bad = scored(c, 120.0);
            assert_eq!(good.compare(&bad), Ordering::Greater, "{}", c);
            assert_eq!(bad.compare(&good), Ordering::Less, "{}", c);
        }
    }

    #[test]
    fn test_undefined_score_never_preferred() {
        for c in [Criterion::Pval, Criterion::Aic] {
            let undefined = scored(c, f64::NAN);
            let defined = scored(c, 1e6);
            assert_eq!(undefined.compare(&defined), Ordering::Less);
        }
    }

    #[test]
    fn test_criterion_parsing() {
        assert_eq!("MBIC".parse::<Criterion>().unwrap(), Criterion::Mbic);
        assert!("foo".parse::<Criterion>().is_err());
    }

    #[test]
    fn test_genotype_covariate_and_reindex() {
        let calls = SiteCalls::from_major_counts(&[2.0, 1.0, 0.0, f64::NAN]);
        let mut site = AdditiveSite::new(0, "1", 5, "s0", Criterion::Pval, calls.into());
        assert_eq!(site.covariate(), vec![2.0, 1.0, 0.0, 1.0]);

        // rows use stored taxa 3, 0, 3 -> compacted to [0, 3]
        site.reindex_taxa(vec![1, 0, 1], &[0, 3]);
        assert_eq!(site.n_rows(), 3);
        assert_eq!(site.covariate(), vec![1.0, 2.0, 1.0]);
        assert_eq!(site.covariate_subset(&[1]), vec![2.0]);
    }

    #[test]
    fn test_second_reindex_resolves_through_first() {
        let mut site = AdditiveSite::new(
            0,
            "1",
            5,
            "s0",
            Criterion::Pval,
            SiteCovariate::ReferenceProbability(vec![0.1, 0.2, 0.3, 0.4]),
        );
        // rows [d, c] -> stored [2, 3]
        site.reindex_taxa(vec![1, 0], &[2, 3]);
        assert_eq!(site.covariate(), vec![0.4 as f32 as f64, 0.3 as f32 as f64]);

        // rows [c, d, c] over the current rows [d, c]
        site.reindex_taxa(vec![1, 0, 1], &[0, 1]);
        assert_eq!(
            site.covariate(),
            vec![0.3 as f32 as f64, 0.4 as f32 as f64, 0.3 as f32 as f64]
        );

        // a single row d, from a site whose current rows repeat c
        site.reindex_taxa(vec![0], &[1]);
        assert_eq!(site.n_rows(), 1);
        assert_eq!(site.covariate(), vec![0.4 as f32 as f64]);
    }

    #[test]
    fn test_genotype_value_matches_calls() {
        let calls = SiteCalls::from_major_counts(&[0.0, 1.0, f64::NAN]);
        let site = AdditiveSite::new(0, "1", 5, "s0", Criterion::Pval, calls.clone().into());
        let expected: Vec<f64> = (0..3).map(|i| calls.major_count(i)).collect();
        assert_eq!(site.covariate(), expected);
    }

    #[test]
    fn test_build_requires_calls_or_probabilities() {
        let taxa = vec!["a".to_string(), "b".to_string()];
        let empty = InMemoryGenotypeTable::metadata_only(taxa.clone(), vec![marker(0)]);
        let err = build_site_list(&empty, Criterion::Pval).unwrap_err();
        assert!(err.to_string().contains("neither genotype nor reference probability"));

        let probs =
            InMemoryGenotypeTable::from_probabilities(taxa, vec![marker(0)], vec![vec![0.25, 0.75]])
                .unwrap();
        let sites = build_site_list(&probs, Criterion::Bic).unwrap();
        assert_eq!(sites.len(), 1);
        assert!(!sites[0].is_genotype());
        assert_eq!(sites[0].criterion(), Criterion::Bic);
        assert_eq!(sites[0].covariate(), vec![0.25, 0.75]);
    }
}
