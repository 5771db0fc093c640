//! In-memory genotype table.
//!
//! Holds calls and/or probabilities for every site. Used for small data sets,
//! for tables assembled by other readers, and throughout the tests.

use anyhow::{bail, Result};

use crate::traits::{GenotypeTable, MarkerInfo, SiteCalls};

#[derive(Debug, Clone)]
pub struct InMemoryGenotypeTable {
    taxa: Vec<String>,
    markers: Vec<MarkerInfo>,
    calls: Option<Vec<SiteCalls>>,
    probabilities: Option<Vec<Vec<f32>>>,
}

impl InMemoryGenotypeTable {
    /// Table from per-site major allele counts (NaN for missing).
    pub fn from_major_counts(
        taxa: Vec<String>,
        markers: Vec<MarkerInfo>,
        counts: &[Vec<f64>],
    ) -> Result<Self> {
        check_shape(&taxa, &markers, counts.iter().map(|c| c.len()), counts.len())?;
        let calls = counts.iter().map(|c| SiteCalls::from_major_counts(c)).collect();
        Ok(Self {
            taxa,
            markers,
            calls: Some(calls),
            probabilities: None,
        })
    }

    /// Table from per-site reference-allele probabilities.
    pub fn from_probabilities(
        taxa: Vec<String>,
        markers: Vec<MarkerInfo>,
        probabilities: Vec<Vec<f32>>,
    ) -> Result<Self> {
        check_shape(
            &taxa,
            &markers,
            probabilities.iter().map(|p| p.len()),
            probabilities.len(),
        )?;
        Ok(Self {
            taxa,
            markers,
            calls: None,
            probabilities: Some(probabilities),
        })
    }

    /// Table carrying metadata only, with neither calls nor probabilities.
    pub fn metadata_only(taxa: Vec<String>, markers: Vec<MarkerInfo>) -> Self {
        Self {
            taxa,
            markers,
            calls: None,
            probabilities: None,
        }
    }
}

fn check_shape(
    taxa: &[String],
    markers: &[MarkerInfo],
    lengths: impl Iterator<Item = usize>,
    n_sites: usize,
) -> Result<()> {
    if n_sites != markers.len() {
        bail!(
            "Genotype table has {} sites but {} marker records",
            n_sites,
            markers.len()
        );
    }
    for (site, len) in lengths.enumerate() {
        if len != taxa.len() {
            bail!(
                "Site {} has {} values, expected one per taxon ({})",
                site,
                len,
                taxa.len()
            );
        }
    }
    Ok(())
}

impl GenotypeTable for InMemoryGenotypeTable {
    fn n_sites(&self) -> usize {
        self.markers.len()
    }

    fn n_taxa(&self) -> usize {
        self.taxa.len()
    }

    fn taxa_names(&self) -> &[String] {
        &self.taxa
    }

    fn marker_info(&self, site: usize) -> Result<MarkerInfo> {
        match self.markers.get(site) {
            Some(m) => Ok(m.clone()),
            None => bail!("Site index {} out of range ({})", site, self.markers.len()),
        }
    }

    fn has_genotype(&self) -> bool {
        self.calls.is_some()
    }

    fn has_reference_probability(&self) -> bool {
        self.probabilities.is_some()
    }

    fn genotype_calls(&self, site: usize) -> Result<SiteCalls> {
        let Some(calls) = &self.calls else {
            bail!("Genotype table has no genotype calls");
        };
        match calls.get(site) {
            Some(c) => Ok(c.clone()),
            None => bail!("Site index {} out of range ({})", site, calls.len()),
        }
    }

    fn reference_probability(&self, site: usize) -> Result<Vec<f32>> {
        let Some(probs) = &self.probabilities else {
            bail!("Genotype table has no reference probabilities");
        };
        match probs.get(site) {
            Some(p) => Ok(p.clone()),
            None => bail!("Site index {} out of range ({})", site, probs.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(i: usize) -> MarkerInfo {
        MarkerInfo {
            chrom: "1".into(),
            pos: 100 * i as u64,
            id: format!("s{}", i),
            major_allele: "A".into(),
            minor_allele: "G".into(),
        }
    }

    #[test]
    fn test_shape_is_checked() {
        let taxa = vec!["t1".to_string(), "t2".to_string()];
        let bad = InMemoryGenotypeTable::from_major_counts(
            taxa.clone(),
            vec![marker(0)],
            &[vec![0.0, 1.0, 2.0]],
        );
        assert!(bad.is_err());

        let ok =
            InMemoryGenotypeTable::from_major_counts(taxa, vec![marker(0)], &[vec![0.0, 2.0]])
                .unwrap();
        assert!(ok.has_genotype());
        assert!(!ok.has_reference_probability());
        assert_eq!(ok.genotype_calls(0).unwrap().major_count(1), 2.0);
        assert!(ok.reference_probability(0).is_err());
    }
}
