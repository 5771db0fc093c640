//! Core traits for genotype tables.

use anyhow::Result;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

/// Information about a genetic marker (site).
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerInfo {
    /// Chromosome (e.g. "1", "22", "X").
    pub chrom: String,
    /// Position in base pairs.
    pub pos: u64,
    /// Site name (e.g. rsID).
    pub id: String,
    /// Most frequent allele among called taxa.
    pub major_allele: String,
    /// Less frequent allele.
    pub minor_allele: String,
}

/// Discrete genotype calls for one site, one bit per taxon for each allele.
///
/// A heterozygote has both bits set; a missing call has neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCalls {
    pub major: BitVec<u64, Lsb0>,
    pub minor: BitVec<u64, Lsb0>,
    /// Major allele frequency over called taxa.
    pub major_freq: f64,
}

impl SiteCalls {
    /// Build calls from per-taxon major allele counts (0, 1, 2, NaN for missing).
    pub fn from_major_counts(counts: &[f64]) -> Self {
        let n = counts.len();
        let mut major = bitvec![u64, Lsb0; 0; n];
        let mut minor = bitvec![u64, Lsb0; 0; n];
        let mut sum = 0.0;
        let mut called = 0usize;
        for (i, &c) in counts.iter().enumerate() {
            if c.is_nan() {
                continue;
            }
            called += 1;
            sum += c;
            if c >= 0.5 {
                major.set(i, true);
            }
            if c <= 1.5 {
                minor.set(i, true);
            }
        }
        let major_freq = if called > 0 {
            sum / (2.0 * called as f64)
        } else {
            0.0
        };
        Self {
            major,
            minor,
            major_freq,
        }
    }

    /// Number of taxa.
    pub fn len(&self) -> usize {
        self.major.len()
    }

    pub fn is_empty(&self) -> bool {
        self.major.is_empty()
    }

    /// Major allele count for taxon `i`; missing calls get 2 x major frequency.
    #[inline]
    pub fn major_count(&self, i: usize) -> f64 {
        match (self.major[i], self.minor[i]) {
            (true, true) => 1.0,
            (true, false) => 2.0,
            (false, true) => 0.0,
            (false, false) => 2.0 * self.major_freq,
        }
    }

    /// Keep only the taxa at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut major = bitvec![u64, Lsb0; 0; indices.len()];
        let mut minor = bitvec![u64, Lsb0; 0; indices.len()];
        for (new, &old) in indices.iter().enumerate() {
            major.set(new, self.major[old]);
            minor.set(new, self.minor[old]);
        }
        Self {
            major,
            minor,
            major_freq: self.major_freq,
        }
    }
}

/// A source of per-site genotype data for a fixed list of taxa.
///
/// A table offers discrete calls, reference-allele probabilities, or both.
pub trait GenotypeTable: Send + Sync {
    /// Total number of sites.
    fn n_sites(&self) -> usize;

    /// Total number of taxa.
    fn n_taxa(&self) -> usize;

    /// Taxa names, in table order.
    fn taxa_names(&self) -> &[String];

    /// Site metadata.
    fn marker_info(&self, site: usize) -> Result<MarkerInfo>;

    /// Whether discrete genotype calls are available.
    fn has_genotype(&self) -> bool;

    /// Whether reference-allele probabilities are available.
    fn has_reference_probability(&self) -> bool;

    /// Genotype calls for one site.
    fn genotype_calls(&self, site: usize) -> Result<SiteCalls>;

    /// Reference-allele probability per taxon for one site.
    fn reference_probability(&self, site: usize) -> Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_counts_round_trip_through_bits() {
        let calls = SiteCalls::from_major_counts(&[2.0, 1.0, 0.0, f64::NAN]);
        assert_eq!(calls.major_count(0), 2.0);
        assert_eq!(calls.major_count(1), 1.0);
        assert_eq!(calls.major_count(2), 0.0);
        // missing: 2 * (3 / 6)
        assert!((calls.major_count(3) - 1.0).abs() < 1e-12);
        assert!((calls.major_freq - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_select_compacts_taxa() {
        let calls = SiteCalls::from_major_counts(&[2.0, 1.0, 0.0]);
        let sub = calls.select(&[2, 0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.major_count(0), 0.0);
        assert_eq!(sub.major_count(1), 2.0);
    }
}
