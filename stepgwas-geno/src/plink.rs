//! PLINK bed/bim/fam reader using memory-mapped files.
//!
//! PLINK binary format consists of three files:
//! - .bed: Binary genotype data (2 bits per genotype, packed)
//! - .bim: Variant information (chrom, id, cm, pos, a1, a2)
//! - .fam: Sample information (fid, iid, father, mother, sex, pheno)
//!
//! Calls are returned relative to the major allele, which is whichever of
//! a1/a2 is more frequent among called taxa at that site.
//!
//! Reference: https://www.cog-genomics.org/plink/1.9/formats#bed

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use crate::traits::{GenotypeTable, MarkerInfo, SiteCalls};

/// PLINK BIM file entry (one per variant).
#[derive(Debug, Clone)]
pub struct BimEntry {
    pub chrom: String,
    pub id: String,
    pub cm: f64,
    pub pos: u64,
    pub allele1: String,
    pub allele2: String,
}

/// PLINK FAM file entry (one per sample).
#[derive(Debug, Clone)]
pub struct FamEntry {
    pub fid: String,
    pub iid: String,
}

/// Reader for PLINK bed/bim/fam files.
pub struct PlinkReader {
    /// Memory-mapped .bed file.
    mmap: Mmap,
    /// Variant information from .bim file.
    bim: Vec<BimEntry>,
    /// Sample information from .fam file.
    fam: Vec<FamEntry>,
    /// Number of bytes per marker in the bed file.
    bytes_per_marker: usize,
    /// Taxa names (IID).
    taxa: Vec<String>,
    base_path: PathBuf,
}

impl PlinkReader {
    /// Open PLINK files from a base path (without extension).
    /// Will look for .bed, .bim, .fam files.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base = base_path.as_ref();
        let bed_path = base.with_extension("bed");
        let bim_path = base.with_extension("bim");
        let fam_path = base.with_extension("fam");

        let fam = Self::parse_fam(&fam_path)?;
        let n_samples = fam.len();
        let bim = Self::parse_bim(&bim_path)?;

        let bed_file = std::fs::File::open(&bed_path)
            .with_context(|| format!("Failed to open bed file: {}", bed_path.display()))?;
        let mmap = unsafe { Mmap::map(&bed_file)? };

        if mmap.len() < 3 {
            bail!("Bed file too small");
        }
        if mmap[0] != 0x6C || mmap[1] != 0x1B {
            bail!("Invalid PLINK bed file magic number");
        }
        if mmap[2] != 0x01 {
            bail!("Only SNP-major bed files are supported (mode byte = 0x01)");
        }

        let bytes_per_marker = n_samples.div_ceil(4);
        let expected_size = 3 + bytes_per_marker * bim.len();
        if mmap.len() < expected_size {
            bail!(
                "Bed file too small: expected at least {} bytes, got {}",
                expected_size,
                mmap.len()
            );
        }

        let taxa: Vec<String> = fam.iter().map(|f| f.iid.clone()).collect();
        tracing::debug!(
            "Opened {}: {} taxa, {} sites",
            base.display(),
            taxa.len(),
            bim.len()
        );

        Ok(Self {
            mmap,
            bim,
            fam,
            bytes_per_marker,
            taxa,
            base_path: base.to_path_buf(),
        })
    }

    fn parse_fam(path: &Path) -> Result<Vec<FamEntry>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fam file: {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                bail!("Fam file line {} has fewer than 6 fields", line_num + 1);
            }
            entries.push(FamEntry {
                fid: fields[0].to_string(),
                iid: fields[1].to_string(),
            });
        }
        Ok(entries)
    }

    fn parse_bim(path: &Path) -> Result<Vec<BimEntry>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bim file: {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                bail!("Bim file line {} has fewer than 6 fields", line_num + 1);
            }
            let pos = fields[3].parse().with_context(|| {
                format!("Bim file line {}: bad position '{}'", line_num + 1, fields[3])
            })?;
            entries.push(BimEntry {
                chrom: fields[0].to_string(),
                id: fields[1].to_string(),
                cm: fields[2].parse().unwrap_or(0.0),
                pos,
                allele1: fields[4].to_string(),
                allele2: fields[5].to_string(),
            });
        }
        Ok(entries)
    }

    /// Decode a single genotype from the bed file.
    /// Returns the count of allele1: 0, 1, 2, or NaN for missing.
    #[inline]
    fn decode_genotype(byte: u8, offset: usize) -> f64 {
        let bits = (byte >> (offset * 2)) & 0x03;
        match bits {
            0b00 => 2.0,
            0b01 => f64::NAN,
            0b10 => 1.0,
            _ => 0.0,
        }
    }

    /// Allele1 counts for every taxon at a site.
    fn read_allele1_counts(&self, site: usize) -> Result<Vec<f64>> {
        if site >= self.bim.len() {
            bail!("Site index {} out of range ({})", site, self.bim.len());
        }
        let offset = 3 + site * self.bytes_per_marker;
        Ok((0..self.taxa.len())
            .map(|i| Self::decode_genotype(self.mmap[offset + i / 4], i % 4))
            .collect())
    }

    /// Whether allele1 is the major allele at this site (ties favour allele1).
    fn allele1_is_major(counts: &[f64]) -> bool {
        let (sum, called) = counts
            .iter()
            .filter(|c| !c.is_nan())
            .fold((0.0, 0usize), |(s, n), &c| (s + c, n + 1));
        called == 0 || sum >= called as f64
    }

    pub fn fam(&self) -> &[FamEntry] {
        &self.fam
    }

    pub fn bim(&self) -> &[BimEntry] {
        &self.bim
    }
}

impl GenotypeTable for PlinkReader {
    fn n_sites(&self) -> usize {
        self.bim.len()
    }

    fn n_taxa(&self) -> usize {
        self.taxa.len()
    }

    fn taxa_names(&self) -> &[String] {
        &self.taxa
    }

    fn marker_info(&self, site: usize) -> Result<MarkerInfo> {
        let counts = self.read_allele1_counts(site)?;
        let bim = &self.bim[site];
        let (major, minor) = if Self::allele1_is_major(&counts) {
            (&bim.allele1, &bim.allele2)
        } else {
            (&bim.allele2, &bim.allele1)
        };
        Ok(MarkerInfo {
            chrom: bim.chrom.clone(),
            pos: bim.pos,
            id: bim.id.clone(),
            major_allele: major.clone(),
            minor_allele: minor.clone(),
        })
    }

    fn has_genotype(&self) -> bool {
        true
    }

    fn has_reference_probability(&self) -> bool {
        false
    }

    fn genotype_calls(&self, site: usize) -> Result<SiteCalls> {
        let mut counts = self.read_allele1_counts(site)?;
        if !Self::allele1_is_major(&counts) {
            for c in counts.iter_mut() {
                *c = 2.0 - *c;
            }
        }
        Ok(SiteCalls::from_major_counts(&counts))
    }

    fn reference_probability(&self, _site: usize) -> Result<Vec<f32>> {
        bail!(
            "PLINK file {} carries hard calls only, no reference probabilities",
            self.base_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decode_genotype_offsets() {
        let byte: u8 = 0b11_10_01_00;
        assert_eq!(PlinkReader::decode_genotype(byte, 0), 2.0);
        assert!(PlinkReader::decode_genotype(byte, 1).is_nan());
        assert_eq!(PlinkReader::decode_genotype(byte, 2), 1.0);
        assert_eq!(PlinkReader::decode_genotype(byte, 3), 0.0);
    }

    #[test]
    fn test_read_small_fileset() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("toy");

        let mut fam = std::fs::File::create(base.with_extension("fam")).unwrap();
        for i in 0..4 {
            writeln!(fam, "F{i} T{i} 0 0 1 -9").unwrap();
        }
        let mut bim = std::fs::File::create(base.with_extension("bim")).unwrap();
        writeln!(bim, "1 s0 0 100 A G").unwrap();
        writeln!(bim, "1 s1 0 200 C T").unwrap();

        // site 0: a1 counts [2, missing, 1, 0]; site 1: a1 counts [0, 0, 0, 1]
        let bed = [0x6C, 0x1B, 0x01, 0b11_10_01_00, 0b10_11_11_11];
        std::fs::write(base.with_extension("bed"), bed).unwrap();

        let reader = PlinkReader::new(&base).unwrap();
        assert_eq!(reader.n_taxa(), 4);
        assert_eq!(reader.n_sites(), 2);
        assert_eq!(reader.taxa_names()[3], "T3");

        // site 0: a1 is major (3 of 6 called alleles)
        let info = reader.marker_info(0).unwrap();
        assert_eq!(info.major_allele, "A");
        let calls = reader.genotype_calls(0).unwrap();
        assert_eq!(calls.major_count(0), 2.0);
        assert_eq!(calls.major_count(2), 1.0);
        assert_eq!(calls.major_count(3), 0.0);
        assert!((calls.major_count(1) - 1.0).abs() < 1e-12);

        // site 1: a2 is major, counts flipped
        let info = reader.marker_info(1).unwrap();
        assert_eq!(info.major_allele, "T");
        let calls = reader.genotype_calls(1).unwrap();
        assert_eq!(calls.major_count(0), 2.0);
        assert_eq!(calls.major_count(3), 1.0);

        assert!(reader.reference_probability(0).is_err());
    }
}
