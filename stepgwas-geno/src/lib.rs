//! stepgwas-geno: Genotype and phenotype sources for stepgwas
//!
//! Provides a GenotypeTable trait with PLINK bed/bim/fam and in-memory
//! implementations, a phenotype file parser, and taxa matching helpers.

pub mod memory;
pub mod phenotype;
pub mod plink;
pub mod sample;
pub mod traits;

pub use traits::{GenotypeTable, MarkerInfo, SiteCalls};
