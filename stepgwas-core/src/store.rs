//! Paired binary store of a candidate site list.
//!
//! `{prefix}_taxa.bin`: magic bytes (SGTX) + version + site count + taxa names.
//! `{prefix}_sites.bin`: magic bytes (SGST) + version + each site in sequence.
//! Both are bincode. Loading is all-or-nothing.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use stepgwas_geno::sample::{intersect_taxa, TaxaMap};

use crate::site::AdditiveSite;

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TaxaHeader {
    magic: [u8; 4],
    version: u32,
    n_sites: u64,
    taxa: Vec<String>,
}

impl TaxaHeader {
    const MAGIC: [u8; 4] = *b"SGTX";
}

#[derive(Debug, Serialize, Deserialize)]
struct SitesHeader {
    magic: [u8; 4],
    version: u32,
}

impl SitesHeader {
    const MAGIC: [u8; 4] = *b"SGST";
}

pub fn taxa_path(prefix: &Path) -> PathBuf {
    PathBuf::from(format!("{}_taxa.bin", prefix.display()))
}

pub fn sites_path(prefix: &Path) -> PathBuf {
    PathBuf::from(format!("{}_sites.bin", prefix.display()))
}

/// Write the site list and the taxa it is indexed by.
pub fn write_site_store(prefix: &Path, taxa: &[String], sites: &[AdditiveSite]) -> Result<()> {
    if let Some(bad) = sites.iter().find(|s| s.n_rows() != taxa.len()) {
        bail!(
            "Site {} has {} taxa, expected {}",
            bad.name(),
            bad.n_rows(),
            taxa.len()
        );
    }

    let path = taxa_path(prefix);
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let header = TaxaHeader {
        magic: TaxaHeader::MAGIC,
        version: STORE_VERSION,
        n_sites: sites.len() as u64,
        taxa: taxa.to_vec(),
    };
    bincode::serialize_into(&mut writer, &header)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer.flush()?;

    let path = sites_path(prefix);
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let header = SitesHeader {
        magic: SitesHeader::MAGIC,
        version: STORE_VERSION,
    };
    bincode::serialize_into(&mut writer, &header)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    for site in sites {
        bincode::serialize_into(&mut writer, site)
            .with_context(|| format!("Failed to write site {} to {}", site.name(), path.display()))?;
    }
    writer.flush()?;

    info!("Wrote {} sites over {} taxa to {}_*.bin", sites.len(), taxa.len(), prefix.display());
    Ok(())
}

/// Sites read from a store, restricted to the taxa shared with a phenotype.
#[derive(Debug)]
pub struct LoadedSites {
    /// Reindexed so that site row i is phenotype row `phenotype_rows[i]`.
    pub sites: Vec<AdditiveSite>,
    /// Phenotype rows whose taxon is in the store, in phenotype order.
    pub phenotype_rows: Vec<usize>,
    /// Taxa names of the kept rows.
    pub taxa: Vec<String>,
}

/// Read the stored taxa names and site count.
pub fn read_store_taxa(prefix: &Path) -> Result<(Vec<String>, usize)> {
    let path = taxa_path(prefix);
    let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let header: TaxaHeader = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("Failed to decode taxa list {}", path.display()))?;
    if header.magic != TaxaHeader::MAGIC {
        bail!(
            "Invalid taxa file {}: expected magic bytes {:?}, got {:?}",
            path.display(),
            TaxaHeader::MAGIC,
            header.magic
        );
    }
    if header.version != STORE_VERSION {
        bail!("Unsupported taxa file version {} in {}", header.version, path.display());
    }
    Ok((header.taxa, header.n_sites as usize))
}

/// Load a store and reindex every site onto the phenotype taxa it shares.
pub fn load_site_store(prefix: &Path, phenotype_taxa: &[String]) -> Result<LoadedSites> {
    let (store_taxa, n_sites) = read_store_taxa(prefix)?;

    let path = sites_path(prefix);
    let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let header: SitesHeader = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    if header.magic != SitesHeader::MAGIC {
        bail!(
            "Invalid site file {}: expected magic bytes {:?}, got {:?}",
            path.display(),
            SitesHeader::MAGIC,
            header.magic
        );
    }
    if header.version != STORE_VERSION {
        bail!("Unsupported site file version {} in {}", header.version, path.display());
    }

    let mut sites = Vec::with_capacity(n_sites);
    for i in 0..n_sites {
        let site: AdditiveSite = bincode::deserialize_from(&mut reader)
            .with_context(|| format!("Failed to decode site {} of {} in {}", i, n_sites, path.display()))?;
        if site.n_rows() != store_taxa.len() {
            bail!(
                "Site {} in {} has {} taxa, expected {}",
                site.name(),
                path.display(),
                site.n_rows(),
                store_taxa.len()
            );
        }
        sites.push(site);
    }

    let loaded = reindex_sites(sites, &store_taxa, phenotype_taxa)
        .with_context(|| format!("Failed to match {} to the phenotype taxa", taxa_path(prefix).display()))?;
    info!(
        "Loaded {} sites; {} of {} phenotype rows matched stored taxa",
        loaded.sites.len(),
        loaded.phenotype_rows.len(),
        phenotype_taxa.len()
    );
    Ok(loaded)
}

/// Restrict sites indexed by `site_taxa` to the taxa shared with the
/// phenotype, in phenotype row order.
pub fn reindex_sites(
    mut sites: Vec<AdditiveSite>,
    site_taxa: &[String],
    phenotype_taxa: &[String],
) -> Result<LoadedSites> {
    let shared = intersect_taxa(&[phenotype_taxa, site_taxa]);
    if shared.ids.is_empty() {
        bail!("No taxa shared between the phenotype and the sites");
    }
    let map = TaxaMap::from_row_taxa(&shared.indices[1]);
    for site in sites.iter_mut() {
        site.reindex_taxa(map.taxa_index.clone(), &map.unique_taxa);
    }
    Ok(LoadedSites {
        sites,
        phenotype_rows: shared.indices[0].clone(),
        taxa: shared.ids,
    })
}
