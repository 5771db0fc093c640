//! Build the candidate site list once and store it.
//!
//! stepgwas store-sites --plink-file ... --output-prefix ...

use std::path::Path;

use anyhow::Result;
use clap::Args;
use tracing::info;

use stepgwas_core::site::build_site_list;
use stepgwas_core::store::write_site_store;
use stepgwas_core::Criterion;
use stepgwas_geno::plink::PlinkReader;
use stepgwas_geno::GenotypeTable;

#[derive(Args)]
pub struct StoreSitesArgs {
    /// PLINK file prefix (bed/bim/fam)
    #[arg(long)]
    plink_file: String,

    /// Output prefix; writes {prefix}_taxa.bin and {prefix}_sites.bin
    #[arg(long)]
    output_prefix: String,
}

pub fn run(args: StoreSitesArgs, threads: usize) -> Result<()> {
    let reader = PlinkReader::new(&args.plink_file)?;
    info!(
        "Loaded {} sites x {} taxa from PLINK files",
        reader.n_sites(),
        reader.n_taxa()
    );

    let sites = if threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        pool.install(|| build_site_list(&reader, Criterion::Pval))?
    } else {
        build_site_list(&reader, Criterion::Pval)?
    };

    write_site_store(Path::new(&args.output_prefix), reader.taxa_names(), &sites)?;
    info!("Site store written to {}_taxa.bin and {}_sites.bin", args.output_prefix, args.output_prefix);
    Ok(())
}
