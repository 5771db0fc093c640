//! Forward selection for every trait of a phenotype file.
//!
//! stepgwas fit (--plink-file ... | --site-store ...) --pheno-file ... --output-prefix ...

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;
use tracing::{info, warn};

use stepgwas_core::report::{self, ChromosomeResiduals, FittedVariantRecord, IntervalRecord, MarkerEffect, StepRecord};
use stepgwas_core::site::build_site_list;
use stepgwas_core::store::{load_site_store, reindex_sites, LoadedSites};
use stepgwas_core::{Criterion, ForwardSelection, Model, SelectionConfig, SweepKernel, TraitData};
use stepgwas_geno::phenotype::{parse_phenotype_file, PhenotypeColumns, PhenotypeTable};
use stepgwas_geno::plink::PlinkReader;
use stepgwas_geno::GenotypeTable;

#[derive(Args)]
pub struct FitArgs {
    /// PLINK file prefix (bed/bim/fam)
    #[arg(long, conflicts_with = "site_store", required_unless_present = "site_store")]
    plink_file: Option<String>,

    /// Site store prefix written by store-sites
    #[arg(long)]
    site_store: Option<String>,

    /// Phenotype file path
    #[arg(long)]
    pheno_file: String,

    /// Taxa column name
    #[arg(long, default_value = "Taxa")]
    taxa_col: String,

    /// Trait column names (comma-separated; default: every other column)
    #[arg(long, default_value = "")]
    trait_cols: String,

    /// Factor column names (comma-separated)
    #[arg(long, default_value = "")]
    factor_cols: String,

    /// Covariate column names (comma-separated)
    #[arg(long, default_value = "")]
    covar_cols: String,

    /// Selection criterion: pval, aic, bic or mbic
    #[arg(long, default_value = "pval")]
    criterion: String,

    /// p-value a site must reach to enter the model
    #[arg(long, default_value = "1e-5")]
    enter_limit: f64,

    /// Maximum number of sites per trait
    #[arg(long, default_value = "100")]
    max_variants: usize,

    /// Fit additive + dominance site terms
    #[arg(long, default_value = "false")]
    dominance: bool,

    /// Minimum heterozygote count for a dominance column
    #[arg(long, default_value = "20")]
    min_hets: usize,

    /// Use 0/1 heterozygote indicators instead of imputed dominance values
    #[arg(long, default_value = "false")]
    no_impute_dominance: bool,

    /// Number of permutations for the entry threshold (0 = no permutation test)
    #[arg(long, default_value = "0")]
    permutations: usize,

    /// Alpha for the permutation threshold
    #[arg(long, default_value = "0.05")]
    permutation_alpha: f64,

    /// Scan support intervals around the selected sites
    #[arg(long, default_value = "false")]
    scan_intervals: bool,

    /// Alpha bounding the support intervals
    #[arg(long, default_value = "0.05")]
    interval_alpha: f64,

    /// Write residuals of models without each chromosome's sites
    #[arg(long, default_value = "false")]
    chromosome_residuals: bool,

    /// Number of resampling refits per trait
    #[arg(long, default_value = "0")]
    resamples: usize,

    /// Fraction of observations in each resample
    #[arg(long, default_value = "0.8")]
    resample_fraction: f64,

    /// Random seed
    #[arg(long, default_value = "12345")]
    seed: u64,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix, suffix))
}

impl FitArgs {
    fn selection_config(&self, threads: usize) -> Result<SelectionConfig> {
        let defaults = SelectionConfig::default();
        let config = SelectionConfig {
            enter_limit: self.enter_limit,
            exit_limit: 2.0 * self.enter_limit,
            max_variants: self.max_variants,
            criterion: self.criterion.parse::<Criterion>()?,
            dominance: self.dominance,
            min_hets: self.min_hets,
            impute_dominance: !self.no_impute_dominance,
            permutation_test: self.permutations > 0,
            permutations: if self.permutations > 0 {
                self.permutations
            } else {
                defaults.permutations
            },
            permutation_alpha: self.permutation_alpha,
            scan_intervals: self.scan_intervals,
            interval_alpha: self.interval_alpha,
            chromosome_residuals: self.chromosome_residuals,
            resamples: self.resamples,
            resample_fraction: self.resample_fraction,
            max_threads: threads,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Everything collected over all traits.
#[derive(Default)]
struct Reports {
    effects: Vec<MarkerEffect>,
    rescanned_effects: Vec<MarkerEffect>,
    intervals: Vec<IntervalRecord>,
    permutations: Vec<(String, Vec<f64>)>,
    residuals: Vec<ChromosomeResiduals>,
}

fn load_sites(args: &FitArgs, pheno: &PhenotypeTable, criterion: Criterion) -> Result<LoadedSites> {
    if let Some(prefix) = &args.site_store {
        info!("Site store: {}", prefix);
        return load_site_store(Path::new(prefix), &pheno.taxa);
    }
    let Some(plink_file) = &args.plink_file else {
        bail!("Either --plink-file or --site-store is required");
    };
    info!("PLINK file: {}", plink_file);
    let reader = PlinkReader::new(plink_file)?;
    info!(
        "Loaded {} sites x {} taxa from PLINK files",
        reader.n_sites(),
        reader.n_taxa()
    );
    let sites = build_site_list(&reader, criterion)?;
    reindex_sites(sites, reader.taxa_names(), &pheno.taxa)
}

pub fn run(args: FitArgs, threads: usize) -> Result<()> {
    let config = args.selection_config(threads)?;

    info!("=== stepgwas: forward selection ===");
    info!("Phenotype file: {}", args.pheno_file);
    info!("Criterion: {}", config.criterion);

    let columns = PhenotypeColumns {
        taxa_col: args.taxa_col.clone(),
        trait_cols: split_list(&args.trait_cols),
        factor_cols: split_list(&args.factor_cols),
        covar_cols: split_list(&args.covar_cols),
    };
    let pheno = parse_phenotype_file(Path::new(&args.pheno_file), &columns)?;
    info!(
        "Loaded {} traits for {} taxa ({} factors, {} covariates)",
        pheno.traits.len(),
        pheno.taxa.len(),
        pheno.factors.len(),
        pheno.covariates.len()
    );
    if pheno.traits.is_empty() {
        bail!("No trait columns in {}", args.pheno_file);
    }

    let loaded = load_sites(&args, &pheno, config.criterion)?;
    info!(
        "{} sites; {} phenotype rows have genotypes",
        loaded.sites.len(),
        loaded.phenotype_rows.len()
    );

    let mut selection = ForwardSelection::new(loaded.sites, config.clone(), SweepKernel)?;
    let mut reports = Reports::default();

    for t in 0..pheno.traits.len() {
        let name = pheno.traits[t].name.clone();
        let complete = pheno.complete_rows(t);
        let mut complete_mask = vec![false; pheno.taxa.len()];
        for &r in &complete {
            complete_mask[r] = true;
        }

        // site row i holds phenotype row loaded.phenotype_rows[i]
        let (site_rows, pheno_rows): (Vec<usize>, Vec<usize>) = loaded
            .phenotype_rows
            .iter()
            .enumerate()
            .filter(|&(_, &r)| complete_mask[r])
            .map(|(i, &r)| (i, r))
            .unzip();
        if pheno_rows.len() < 2 {
            warn!("Trait {}: only {} complete observations, skipping", name, pheno_rows.len());
            continue;
        }
        info!("Trait {}: {} observations", name, pheno_rows.len());

        let y: Vec<f64> = pheno_rows.iter().map(|&r| pheno.traits[t].values[r]).collect();
        let taxa: Vec<String> = pheno_rows.iter().map(|&r| pheno.taxa[r].clone()).collect();
        selection.reset_model(TraitData {
            name: name.clone(),
            y,
            base: Model::from_phenotype(&pheno, &pheno_rows),
            rows: Some(site_rows),
        })?;

        if config.permutation_test {
            let result = selection.run_permutation_test()?;
            reports.permutations.push((name.clone(), result.min_p.clone()));
        }

        let outcome = selection.fit_model();
        info!("Trait {}: selection ended ({:?})", name, outcome);
        reports.effects.extend(selection.marker_effects()?);

        if config.scan_intervals {
            let scan = selection.scan_intervals()?;
            reports.intervals.extend(selection.interval_records(&scan.scanned));
            reports.rescanned_effects.extend(selection.marker_effects_of(&scan.model)?);
        }
        if config.chromosome_residuals {
            reports.residuals.extend(selection.chromosome_residuals(&taxa)?);
        }
        if config.resamples > 0 {
            selection.run_resampling();
        }
    }

    write_reports(&args.output_prefix, &selection, &reports)?;
    let config_path = output_path(&args.output_prefix, "_config.json");
    config.save_json(&config_path)?;
    info!("Configuration written to {}", config_path.display());
    Ok(())
}

fn write_table<T>(
    path: &Path,
    rows: &[T],
    header: impl Fn(&mut BufWriter<File>) -> Result<()>,
    line: impl Fn(&mut BufWriter<File>, &T) -> Result<()>,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    header(&mut writer)?;
    for row in rows {
        line(&mut writer, row)?;
    }
    writer.flush()?;
    info!("Results written to {}", path.display());
    Ok(())
}

fn write_reports(
    prefix: &str,
    selection: &ForwardSelection<SweepKernel>,
    reports: &Reports,
) -> Result<()> {
    let fitted: &[FittedVariantRecord] = selection.fitted_variants();
    write_table(
        &output_path(prefix, "_fitted.txt"),
        fitted,
        |w| report::write_fitted_header(w),
        |w, r| report::write_fitted_line(w, r),
    )?;
    let steps: &[StepRecord] = selection.steps();
    write_table(
        &output_path(prefix, "_steps.txt"),
        steps,
        |w| report::write_steps_header(w),
        |w, r| report::write_steps_line(w, r),
    )?;
    write_table(
        &output_path(prefix, "_effects.txt"),
        &reports.effects,
        |w| report::write_effects_header(w),
        |w, r| report::write_effects_line(w, r),
    )?;

    if selection.config().scan_intervals {
        write_table(
            &output_path(prefix, "_intervals.txt"),
            &reports.intervals,
            |w| report::write_intervals_header(w),
            |w, r| report::write_intervals_line(w, r),
        )?;
        write_table(
            &output_path(prefix, "_effects_rescanned.txt"),
            &reports.rescanned_effects,
            |w| report::write_effects_header(w),
            |w, r| report::write_effects_line(w, r),
        )?;
    }

    if selection.config().permutation_test {
        write_table(
            &output_path(prefix, "_permutations.txt"),
            &reports.permutations,
            |w| report::write_permutation_header(w),
            |w, (name, min_p)| report::write_permutation_lines(w, name, min_p),
        )?;
    }

    for r in &reports.residuals {
        let path = output_path(prefix, &format!("_residuals_{}_{}.txt", r.trait_name, r.chrom));
        report::write_residuals(&path, r)?;
    }
    Ok(())
}
