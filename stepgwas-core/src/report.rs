//! Result records and their tab-delimited writers.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// One selected site, in the order sites entered the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedVariantRecord {
    pub trait_name: String,
    /// 0 for the full data, 1.. for resampling refits.
    pub iteration: usize,
    pub step: usize,
    pub site_name: String,
    pub chrom: String,
    pub position: u64,
    pub p: f64,
    pub neg_log10_p: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Add,
    Stop,
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepAction::Add => "add",
            StepAction::Stop => "stop",
        })
    }
}

/// One round of forward selection, committed or not.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub trait_name: String,
    pub iteration: usize,
    pub site_name: String,
    pub chrom: String,
    pub position: u64,
    pub action: StepAction,
    pub df: f64,
    pub ss: f64,
    pub error_df: f64,
    pub error_ss: f64,
    pub f: f64,
    pub p: f64,
    /// Information criterion of the model with the site (NaN in p-value mode).
    pub criterion_value: f64,
}

/// Estimated effects of one selected site.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerEffect {
    pub trait_name: String,
    pub site_name: String,
    pub chrom: String,
    pub position: u64,
    pub additive: f64,
    pub dominance: Option<f64>,
}

/// Support interval of one selected site.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRecord {
    pub trait_name: String,
    pub site_name: String,
    pub chrom: String,
    pub position: u64,
    pub lower_name: String,
    pub lower_position: u64,
    pub upper_name: String,
    pub upper_position: u64,
}

/// Residuals of a model fitted without one chromosome's selected sites.
#[derive(Debug, Clone, PartialEq)]
pub struct ChromosomeResiduals {
    pub trait_name: String,
    pub chrom: String,
    pub taxa: Vec<String>,
    pub residuals: Vec<f64>,
}

fn na(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{}", v)
    }
}

pub fn write_fitted_header(writer: &mut impl Write) -> Result<()> {
    writeln!(
        writer,
        "Trait\tIteration\tStep\tSiteID\tChr\tPosition\tp-value\t-log10p"
    )?;
    Ok(())
}

pub fn write_fitted_line(writer: &mut impl Write, r: &FittedVariantRecord) -> Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        r.trait_name,
        r.iteration,
        r.step,
        r.site_name,
        r.chrom,
        r.position,
        na(r.p),
        na(r.neg_log10_p)
    )?;
    Ok(())
}

pub fn write_steps_header(writer: &mut impl Write) -> Result<()> {
    writeln!(
        writer,
        "Trait\tIteration\tSiteID\tChr\tPosition\tAction\tdf\tSS\terrorDf\terrorSS\tF\tp-value\tCriterion"
    )?;
    Ok(())
}

pub fn write_steps_line(writer: &mut impl Write, r: &StepRecord) -> Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        r.trait_name,
        r.iteration,
        r.site_name,
        r.chrom,
        r.position,
        r.action,
        r.df,
        na(r.ss),
        r.error_df,
        na(r.error_ss),
        na(r.f),
        na(r.p),
        na(r.criterion_value)
    )?;
    Ok(())
}

pub fn write_effects_header(writer: &mut impl Write) -> Result<()> {
    writeln!(writer, "Trait\tSiteID\tChr\tPosition\tAdditive\tDominance")?;
    Ok(())
}

pub fn write_effects_line(writer: &mut impl Write, r: &MarkerEffect) -> Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}",
        r.trait_name,
        r.site_name,
        r.chrom,
        r.position,
        r.additive,
        r.dominance.map_or("NA".to_string(), |d| d.to_string())
    )?;
    Ok(())
}

pub fn write_intervals_header(writer: &mut impl Write) -> Result<()> {
    writeln!(
        writer,
        "Trait\tSiteID\tChr\tPosition\tLeftSite\tLeftPosition\tRightSite\tRightPosition"
    )?;
    Ok(())
}

pub fn write_intervals_line(writer: &mut impl Write, r: &IntervalRecord) -> Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        r.trait_name,
        r.site_name,
        r.chrom,
        r.position,
        r.lower_name,
        r.lower_position,
        r.upper_name,
        r.upper_position
    )?;
    Ok(())
}

pub fn write_permutation_header(writer: &mut impl Write) -> Result<()> {
    writeln!(writer, "Trait\tp-value")?;
    Ok(())
}

pub fn write_permutation_lines(writer: &mut impl Write, trait_name: &str, min_p: &[f64]) -> Result<()> {
    for p in min_p {
        writeln!(writer, "{}\t{}", trait_name, p)?;
    }
    Ok(())
}

/// Write residuals as a taxa-by-(trait, chromosome) table, one file per set.
pub fn write_residuals(path: &Path, r: &ChromosomeResiduals) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    writeln!(writer, "Taxa\t{}_{}", r.trait_name, r.chrom)?;
    for (taxon, e) in r.taxa.iter().zip(&r.residuals) {
        writeln!(writer, "{}\t{}", taxon, e)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effects_line_writes_na_for_missing_dominance() {
        let mut buf = Vec::new();
        write_effects_header(&mut buf).unwrap();
        write_effects_line(
            &mut buf,
            &MarkerEffect {
                trait_name: "height".into(),
                site_name: "s1".into(),
                chrom: "2".into(),
                position: 500,
                additive: 0.5,
                dominance: None,
            },
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "height\ts1\t2\t500\t0.5\tNA");
    }

    #[test]
    fn test_steps_line_writes_na_for_undefined() {
        let mut buf = Vec::new();
        write_steps_line(
            &mut buf,
            &StepRecord {
                trait_name: "t".into(),
                iteration: 0,
                site_name: "s".into(),
                chrom: "1".into(),
                position: 1,
                action: StepAction::Stop,
                df: 1.0,
                ss: 2.0,
                error_df: 8.0,
                error_ss: 4.0,
                f: f64::NAN,
                p: f64::NAN,
                criterion_value: f64::NAN,
            },
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("t\t0\ts\t1\t1\tstop\t1\t2\t8\t4\tNA\tNA\tNA"));
    }
}
