//! Tab-delimited phenotype file parser.
//!
//! One row per taxon. The taxa column names the rows; every other column is a
//! trait, a factor (categorical, kept as strings) or a covariate (numeric).
//! Columns not named as factors or covariates are traits unless an explicit
//! trait list is given.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// A named numeric column (NaN for missing).
#[derive(Debug, Clone)]
pub struct NumericColumn {
    pub name: String,
    pub values: Vec<f64>,
}

/// A named categorical column (None for missing).
#[derive(Debug, Clone)]
pub struct FactorColumn {
    pub name: String,
    pub levels: Vec<Option<String>>,
}

/// Parsed phenotype data for all taxa.
#[derive(Debug, Clone)]
pub struct PhenotypeTable {
    /// Taxa names in file order.
    pub taxa: Vec<String>,
    pub traits: Vec<NumericColumn>,
    pub factors: Vec<FactorColumn>,
    pub covariates: Vec<NumericColumn>,
}

/// Which columns of a phenotype file play which role.
#[derive(Debug, Clone, Default)]
pub struct PhenotypeColumns {
    pub taxa_col: String,
    /// Empty means every column that is not a factor or covariate.
    pub trait_cols: Vec<String>,
    pub factor_cols: Vec<String>,
    pub covar_cols: Vec<String>,
}

/// Parse a phenotype file.
pub fn parse_phenotype_file(path: &Path, columns: &PhenotypeColumns) -> Result<PhenotypeTable> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read phenotype file: {}", path.display()))?;
    parse_phenotype_str(&contents, columns)
        .with_context(|| format!("Failed to parse phenotype file: {}", path.display()))
}

/// Parse phenotype text (tab- or whitespace-delimited).
pub fn parse_phenotype_str(contents: &str, columns: &PhenotypeColumns) -> Result<PhenotypeTable> {
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty phenotype file"))?;

    let tab = header_line.contains('\t');
    let split = |line: &str| -> Vec<String> {
        if tab {
            line.split('\t').map(|s| s.trim().to_string()).collect()
        } else {
            line.split_whitespace().map(String::from).collect()
        }
    };

    let headers = split(header_line);
    let find = |name: &str, role: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow::anyhow!("{} column '{}' not found in header", role, name))
    };

    let taxa_idx = find(&columns.taxa_col, "Taxa")?;
    let factor_idx: Vec<usize> = columns
        .factor_cols
        .iter()
        .map(|c| find(c, "Factor"))
        .collect::<Result<_>>()?;
    let covar_idx: Vec<usize> = columns
        .covar_cols
        .iter()
        .map(|c| find(c, "Covariate"))
        .collect::<Result<_>>()?;
    let trait_idx: Vec<usize> = if columns.trait_cols.is_empty() {
        (0..headers.len())
            .filter(|i| *i != taxa_idx && !factor_idx.contains(i) && !covar_idx.contains(i))
            .collect()
    } else {
        columns
            .trait_cols
            .iter()
            .map(|c| find(c, "Trait"))
            .collect::<Result<_>>()?
    };
    if trait_idx.is_empty() {
        bail!("Phenotype file has no trait columns");
    }

    let mut taxa = Vec::new();
    let mut rows = Vec::new();
    for (line_num, line) in lines.enumerate() {
        let fields = split(line);
        if fields.len() != headers.len() {
            bail!(
                "Line {} has {} fields, header has {}",
                line_num + 2,
                fields.len(),
                headers.len()
            );
        }
        taxa.push(fields[taxa_idx].clone());
        rows.push(fields);
    }

    let numeric = |idx: &[usize]| -> Vec<NumericColumn> {
        idx.iter()
            .map(|&j| NumericColumn {
                name: headers[j].clone(),
                values: rows.iter().map(|r| parse_value(&r[j])).collect(),
            })
            .collect()
    };
    let factors = factor_idx
        .iter()
        .map(|&j| FactorColumn {
            name: headers[j].clone(),
            levels: rows
                .iter()
                .map(|r| (!is_missing(&r[j])).then(|| r[j].clone()))
                .collect(),
        })
        .collect();

    Ok(PhenotypeTable {
        taxa,
        traits: numeric(&trait_idx),
        factors,
        covariates: numeric(&covar_idx),
    })
}

fn is_missing(s: &str) -> bool {
    matches!(s, "NA" | "na" | "Na" | "." | "" | "-" | "NaN" | "nan" | "-999")
}

/// Parse a string value to f64, treating NA/missing as NaN.
fn parse_value(s: &str) -> f64 {
    if is_missing(s) {
        f64::NAN
    } else {
        s.parse().unwrap_or(f64::NAN)
    }
}

impl PhenotypeTable {
    /// Rows where the given trait, every factor and every covariate are present.
    pub fn complete_rows(&self, trait_index: usize) -> Vec<usize> {
        let y = &self.traits[trait_index].values;
        (0..self.taxa.len())
            .filter(|&i| {
                !y[i].is_nan()
                    && self.covariates.iter().all(|c| !c.values[i].is_nan())
                    && self.factors.iter().all(|f| f.levels[i].is_some())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> PhenotypeColumns {
        PhenotypeColumns {
            taxa_col: "Taxa".into(),
            trait_cols: Vec::new(),
            factor_cols: vec!["env".into()],
            covar_cols: vec!["pc1".into()],
        }
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1.5"), 1.5);
        assert!(parse_value("NA").is_nan());
        assert!(parse_value(".").is_nan());
        assert!(parse_value("-999").is_nan());
    }

    #[test]
    fn test_roles_are_assigned() {
        let text = "Taxa\theight\tenv\tpc1\tyield\n\
                    A\t1.0\tE1\t0.1\t5\n\
                    B\t2.0\tE2\t0.2\tNA\n\
                    C\tNA\tE1\t0.3\t7\n";
        let table = parse_phenotype_str(text, &columns()).unwrap();
        assert_eq!(table.taxa, vec!["A", "B", "C"]);
        assert_eq!(table.traits.len(), 2);
        assert_eq!(table.traits[0].name, "height");
        assert_eq!(table.traits[1].name, "yield");
        assert_eq!(table.factors[0].levels[1].as_deref(), Some("E2"));
        assert_eq!(table.covariates[0].values[2], 0.3);

        assert_eq!(table.complete_rows(0), vec![0, 1]);
        assert_eq!(table.complete_rows(1), vec![0, 2]);
    }

    #[test]
    fn test_missing_column_is_error() {
        let text = "Taxa\theight\nA\t1\n";
        let err = parse_phenotype_str(text, &columns()).unwrap_err();
        assert!(err.to_string().contains("env"));
    }
}
