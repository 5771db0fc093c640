//! Model terms: design-matrix blocks with an identity.
//!
//! Each term keeps the raw per-row data it was built from, so that
//! sub-sampling rebuilds the design (including factor levels and the
//! dominance inclusion decision) from the resampled rows.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stepgwas_linalg::DenseMatrix;

use crate::site::AdditiveSite;

/// Tolerance for calling a genotype heterozygous in the non-imputed coding.
pub const HET_TOLERANCE: f64 = 1e-8;

/// Default minimum dominance count for a dominance column to be fitted.
pub const MIN_HETS: usize = 20;

/// What a term represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermId {
    Mean,
    Factor(String),
    Covariate(String),
    /// Position of the site in the candidate list.
    Site(usize),
}

/// Dominance coding for additive+dominance site terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DominanceSettings {
    /// Minimum sum of dominance values for the column to be included.
    pub min_hets: usize,
    /// Code dominance as 1 - |a - 1| instead of a heterozygote indicator.
    pub impute: bool,
}

impl Default for DominanceSettings {
    fn default() -> Self {
        Self {
            min_hets: MIN_HETS,
            impute: true,
        }
    }
}

#[derive(Debug, Clone)]
enum TermData {
    Mean(usize),
    Factor { levels: Vec<String>, restricted: bool },
    Covariate(Vec<f64>),
    Additive(Vec<f64>),
    AdditiveDominance {
        additive: Vec<f64>,
        settings: DominanceSettings,
    },
}

/// One block of the design matrix.
#[derive(Debug, Clone)]
pub struct ModelTerm {
    id: TermId,
    data: TermData,
    design: DenseMatrix,
}

/// Dominance column for an additive covariate and its count.
pub fn dominance_coding(additive: &[f64], impute: bool) -> (Vec<f64>, f64) {
    let dom: Vec<f64> = additive
        .iter()
        .map(|&a| {
            let dev = (a - 1.0).abs();
            if impute {
                1.0 - dev
            } else if dev < HET_TOLERANCE {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    let count = dom.iter().sum();
    (dom, count)
}

impl ModelTerm {
    fn from_data(id: TermId, data: TermData) -> Self {
        let design = match &data {
            TermData::Mean(n) => DenseMatrix::from_col_major(*n, 1, vec![1.0; *n]),
            TermData::Factor { levels, restricted } => factor_design(levels, *restricted),
            TermData::Covariate(v) | TermData::Additive(v) => {
                DenseMatrix::from_columns(v.len(), &[v.as_slice()])
            }
            TermData::AdditiveDominance { additive, settings } => {
                let (dom, count) = dominance_coding(additive, settings.impute);
                if count >= settings.min_hets as f64 {
                    DenseMatrix::from_columns(additive.len(), &[additive.as_slice(), dom.as_slice()])
                } else {
                    DenseMatrix::from_columns(additive.len(), &[additive.as_slice()])
                }
            }
        };
        Self { id, data, design }
    }

    /// Intercept column for `n` rows.
    pub fn mean(n: usize) -> Self {
        Self::from_data(TermId::Mean, TermData::Mean(n))
    }

    /// Indicator columns, one per level in sorted order; `restricted` drops
    /// the last level so the term is not aliased with the mean.
    pub fn factor(name: impl Into<String>, levels: Vec<String>, restricted: bool) -> Self {
        Self::from_data(
            TermId::Factor(name.into()),
            TermData::Factor { levels, restricted },
        )
    }

    pub fn covariate(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::from_data(TermId::Covariate(name.into()), TermData::Covariate(values))
    }

    /// Single additive column for the site at `position`.
    pub fn additive(position: usize, values: Vec<f64>) -> Self {
        Self::from_data(TermId::Site(position), TermData::Additive(values))
    }

    /// Additive column plus a dominance column when enough taxa deviate
    /// from the homozygous classes.
    pub fn additive_dominance(position: usize, values: Vec<f64>, settings: DominanceSettings) -> Self {
        Self::from_data(
            TermId::Site(position),
            TermData::AdditiveDominance {
                additive: values,
                settings,
            },
        )
    }

    /// Term for a candidate site over the given analysis rows (all rows if None).
    pub fn for_site(
        position: usize,
        site: &AdditiveSite,
        rows: Option<&[usize]>,
        dominance: Option<DominanceSettings>,
    ) -> Self {
        let values = match rows {
            Some(r) => site.covariate_subset(r),
            None => site.covariate(),
        };
        match dominance {
            Some(settings) => Self::additive_dominance(position, values, settings),
            None => Self::additive(position, values),
        }
    }

    pub fn id(&self) -> &TermId {
        &self.id
    }

    /// Candidate-list position when this is a site term.
    pub fn site(&self) -> Option<usize> {
        match self.id {
            TermId::Site(p) => Some(p),
            _ => None,
        }
    }

    pub fn design(&self) -> &DenseMatrix {
        &self.design
    }

    pub fn number_of_rows(&self) -> usize {
        self.design.nrows()
    }

    /// Number of design columns (1 or 2 for site terms).
    pub fn number_of_levels(&self) -> usize {
        self.design.ncols()
    }

    /// Whether a dominance column is part of the design.
    pub fn has_dominance(&self) -> bool {
        matches!(self.data, TermData::AdditiveDominance { .. }) && self.design.ncols() == 2
    }

    /// X'X for this block.
    pub fn crossproduct(&self) -> DenseMatrix {
        self.design.crossproduct()
    }

    /// X'y for this block.
    pub fn x_ty(&self, y: &[f64]) -> Vec<f64> {
        self.design.t_mat_vec(y)
    }

    /// X * beta for this block's coefficients.
    pub fn predicted_values(&self, beta: &[f64]) -> Vec<f64> {
        self.design.mat_vec(beta)
    }

    /// The same term restricted to `rows`, rebuilt from the resampled data.
    pub fn sub_sample(&self, rows: &[usize]) -> Self {
        let pick = |v: &[f64]| rows.iter().map(|&r| v[r]).collect::<Vec<f64>>();
        let data = match &self.data {
            TermData::Mean(_) => TermData::Mean(rows.len()),
            TermData::Factor { levels, restricted } => TermData::Factor {
                levels: rows.iter().map(|&r| levels[r].clone()).collect(),
                restricted: *restricted,
            },
            TermData::Covariate(v) => TermData::Covariate(pick(v)),
            TermData::Additive(v) => TermData::Additive(pick(v)),
            TermData::AdditiveDominance { additive, settings } => TermData::AdditiveDominance {
                additive: pick(additive),
                settings: *settings,
            },
        };
        Self::from_data(self.id.clone(), data)
    }
}

fn factor_design(levels: &[String], restricted: bool) -> DenseMatrix {
    let distinct: Vec<&String> = levels.iter().collect::<BTreeSet<_>>().into_iter().collect();
    let ncols = if restricted {
        distinct.len().saturating_sub(1)
    } else {
        distinct.len()
    };
    let mut m = DenseMatrix::zeros(levels.len(), ncols);
    for (i, level) in levels.iter().enumerate() {
        if let Ok(j) = distinct.binary_search(&level) {
            if j < ncols {
                m.set(i, j, 1.0);
            }
        }
    }
    m
}
