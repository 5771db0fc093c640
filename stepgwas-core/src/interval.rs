//! Support-interval scan around selected terms.
//!
//! For a selected site the interval extends outward, within its chromosome,
//! until the first neighbour whose addition to the model leaves the selected
//! term still significant (marginal p <= alpha). Sites inside the interval are
//! then searched for a better fit; if one is found it replaces the selected
//! term and the interval is recomputed around it.

use anyhow::{bail, Result};
use rayon::prelude::*;
use tracing::info;

use crate::kernel::{FittedModel, RegressionKernel};
use crate::model::Model;
use crate::site::AdditiveSite;
use crate::stats::f_test;
use crate::term::{DominanceSettings, ModelTerm};

/// Candidate-list positions of a site and its interval bounds (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportInterval {
    pub site: usize,
    pub lower: usize,
    pub upper: usize,
}

/// A scanned term: the term kept in the model and its support interval.
#[derive(Debug, Clone)]
pub struct ScannedTerm {
    pub interval: SupportInterval,
    pub term: ModelTerm,
    /// The site originally selected, when a better site replaced it.
    pub replaced: Option<usize>,
}

pub struct IntervalScanner<'a, K: RegressionKernel> {
    pub kernel: &'a K,
    pub sites: &'a [AdditiveSite],
    pub y: &'a [f64],
    pub rows: Option<&'a [usize]>,
    pub dominance: Option<DominanceSettings>,
    pub alpha: f64,
}

impl<K: RegressionKernel> IntervalScanner<'_, K> {
    fn site_term(&self, position: usize) -> ModelTerm {
        ModelTerm::for_site(position, &self.sites[position], self.rows, self.dominance)
    }

    /// Marginal p of term `tested` after adding site `added` to the model.
    /// Undefined tests count as p = 1.
    pub fn test_added_term(&self, model: &Model, tested: usize, added: usize) -> Result<f64> {
        let mut terms = model.terms().to_vec();
        terms.push(self.site_term(added));
        let fit = self.kernel.fit(&terms, self.y)?;
        let (ss, df) = fit.marginal_ss_df(tested);
        let (error_ss, error_df) = fit.residual_ss_df();
        Ok(f_test(ss, df, error_ss, error_df).map_or(1.0, |t| t.p))
    }

    /// Interval around the site of term `term_index`.
    pub fn find_ci(&self, model: &Model, term_index: usize) -> Result<SupportInterval> {
        let Some(site) = model.terms()[term_index].site() else {
            bail!("Term {} is not a site term", term_index);
        };
        let chrom = self.sites[site].chromosome();

        let mut lower = site;
        while lower > 0 && self.sites[lower - 1].chromosome() == chrom {
            lower -= 1;
            if self.test_added_term(model, term_index, lower)? <= self.alpha {
                break;
            }
        }

        let mut upper = site;
        while upper + 1 < self.sites.len() && self.sites[upper + 1].chromosome() == chrom {
            upper += 1;
            if self.test_added_term(model, term_index, upper)? <= self.alpha {
                break;
            }
        }

        Ok(SupportInterval { site, lower, upper })
    }

    /// Best-fitting site in `lower..=upper` against `base`: smallest p,
    /// first found on ties. None if no site has a defined test.
    ///
    /// Both bounds are candidates. The walk stops on the lower and the upper
    /// side in the same way, so excluding only the upper bound would make the
    /// search depend on which side of the selected site a better fit lies.
    pub fn best_term(&self, base: &Model, lower: usize, upper: usize) -> Result<Option<usize>> {
        let fit = self.kernel.fit(base.terms(), self.y)?;
        let mut best: Option<(usize, f64)> = None;
        for pos in lower..=upper {
            let t = fit.test_new_term(&self.site_term(pos))?;
            if let Some(ft) = f_test(t.ss, t.df, t.error_ss, t.error_df) {
                if best.map_or(true, |(_, p)| ft.p < p) {
                    best = Some((pos, ft.p));
                }
            }
        }
        Ok(best.map(|(pos, _)| pos))
    }

    /// Interval for one term, replacing it with a better site when one exists.
    pub fn scan_term(&self, model: &Model, term_index: usize) -> Result<ScannedTerm> {
        let term = &model.terms()[term_index];
        if let Some(site) = term.site() {
            let s = &self.sites[site];
            info!("Scanning site {}, {}, pos = {}", site, s.chromosome(), s.position());
        }
        let interval = self.find_ci(model, term_index)?;
        let original = interval.site;

        let base = model.without(term_index);
        let best = self.best_term(&base, interval.lower, interval.upper)?;
        match best {
            Some(b) if b != original => {
                let new_term = self.site_term(b);
                let mut rescan = base;
                rescan.push(new_term.clone());
                let last = rescan.len() - 1;
                let interval = self.find_ci(&rescan, last)?;
                Ok(ScannedTerm {
                    interval,
                    term: new_term,
                    replaced: Some(original),
                })
            }
            _ => Ok(ScannedTerm {
                interval,
                term: term.clone(),
                replaced: None,
            }),
        }
    }

    /// Scan every selected term independently and in parallel.
    pub fn scan(&self, model: &Model) -> Result<Vec<ScannedTerm>> {
        (model.number_of_base_terms()..model.len())
            .into_par_iter()
            .filter(|&i| model.terms()[i].site().is_some())
            .map(|i| self.scan_term(model, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SweepKernel;
    use crate::site::{Criterion, SiteCovariate};

    fn site(i: usize, chrom: &str, values: Vec<f32>) -> AdditiveSite {
        AdditiveSite::new(
            i,
            chrom,
            i as u64 * 100,
            format!("s{}", i),
            Criterion::Pval,
            SiteCovariate::ReferenceProbability(values),
        )
    }

    #[test]
    fn test_interval_stays_on_chromosome() {
        let n = 10;
        let x: Vec<f32> = (0..n).map(|i| (i % 3) as f32).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, &v)| 2.0 * v as f64 + (i as f64 * 1.3).sin() * 0.1).collect();
        // the selected site is alone on its chromosome
        let sites = vec![
            site(0, "1", (0..n).map(|i| (i % 2) as f32).collect()),
            site(1, "2", x.clone()),
            site(2, "3", (0..n).map(|i| ((i + 1) % 3) as f32).collect()),
        ];
        let mut model = Model::new(vec![ModelTerm::mean(n)]);
        model.push(ModelTerm::additive(1, x.iter().map(|&v| v as f64).collect()));

        let scanner = IntervalScanner {
            kernel: &SweepKernel,
            sites: &sites,
            y: &y,
            rows: None,
            dominance: None,
            alpha: 0.05,
        };
        let interval = scanner.find_ci(&model, 1).unwrap();
        assert_eq!(interval, SupportInterval { site: 1, lower: 1, upper: 1 });

        let scanned = scanner.scan(&model).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].interval, interval);
        assert!(scanned[0].replaced.is_none());
    }

    #[test]
    fn test_find_ci_rejects_base_terms() {
        let sites = vec![site(0, "1", vec![0.0, 1.0, 2.0])];
        let model = Model::new(vec![ModelTerm::mean(3)]);
        let y = [1.0, 2.0, 3.0];
        let scanner = IntervalScanner {
            kernel: &SweepKernel,
            sites: &sites,
            y: &y,
            rows: None,
            dominance: None,
            alpha: 0.05,
        };
        assert!(scanner.find_ci(&model, 0).is_err());
    }

    #[test]
    fn test_best_term_includes_both_bounds() {
        let n = 12;
        let x: Vec<f32> = (0..n).map(|i| (i % 3) as f32).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, &v)| 3.0 * v as f64 + 0.05 * (i % 4) as f64).collect();
        let noise = |k: usize| -> Vec<f32> { (0..n).map(|i| ((i * k + 1) % 3) as f32).collect() };
        let base = Model::new(vec![ModelTerm::mean(n)]);

        for best_at in [0, 2] {
            let mut sites: Vec<AdditiveSite> = (0..3).map(|j| site(j, "1", noise(j + 5))).collect();
            sites[best_at] = site(best_at, "1", x.clone());
            let scanner = IntervalScanner {
                kernel: &SweepKernel,
                sites: &sites,
                y: &y,
                rows: None,
                dominance: None,
                alpha: 0.05,
            };
            assert_eq!(scanner.best_term(&base, 0, 2).unwrap(), Some(best_at));
        }
    }
}
