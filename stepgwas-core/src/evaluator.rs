//! Scoring candidate sites against the current model.
//!
//! Scoring is pure: each candidate yields a `SiteScore` and nothing is written
//! during evaluation. A batch splits into two contiguous halves at any point,
//! and the best-of reduction (`prefer`) is commutative and associative, so the
//! winner does not depend on where batches are split or how work is scheduled.

use std::cmp::Ordering;

use anyhow::Result;

use crate::kernel::FittedModel;
use crate::site::{AdditiveSite, Criterion};
use crate::stats::{f_test, information_criterion, neg_log10, UNDEFINED_FLOOR};
use crate::term::{DominanceSettings, ModelTerm};

/// Batches smaller than this are scored on one thread.
pub const MIN_SPLIT: usize = 500;

/// Score of one candidate. `site` is the candidate-list position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteScore {
    pub site: usize,
    pub value: f64,
    pub criterion: Criterion,
}

impl SiteScore {
    pub fn is_defined(&self) -> bool {
        !self.value.is_nan()
    }
}

/// The preferred of two optional scores.
///
/// Undefined scores never win; equal scores keep the lower position.
pub fn prefer(a: Option<SiteScore>, b: Option<SiteScore>) -> Option<SiteScore> {
    match (a.filter(SiteScore::is_defined), b.filter(SiteScore::is_defined)) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => match a.criterion.compare(a.value, b.value) {
            Ordering::Greater => Some(a),
            Ordering::Less => Some(b),
            Ordering::Equal => Some(if a.site <= b.site { a } else { b }),
        },
    }
}

/// Everything needed to score a candidate against a fitted model.
pub struct Evaluator<'a, F: FittedModel> {
    pub fit: &'a F,
    /// Rank of the fitted model before any candidate is added.
    pub base_rank: f64,
    pub n_obs: usize,
    pub criterion: Criterion,
    pub dominance: Option<DominanceSettings>,
    /// Analysis rows the model was fitted on (None = all).
    pub rows: Option<&'a [usize]>,
    /// Total number of candidate sites, for the mBIC penalty.
    pub n_sites: usize,
}

impl<'a, F: FittedModel> Evaluator<'a, F> {
    pub fn new(fit: &'a F, criterion: Criterion, n_sites: usize) -> Self {
        let (_, rank) = fit.full_model_ss_df();
        let (_, residual_df) = fit.residual_ss_df();
        Self {
            fit,
            base_rank: rank,
            n_obs: (rank + residual_df).round() as usize,
            criterion,
            dominance: None,
            rows: None,
            n_sites,
        }
    }

    pub fn with_dominance(mut self, dominance: Option<DominanceSettings>) -> Self {
        self.dominance = dominance;
        self
    }

    pub fn with_rows(mut self, rows: Option<&'a [usize]>) -> Self {
        self.rows = rows;
        self
    }

    /// Score the candidate at `position`.
    pub fn score_site(&self, position: usize, site: &AdditiveSite) -> Result<SiteScore> {
        let term = ModelTerm::for_site(position, site, self.rows, self.dominance);
        let test = self.fit.test_new_term(&term)?;
        let value = match self.criterion {
            Criterion::Pval => f_test(test.ss, test.df, test.error_ss, test.error_df)
                .map_or(f64::NAN, |t| neg_log10(t.p)),
            c => {
                if test.df < UNDEFINED_FLOOR {
                    f64::NAN
                } else {
                    information_criterion(
                        c,
                        test.error_ss,
                        self.n_obs as f64,
                        self.base_rank + test.df,
                        self.n_sites,
                    )
                }
            }
        };
        Ok(SiteScore {
            site: position,
            value,
            criterion: self.criterion,
        })
    }
}

/// A contiguous, read-only range of candidates.
#[derive(Debug, Clone, Copy)]
pub struct SiteBatch<'a> {
    sites: &'a [AdditiveSite],
    /// Already selected for the current trait; never scored.
    selected: &'a [bool],
    offset: usize,
}

impl<'a> SiteBatch<'a> {
    pub fn new(sites: &'a [AdditiveSite], selected: &'a [bool]) -> Self {
        assert_eq!(sites.len(), selected.len());
        Self {
            sites,
            selected,
            offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Candidate-list position of the first site in this batch.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Split into `[0, k)` and `[k, len)`.
    pub fn split_at(&self, k: usize) -> (SiteBatch<'a>, SiteBatch<'a>) {
        let (ls, rs) = self.sites.split_at(k);
        let (lm, rm) = self.selected.split_at(k);
        (
            SiteBatch {
                sites: ls,
                selected: lm,
                offset: self.offset,
            },
            SiteBatch {
                sites: rs,
                selected: rm,
                offset: self.offset + k,
            },
        )
    }

    /// Scores in batch order; `None` for selected candidates.
    pub fn score_all<F: FittedModel>(&self, ev: &Evaluator<'_, F>) -> Result<Vec<Option<SiteScore>>> {
        self.sites
            .iter()
            .zip(self.selected)
            .enumerate()
            .map(|(i, (site, &sel))| {
                if sel {
                    Ok(None)
                } else {
                    ev.score_site(self.offset + i, site).map(Some)
                }
            })
            .collect()
    }

    /// Best candidate, scored on the calling thread.
    pub fn best<F: FittedModel>(&self, ev: &Evaluator<'_, F>) -> Result<Option<SiteScore>> {
        let mut best = None;
        for (i, (site, &sel)) in self.sites.iter().zip(self.selected).enumerate() {
            if !sel {
                best = prefer(best, Some(ev.score_site(self.offset + i, site)?));
            }
        }
        Ok(best)
    }

    /// Best candidate by balanced fork/join over halves of at least `MIN_SPLIT`.
    pub fn best_parallel<F: FittedModel>(&self, ev: &Evaluator<'_, F>) -> Result<Option<SiteScore>> {
        self.best_parallel_with_split(ev, MIN_SPLIT)
    }

    pub fn best_parallel_with_split<F: FittedModel>(
        &self,
        ev: &Evaluator<'_, F>,
        min_split: usize,
    ) -> Result<Option<SiteScore>> {
        if self.len() <= min_split.max(1) {
            return self.best(ev);
        }
        let (left, right) = self.split_at(self.len() / 2);
        let (a, b) = rayon::join(
            || left.best_parallel_with_split(ev, min_split),
            || right.best_parallel_with_split(ev, min_split),
        );
        Ok(prefer(a?, b?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{RegressionKernel, SweepKernel};
    use crate::site::SiteCovariate;

    fn site(i: usize, values: Vec<f32>) -> AdditiveSite {
        AdditiveSite::new(
            i,
            "1",
            i as u64,
            format!("s{}", i),
            Criterion::Pval,
            SiteCovariate::ReferenceProbability(values),
        )
    }

    fn score(site: usize, value: f64) -> Option<SiteScore> {
        Some(SiteScore {
            site,
            value,
            criterion: Criterion::Pval,
        })
    }

    #[test]
    fn test_prefer_is_order_independent() {
        let a = score(3, 5.0);
        let b = score(1, 5.0);
        let c = score(2, f64::NAN);
        assert_eq!(prefer(a, b), prefer(b, a));
        assert_eq!(prefer(a, b).unwrap().site, 1);
        assert_eq!(prefer(c, a).unwrap().site, 3);
        assert_eq!(prefer(prefer(a, b), c), prefer(a, prefer(b, c)));
        assert!(prefer(c, None).is_none());
    }

    #[test]
    fn test_best_skips_selected_and_matches_parallel() {
        let y: Vec<f64> = (0..12).map(|i| (i as f64 * 0.7).sin() + i as f64 * 0.1).collect();
        let sites: Vec<AdditiveSite> = (0..40)
            .map(|s| {
                site(
                    s,
                    (0..12)
                        .map(|i| (((i * 7 + s * 3) % 11) as f32) / 5.0)
                        .collect(),
                )
            })
            .collect();
        let fit = SweepKernel.fit(&[ModelTerm::mean(12)], &y).unwrap();
        let ev = Evaluator::new(&fit, Criterion::Pval, sites.len());

        let none_selected = vec![false; sites.len()];
        let batch = SiteBatch::new(&sites, &none_selected);
        let best = batch.best(&ev).unwrap().unwrap();
        let par = batch.best_parallel_with_split(&ev, 3).unwrap().unwrap();
        assert_eq!(best.site, par.site);
        assert_eq!(best.value, par.value);

        let mut selected = vec![false; sites.len()];
        selected[best.site] = true;
        let batch = SiteBatch::new(&sites, &selected);
        let scores = batch.score_all(&ev).unwrap();
        assert!(scores[best.site].is_none());
        assert_ne!(batch.best(&ev).unwrap().unwrap().site, best.site);
    }

    #[test]
    fn test_constant_site_is_undefined() {
        let y = vec![1.0, 2.0, 4.0, 3.0, 5.0];
        let fit = SweepKernel.fit(&[ModelTerm::mean(5)], &y).unwrap();
        let ev = Evaluator::new(&fit, Criterion::Bic, 1);
        let s = ev.score_site(0, &site(0, vec![0.5; 5])).unwrap();
        assert!(!s.is_defined());
    }
}
