//! Permutation calibration of the enter limit.
//!
//! Permuted responses are fitted values plus shuffled residuals of the base
//! model. Every candidate is tested against the base model for every permuted
//! response; the genome-wide minimum p per permutation gives an empirical
//! null distribution for the best site, and the enter limit is its alpha
//! quantile.

use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::kernel::{FittedModel, RegressionKernel};
use crate::model::Model;
use crate::site::AdditiveSite;
use crate::stats::f_test;
use crate::term::{DominanceSettings, ModelTerm};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PermutationThreshold {
    pub enter_limit: f64,
    pub exit_limit: f64,
}

#[derive(Debug, Clone)]
pub struct PermutationResult {
    pub threshold: PermutationThreshold,
    /// Minimum p over all sites, one per permutation, ascending.
    pub min_p: Vec<f64>,
}

/// Permuted responses `yhat + shuffle(e)`.
///
/// The residuals are shuffled once and then re-shuffled in place for each
/// further permutation, so each permutation shuffles the previous one.
pub fn permuted_responses(yhat: &[f64], residuals: &[f64], n_perm: usize, seed: u64) -> Vec<Vec<f64>> {
    assert_eq!(yhat.len(), residuals.len());
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    let mut current = residuals.to_vec();
    current.shuffle(&mut rng);

    let mut out = Vec::with_capacity(n_perm);
    for k in 0..n_perm {
        if k > 0 {
            current.shuffle(&mut rng);
        }
        out.push(yhat.iter().zip(current.iter()).map(|(f, e)| f + e).collect());
    }
    out
}

/// p-values of one site term against the base model, one per permuted response.
///
/// Undefined tests count as p = 1.
pub fn site_permutation_pvalues<K: RegressionKernel>(
    kernel: &K,
    base: &Model,
    site_term: ModelTerm,
    y: &[f64],
    permuted: &[Vec<f64>],
) -> Result<Vec<f64>> {
    let mut terms = base.terms().to_vec();
    terms.push(site_term);
    let last = terms.len() - 1;
    let fit = kernel.fit(&terms, y)?;

    permuted
        .iter()
        .map(|yp| {
            let t = fit.retest_term(last, yp)?;
            Ok(f_test(t.ss, t.df, t.error_ss, t.error_df).map_or(1.0, |f| f.p))
        })
        .collect()
}

/// Sort the per-permutation minima and read off the thresholds.
///
/// enter = min_p[floor(alpha * n)] (clamped to the last index), exit = 2 * enter.
pub fn threshold_from_minima(mut min_p: Vec<f64>, alpha: f64) -> Result<PermutationResult> {
    let n = min_p.len();
    if n == 0 {
        bail!("No permutations to calibrate from");
    }
    min_p.sort_by(|a, b| a.total_cmp(b));
    let index = ((alpha * n as f64) as usize).min(n - 1);
    let enter_limit = min_p[index];
    Ok(PermutationResult {
        threshold: PermutationThreshold {
            enter_limit,
            exit_limit: 2.0 * enter_limit,
        },
        min_p,
    })
}

/// Inputs to a permutation test for one trait.
pub struct PermutationTest<'a> {
    pub base: &'a Model,
    pub y: &'a [f64],
    pub rows: Option<&'a [usize]>,
    pub dominance: Option<DominanceSettings>,
    pub permutations: usize,
    pub alpha: f64,
    pub seed: u64,
}

impl PermutationTest<'_> {
    /// Run over every site; the caller chooses the thread pool.
    pub fn run<K: RegressionKernel>(&self, kernel: &K, sites: &[AdditiveSite]) -> Result<PermutationResult> {
        if self.permutations == 0 {
            bail!("Permutation test requires at least one permutation");
        }
        let fit = kernel.fit(self.base.terms(), self.y)?;
        let permuted = permuted_responses(
            &fit.predicted_values(),
            &fit.residuals(),
            self.permutations,
            self.seed,
        );
        debug!(
            "Testing {} sites against {} permuted responses",
            sites.len(),
            permuted.len()
        );

        let min_p = sites
            .par_iter()
            .enumerate()
            .map(|(pos, site)| {
                let term = ModelTerm::for_site(pos, site, self.rows, self.dominance);
                site_permutation_pvalues(kernel, self.base, term, self.y, &permuted)
            })
            .try_reduce(
                || vec![1.0; self.permutations],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        if y < *x {
                            *x = y;
                        }
                    }
                    Ok(a)
                },
            )?;

        let result = threshold_from_minima(min_p, self.alpha)?;
        info!(
            "Permutation results: enterLimit = {:.5e}, exitLimit = {:.5e}",
            result.threshold.enter_limit, result.threshold.exit_limit
        );
        Ok(result)
    }
}
