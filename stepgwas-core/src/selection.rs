//! Forward selection driver.
//!
//! One driver runs over the shared candidate list for each trait in turn.
//! Each round scores every not-yet-selected site against the current model in
//! parallel, refits with the winner appended and either commits it or rolls it
//! back and stops. The model is only touched between rounds, on the calling
//! thread.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{bail, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info};

use crate::config::SelectionConfig;
use crate::evaluator::{Evaluator, SiteBatch};
use crate::interval::{IntervalScanner, ScannedTerm};
use crate::kernel::{FittedModel, RegressionKernel, SweepKernel};
use crate::model::Model;
use crate::permutation::{PermutationResult, PermutationTest};
use crate::report::{
    ChromosomeResiduals, FittedVariantRecord, IntervalRecord, MarkerEffect, StepAction, StepRecord,
};
use crate::site::{AdditiveSite, Criterion};
use crate::stats::{f_test, information_criterion, neg_log10};
use crate::term::ModelTerm;

/// Response and base model for one trait.
#[derive(Debug, Clone)]
pub struct TraitData {
    pub name: String,
    pub y: Vec<f64>,
    pub base: Model,
    /// Site analysis row of each model row (None = the identity).
    pub rows: Option<Vec<usize>>,
}

/// How a forward step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The winning site passed and was added to the model.
    Committed,
    /// The winning site failed the entry test and was rolled back.
    Rejected,
    /// No candidate had a defined score.
    Exhausted,
    /// The model already holds the maximum number of selected terms.
    LimitReached,
    /// The round failed; prior commits are kept.
    Failed(String),
}

/// The per-trait working state. Sub-sample refits get their own.
#[derive(Debug, Clone)]
struct SelectionState {
    model: Model,
    y: Vec<f64>,
    rows: Option<Vec<usize>>,
    selected: Vec<bool>,
    previous_criterion: f64,
    iteration: usize,
}

impl SelectionState {
    fn new(model: Model, y: Vec<f64>, rows: Option<Vec<usize>>, n_sites: usize, iteration: usize) -> Self {
        Self {
            model,
            y,
            rows,
            selected: vec![false; n_sites],
            previous_criterion: f64::INFINITY,
            iteration,
        }
    }
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new(Model::new(Vec::new()), Vec::new(), None, 0, 0)
    }
}

/// Result of an interval scan: per-term intervals and the rebuilt model.
#[derive(Debug, Clone)]
pub struct IntervalScan {
    pub scanned: Vec<ScannedTerm>,
    /// Base terms plus one term per scanned interval site.
    pub model: Model,
}

pub struct ForwardSelection<K: RegressionKernel = SweepKernel> {
    sites: Vec<AdditiveSite>,
    config: SelectionConfig,
    kernel: K,
    pool: Option<rayon::ThreadPool>,
    trait_name: String,
    base: Model,
    state: SelectionState,
    enter_limit: f64,
    exit_limit: f64,
    permutation: Option<PermutationResult>,
    fitted: Vec<FittedVariantRecord>,
    steps: Vec<StepRecord>,
}

impl<K: RegressionKernel> ForwardSelection<K> {
    pub fn new(mut sites: Vec<AdditiveSite>, config: SelectionConfig, kernel: K) -> Result<Self> {
        config.validate()?;
        let pool = if config.max_threads > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.max_threads)
                    .build()?,
            )
        } else {
            None
        };
        for site in sites.iter_mut() {
            site.set_criterion(config.criterion);
        }
        Ok(Self {
            sites,
            enter_limit: config.enter_limit,
            exit_limit: config.exit_limit,
            config,
            kernel,
            pool,
            trait_name: String::new(),
            base: Model::new(Vec::new()),
            state: SelectionState::default(),
            permutation: None,
            fitted: Vec::new(),
            steps: Vec::new(),
        })
    }

    fn in_pool<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Start over with a new trait. Records from earlier traits are kept.
    pub fn reset_model(&mut self, data: TraitData) -> Result<()> {
        let n = data.y.len();
        if data.base.number_of_rows() != n {
            bail!(
                "Trait {}: base model has {} rows but the response has {}",
                data.name,
                data.base.number_of_rows(),
                n
            );
        }
        match &data.rows {
            Some(rows) => {
                if rows.len() != n {
                    bail!("Trait {}: {} site rows for {} observations", data.name, rows.len(), n);
                }
                if let Some(site) = self.sites.first() {
                    if rows.iter().any(|&r| r >= site.n_rows()) {
                        bail!("Trait {}: site row out of range", data.name);
                    }
                }
            }
            None => {
                if let Some(site) = self.sites.first() {
                    if site.n_rows() != n {
                        bail!(
                            "Trait {}: sites have {} rows but the response has {}",
                            data.name,
                            site.n_rows(),
                            n
                        );
                    }
                }
            }
        }

        self.trait_name = data.name;
        self.state = SelectionState::new(data.base.clone(), data.y, data.rows, self.sites.len(), 0);
        self.base = data.base;
        self.enter_limit = self.config.enter_limit;
        self.exit_limit = self.config.exit_limit;
        self.permutation = None;
        Ok(())
    }

    /// Calibrate the enter and exit limits for the current trait.
    pub fn run_permutation_test(&mut self) -> Result<&PermutationResult> {
        info!(
            "Trait {}: running {} permutations",
            self.trait_name, self.config.permutations
        );
        let test = PermutationTest {
            base: &self.base,
            y: &self.state.y,
            rows: self.state.rows.as_deref(),
            dominance: self.config.dominance_settings(),
            permutations: self.config.permutations,
            alpha: self.config.permutation_alpha,
            seed: self.config.seed,
        };
        let result = self.in_pool(|| test.run(&self.kernel, &self.sites))?;
        self.enter_limit = result.threshold.enter_limit;
        self.exit_limit = result.threshold.exit_limit;
        let result: &PermutationResult = self.permutation.insert(result);
        Ok(result)
    }

    /// Add sites until a step does not commit. Returns the terminal outcome.
    pub fn fit_model(&mut self) -> StepOutcome {
        let mut state = std::mem::take(&mut self.state);
        let outcome = self.select(&mut state);
        self.state = state;
        info!(
            "Trait {}: {} sites selected ({:?})",
            self.trait_name,
            self.state.model.selected_terms().len(),
            outcome
        );
        outcome
    }

    /// Run one round on the current trait.
    pub fn forward_step(&mut self) -> StepOutcome {
        let mut state = std::mem::take(&mut self.state);
        let outcome = self.step(&mut state);
        self.state = state;
        outcome
    }

    /// Forward selection on the rows in `subsample` only.
    ///
    /// Records are tagged with `iteration`; the full-data model is untouched.
    pub fn fit_model_for_subsample(&mut self, subsample: &[usize], iteration: usize) -> StepOutcome {
        let rows = match &self.state.rows {
            Some(r) => subsample.iter().map(|&i| r[i]).collect(),
            None => subsample.to_vec(),
        };
        let y = subsample.iter().map(|&i| self.state.y[i]).collect();
        let mut state = SelectionState::new(
            self.base.sub_sample(subsample),
            y,
            Some(rows),
            self.sites.len(),
            iteration,
        );
        let outcome = self.select(&mut state);
        debug!(
            "Trait {}: resample {} selected {} sites",
            self.trait_name,
            iteration,
            state.model.selected_terms().len()
        );
        outcome
    }

    /// `resamples` refits on seeded draws without replacement of
    /// `resample_fraction` of the observations.
    pub fn run_resampling(&mut self) -> Vec<StepOutcome> {
        let n = self.state.y.len();
        let k = ((n as f64) * self.config.resample_fraction).round() as usize;
        let k = k.clamp(1, n.max(1));
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut outcomes = Vec::with_capacity(self.config.resamples);
        for iteration in 1..=self.config.resamples {
            if n == 0 {
                break;
            }
            let mut subsample = rand::seq::index::sample(&mut rng, n, k).into_vec();
            subsample.sort_unstable();
            outcomes.push(self.fit_model_for_subsample(&subsample, iteration));
        }
        outcomes
    }

    fn select(&mut self, state: &mut SelectionState) -> StepOutcome {
        loop {
            match self.step(state) {
                StepOutcome::Committed => continue,
                other => return other,
            }
        }
    }

    fn step(&mut self, state: &mut SelectionState) -> StepOutcome {
        if state.model.selected_terms().len() >= self.config.max_variants {
            return StepOutcome::LimitReached;
        }
        let before = state.model.len();
        let result = catch_unwind(AssertUnwindSafe(|| self.try_step(state)));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Trait {}: forward step failed: {:#}", self.trait_name, e);
                StepOutcome::Failed(format!("{:#}", e))
            }
            Err(_) => {
                error!("Trait {}: forward step panicked", self.trait_name);
                StepOutcome::Failed("worker panicked".to_string())
            }
        };
        if matches!(outcome, StepOutcome::Failed(_)) {
            while state.model.len() > before {
                state.model.pop();
            }
        }
        outcome
    }

    fn try_step(&mut self, state: &mut SelectionState) -> Result<StepOutcome> {
        let criterion = self.config.criterion;
        let dominance = self.config.dominance_settings();
        let n_sites = self.sites.len();

        let fit = self.kernel.fit(state.model.terms(), &state.y)?;
        let ev = Evaluator::new(&fit, criterion, n_sites)
            .with_dominance(dominance)
            .with_rows(state.rows.as_deref());
        let batch = SiteBatch::new(&self.sites, &state.selected);
        let Some(best) = self.in_pool(|| batch.best_parallel(&ev))? else {
            debug!("Trait {}: no candidate with a defined score", self.trait_name);
            return Ok(StepOutcome::Exhausted);
        };

        let site = &self.sites[best.site];
        let (site_name, chrom, position) = (site.name().to_string(), site.chromosome().to_string(), site.position());
        state
            .model
            .push(ModelTerm::for_site(best.site, site, state.rows.as_deref(), dominance));

        let fit = self.kernel.fit(state.model.terms(), &state.y)?;
        let last = state.model.len() - 1;
        let (error_ss, error_df) = fit.residual_ss_df();
        let (ss, df) = fit.incremental_ss_df(last);
        let test = f_test(ss, df, error_ss, error_df);
        let (f, p) = test.map_or((f64::NAN, f64::NAN), |t| (t.f, t.p));

        let (criterion_value, accept) = match criterion {
            Criterion::Pval => (f64::NAN, test.is_some_and(|t| t.p <= self.enter_limit)),
            c => {
                let (_, rank) = fit.full_model_ss_df();
                let value = information_criterion(c, error_ss, state.y.len() as f64, rank, n_sites);
                (value, value.is_finite() && value < state.previous_criterion)
            }
        };

        self.steps.push(StepRecord {
            trait_name: self.trait_name.clone(),
            iteration: state.iteration,
            site_name: site_name.clone(),
            chrom: chrom.clone(),
            position,
            action: if accept { StepAction::Add } else { StepAction::Stop },
            df,
            ss,
            error_df,
            error_ss,
            f,
            p,
            criterion_value,
        });

        if !accept {
            state.model.pop();
            debug!(
                "Trait {}: {} not added (p = {:e}, criterion = {})",
                self.trait_name, site_name, p, criterion_value
            );
            return Ok(StepOutcome::Rejected);
        }

        state.selected[best.site] = true;
        state.previous_criterion = criterion_value;
        self.sites[best.site].set_score(best.value);
        let step = state.model.selected_terms().len();
        info!(
            "Trait {}: step {} added {} ({}:{}), p = {:e}",
            self.trait_name, step, site_name, chrom, position, p
        );
        self.fitted.push(FittedVariantRecord {
            trait_name: self.trait_name.clone(),
            iteration: state.iteration,
            step,
            site_name,
            chrom,
            position,
            p,
            neg_log10_p: neg_log10(p),
        });
        Ok(StepOutcome::Committed)
    }

    fn interval_scanner(&self) -> IntervalScanner<'_, K> {
        IntervalScanner {
            kernel: &self.kernel,
            sites: &self.sites,
            y: &self.state.y,
            rows: self.state.rows.as_deref(),
            dominance: self.config.dominance_settings(),
            alpha: self.config.interval_alpha,
        }
    }

    /// Support intervals for every selected term and the model rebuilt from them.
    pub fn scan_intervals(&self) -> Result<IntervalScan> {
        let scanner = self.interval_scanner();
        let scanned = self.in_pool(|| scanner.scan(&self.state.model))?;
        let mut model = self.state.model.base();
        for s in &scanned {
            model.push(s.term.clone());
        }
        // refit so a degenerate rebuilt model fails here
        self.kernel.fit(model.terms(), &self.state.y)?;
        Ok(IntervalScan { scanned, model })
    }

    pub fn interval_records(&self, scanned: &[ScannedTerm]) -> Vec<IntervalRecord> {
        scanned
            .iter()
            .map(|s| {
                let site = &self.sites[s.interval.site];
                let lower = &self.sites[s.interval.lower];
                let upper = &self.sites[s.interval.upper];
                IntervalRecord {
                    trait_name: self.trait_name.clone(),
                    site_name: site.name().to_string(),
                    chrom: site.chromosome().to_string(),
                    position: site.position(),
                    lower_name: lower.name().to_string(),
                    lower_position: lower.position(),
                    upper_name: upper.name().to_string(),
                    upper_position: upper.position(),
                }
            })
            .collect()
    }

    /// Effects of the selected terms of the current model.
    pub fn marker_effects(&self) -> Result<Vec<MarkerEffect>> {
        self.marker_effects_of(&self.state.model)
    }

    /// Effects of the selected terms of `model`, fitted to the current response.
    pub fn marker_effects_of(&self, model: &Model) -> Result<Vec<MarkerEffect>> {
        let fit = self.kernel.fit(model.terms(), &self.state.y)?;
        let beta = fit.beta();
        let mut offset = model.base_columns();
        let mut effects = Vec::new();
        for term in model.selected_terms() {
            if let Some(pos) = term.site() {
                let site = &self.sites[pos];
                effects.push(MarkerEffect {
                    trait_name: self.trait_name.clone(),
                    site_name: site.name().to_string(),
                    chrom: site.chromosome().to_string(),
                    position: site.position(),
                    additive: beta[offset],
                    dominance: term.has_dominance().then(|| beta[offset + 1]),
                });
            }
            offset += term.number_of_levels();
        }
        Ok(effects)
    }

    /// Residuals of the model without each chromosome's selected terms.
    ///
    /// `taxa` names the model rows.
    pub fn chromosome_residuals(&self, taxa: &[String]) -> Result<Vec<ChromosomeResiduals>> {
        let mut seen = BTreeSet::new();
        let chromosomes: Vec<&str> = self
            .state
            .model
            .selected_sites()
            .into_iter()
            .map(|s| self.sites[s].chromosome())
            .filter(|c| seen.insert(*c))
            .collect();

        chromosomes
            .into_iter()
            .map(|chrom| {
                let model = self
                    .state
                    .model
                    .retain_selected(|t| t.site().map_or(true, |s| self.sites[s].chromosome() != chrom));
                let fit = self.kernel.fit(model.terms(), &self.state.y)?;
                Ok(ChromosomeResiduals {
                    trait_name: self.trait_name.clone(),
                    chrom: chrom.to_string(),
                    taxa: taxa.to_vec(),
                    residuals: fit.residuals(),
                })
            })
            .collect()
    }

    pub fn sites(&self) -> &[AdditiveSite] {
        &self.sites
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn trait_name(&self) -> &str {
        &self.trait_name
    }

    pub fn model(&self) -> &Model {
        &self.state.model
    }

    pub fn enter_limit(&self) -> f64 {
        self.enter_limit
    }

    pub fn exit_limit(&self) -> f64 {
        self.exit_limit
    }

    pub fn permutation(&self) -> Option<&PermutationResult> {
        self.permutation.as_ref()
    }

    pub fn fitted_variants(&self) -> &[FittedVariantRecord] {
        &self.fitted
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteCovariate;
    use stepgwas_linalg::SweepLinearModel;

    fn site(i: usize, chrom: &str, values: Vec<f32>) -> AdditiveSite {
        AdditiveSite::new(
            i,
            chrom,
            i as u64 * 10,
            format!("s{}", i),
            Criterion::Pval,
            SiteCovariate::ReferenceProbability(values),
        )
    }

    fn trait_data(y: Vec<f64>) -> TraitData {
        let n = y.len();
        TraitData {
            name: "t".to_string(),
            y,
            base: Model::new(vec![ModelTerm::mean(n)]),
            rows: None,
        }
    }

    #[test]
    fn test_reset_checks_row_counts() {
        let sites = vec![site(0, "1", vec![0.0, 1.0, 2.0])];
        let mut fs = ForwardSelection::new(sites, SelectionConfig::default(), SweepKernel).unwrap();
        assert!(fs.reset_model(trait_data(vec![1.0, 2.0])).is_err());
        fs.reset_model(trait_data(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(fs.model().len(), 1);
    }

    #[test]
    fn test_failed_step_keeps_prior_state() {
        // site rows shorter than the response make the term mismatch the model
        let sites = vec![site(0, "1", vec![0.0, 1.0, 2.0, 1.0])];
        let mut fs = ForwardSelection::new(sites, SelectionConfig::default(), SweepKernel).unwrap();
        fs.reset_model(TraitData {
            name: "t".into(),
            y: vec![1.0, 2.0, 3.0],
            base: Model::new(vec![ModelTerm::mean(3)]),
            rows: Some(vec![0, 1, 2]),
        })
        .unwrap();
        fs.state.rows = Some(vec![0, 1, 2, 3]);
        let outcome = fs.forward_step();
        assert!(matches!(outcome, StepOutcome::Failed(_)));
        assert_eq!(fs.model().len(), 1);
        assert!(fs.fitted_variants().is_empty());
    }

    /// Panics on any fit beyond the base model.
    struct PanicOnSiteKernel;

    impl RegressionKernel for PanicOnSiteKernel {
        type Fit = SweepLinearModel;

        fn fit(&self, terms: &[ModelTerm], y: &[f64]) -> Result<SweepLinearModel> {
            if terms.len() > 1 {
                panic!("refit of {} terms", terms.len());
            }
            SweepKernel.fit(terms, y)
        }
    }

    #[test]
    fn test_panicking_refit_pops_the_trial_term() {
        let sites = vec![site(0, "1", vec![0.0, 1.0, 2.0, 1.0]), site(1, "1", vec![2.0, 0.0, 1.0, 1.0])];
        let mut fs = ForwardSelection::new(sites, SelectionConfig::default(), PanicOnSiteKernel).unwrap();
        fs.reset_model(trait_data(vec![1.0, 2.5, 3.0, 2.0])).unwrap();

        let outcome = fs.fit_model();
        assert_eq!(outcome, StepOutcome::Failed("worker panicked".to_string()));
        assert_eq!(fs.model().len(), 1);
        assert!(fs.model().selected_terms().is_empty());
        assert!(fs.fitted_variants().is_empty());
        assert!(fs.steps().is_empty());
    }

    #[test]
    fn test_marker_effects_follow_base_columns() {
        let x: Vec<f32> = vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 1.0];
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| 3.0 + 1.5 * v as f64 + 0.01 * ((i * 7 % 5) as f64 - 2.0))
            .collect();
        let sites = vec![site(0, "1", x)];
        let config = SelectionConfig {
            enter_limit: 0.01,
            ..Default::default()
        };
        let mut fs = ForwardSelection::new(sites, config, SweepKernel).unwrap();
        fs.reset_model(trait_data(y)).unwrap();
        assert_eq!(fs.fit_model(), StepOutcome::Exhausted);
        let effects = fs.marker_effects().unwrap();
        assert_eq!(effects.len(), 1);
        assert!((effects[0].additive - 1.5).abs() < 0.05);
        assert!(effects[0].dominance.is_none());
    }
}
