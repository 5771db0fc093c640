//! Property-based tests using proptest.
//!
//! These check laws that must hold for any input:
//!   - scoring a batch equals scoring its two halves and concatenating
//!   - the best site does not depend on where batches are split
//!   - permutation thresholds come from the sorted minima at floor(alpha * n)
//!   - the dominance column appears exactly at the heterozygote threshold

use proptest::prelude::*;
use rand::{Rng, SeedableRng};

use stepgwas_core::evaluator::{Evaluator, SiteBatch, SiteScore};
use stepgwas_core::permutation::threshold_from_minima;
use stepgwas_core::site::SiteCovariate;
use stepgwas_core::term::DominanceSettings;
use stepgwas_core::{AdditiveSite, Criterion, ModelTerm, RegressionKernel, SweepKernel};

fn random_sites(rng: &mut rand_chacha::ChaCha8Rng, n_sites: usize, n: usize) -> Vec<AdditiveSite> {
    (0..n_sites)
        .map(|j| {
            // every fifth site is constant and scores undefined
            let values = if j % 5 == 4 {
                vec![1.0; n]
            } else {
                (0..n).map(|_| rng.gen_range(0..3) as f32).collect()
            };
            AdditiveSite::new(
                j,
                "1",
                j as u64,
                format!("s{}", j),
                Criterion::Pval,
                SiteCovariate::ReferenceProbability(values),
            )
        })
        .collect()
}

fn key(s: &Option<SiteScore>) -> Option<(usize, u64)> {
    s.map(|s| (s.site, s.value.to_bits()))
}

fn criterion_strategy() -> impl Strategy<Value = Criterion> {
    prop_oneof![
        Just(Criterion::Pval),
        Just(Criterion::Aic),
        Just(Criterion::Bic),
        Just(Criterion::Mbic),
    ]
}

// ---------------------------------------------------------------------------
// 1. Concatenation law
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn prop_split_scores_concatenate(
        n_sites in 1usize..30,
        split in 0usize..30,
        criterion in criterion_strategy(),
        seed in 0u64..1000,
    ) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let n = 15;
        let y: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 3.0).collect();
        let sites = random_sites(&mut rng, n_sites, n);
        let selected: Vec<bool> = (0..n_sites).map(|_| rng.gen_bool(0.2)).collect();
        let k = split.min(n_sites);

        let fit = SweepKernel.fit(&[ModelTerm::mean(n)], &y).unwrap();
        let ev = Evaluator::new(&fit, criterion, n_sites);
        let batch = SiteBatch::new(&sites, &selected);
        let whole = batch.score_all(&ev).unwrap();

        let (left, right) = batch.split_at(k);
        prop_assert_eq!(right.offset(), k);
        let mut joined = left.score_all(&ev).unwrap();
        joined.extend(right.score_all(&ev).unwrap());

        prop_assert_eq!(whole.len(), joined.len());
        for (a, b) in whole.iter().zip(&joined) {
            prop_assert_eq!(key(a), key(b));
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Determinism under splitting
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_best_is_split_independent(
        n_sites in 1usize..60,
        min_split in 1usize..10,
        criterion in criterion_strategy(),
        seed in 0u64..1000,
    ) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let n = 20;
        let y: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        let sites = random_sites(&mut rng, n_sites, n);
        let selected = vec![false; n_sites];

        let fit = SweepKernel.fit(&[ModelTerm::mean(n)], &y).unwrap();
        let ev = Evaluator::new(&fit, criterion, n_sites);
        let batch = SiteBatch::new(&sites, &selected);

        let sequential = batch.best(&ev).unwrap();
        let parallel = batch.best_parallel_with_split(&ev, min_split).unwrap();
        prop_assert_eq!(key(&sequential), key(&parallel));
        if let Some(best) = sequential {
            prop_assert!(best.is_defined());
            prop_assert!(best.site % 5 != 4);
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Calibration law
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_threshold_is_alpha_quantile_of_minima(
        minima in prop::collection::vec(0.0f64..1.0, 1..200),
        alpha in 0.001f64..0.5,
    ) {
        let n = minima.len();
        let mut sorted = minima.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let result = threshold_from_minima(minima, alpha).unwrap();
        let index = ((alpha * n as f64).floor() as usize).min(n - 1);
        prop_assert_eq!(&result.min_p, &sorted);
        prop_assert_eq!(result.threshold.enter_limit, sorted[index]);
        prop_assert_eq!(result.threshold.exit_limit, 2.0 * result.threshold.enter_limit);
    }
}

// ---------------------------------------------------------------------------
// 4. Dominance inclusion boundary
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_dominance_column_at_threshold(
        min_hets in 1usize..40,
        homozygotes in 4usize..40,
        impute in any::<bool>(),
    ) {
        let settings = DominanceSettings { min_hets, impute };
        let genotypes = |hets: usize| -> Vec<f64> {
            (0..hets + homozygotes)
                .map(|i| if i < hets { 1.0 } else if i % 2 == 0 { 0.0 } else { 2.0 })
                .collect()
        };
        let below = ModelTerm::additive_dominance(0, genotypes(min_hets - 1), settings);
        let at = ModelTerm::additive_dominance(0, genotypes(min_hets), settings);
        prop_assert_eq!(below.number_of_levels(), 1);
        prop_assert_eq!(at.number_of_levels(), 2);
    }
}
