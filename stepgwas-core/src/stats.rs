//! Test statistics and information criteria.

use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::site::Criterion;

/// Term df or residual SS below this leaves F and p undefined.
pub const UNDEFINED_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FTest {
    pub f: f64,
    pub p: f64,
}

/// F-test of a term against an error term. `None` when undefined.
pub fn f_test(ss: f64, df: f64, error_ss: f64, error_df: f64) -> Option<FTest> {
    if df < UNDEFINED_FLOOR || error_ss < UNDEFINED_FLOOR || error_df < 1.0 {
        return None;
    }
    let f = ss / df / error_ss * error_df;
    if !f.is_finite() || f < 0.0 {
        return None;
    }
    let dist = FisherSnedecor::new(df, error_df).ok()?;
    let p = dist.sf(f).clamp(0.0, 1.0);
    Some(FTest { f, p })
}

/// -log10(p); infinite for p = 0.
pub fn neg_log10(p: f64) -> f64 {
    -p.log10()
}

pub fn aic(rss: f64, n: f64, k: f64) -> f64 {
    n * (rss / n).ln() + 2.0 * k
}

pub fn bic(rss: f64, n: f64, k: f64) -> f64 {
    n * (rss / n).ln() + n.ln() * k
}

/// BIC plus 2k ln(nSites / 2.2 - 1), with the log argument floored at 1.
pub fn mbic(rss: f64, n: f64, k: f64, n_sites: usize) -> f64 {
    let extra = (n_sites as f64 / 2.2 - 1.0).max(1.0).ln();
    bic(rss, n, k) + 2.0 * k * extra
}

/// Value of an information criterion; NaN for `Pval` or when RSS is degenerate.
pub fn information_criterion(criterion: Criterion, rss: f64, n: f64, k: f64, n_sites: usize) -> f64 {
    if rss < UNDEFINED_FLOOR {
        return f64::NAN;
    }
    match criterion {
        Criterion::Pval => f64::NAN,
        Criterion::Aic => aic(rss, n, k),
        Criterion::Bic => bic(rss, n, k),
        Criterion::Mbic => mbic(rss, n, k, n_sites),
    }
}
