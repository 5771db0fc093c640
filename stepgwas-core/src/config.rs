//! Forward-selection configuration.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::site::Criterion;
use crate::term::{DominanceSettings, MIN_HETS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// A term enters when its p-value is at most this (p-value criterion).
    pub enter_limit: f64,
    /// Reported with the enter limit; set to twice it by the permutation test.
    pub exit_limit: f64,
    /// Maximum number of selected terms per trait.
    pub max_variants: usize,
    pub criterion: Criterion,
    /// Fit additive+dominance site terms instead of additive-only.
    pub dominance: bool,
    pub min_hets: usize,
    pub impute_dominance: bool,
    /// Calibrate the enter limit by permutation before selection.
    pub permutation_test: bool,
    pub permutations: usize,
    pub permutation_alpha: f64,
    /// Run the support-interval scan after selection.
    pub scan_intervals: bool,
    pub interval_alpha: f64,
    /// Report residuals of per-chromosome models.
    pub chromosome_residuals: bool,
    /// Number of resampling refits per trait (0 = none).
    pub resamples: usize,
    pub resample_fraction: f64,
    /// Worker threads for a dedicated pool (0 = ambient rayon pool).
    pub max_threads: usize,
    pub seed: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            enter_limit: 1e-5,
            exit_limit: 2e-5,
            max_variants: 100,
            criterion: Criterion::Pval,
            dominance: false,
            min_hets: MIN_HETS,
            impute_dominance: true,
            permutation_test: false,
            permutations: 1000,
            permutation_alpha: 0.05,
            scan_intervals: false,
            interval_alpha: 0.05,
            chromosome_residuals: false,
            resamples: 0,
            resample_fraction: 0.8,
            max_threads: 0,
            seed: 12345,
        }
    }
}

impl SelectionConfig {
    /// Dominance coding for site terms, or None for additive-only terms.
    pub fn dominance_settings(&self) -> Option<DominanceSettings> {
        self.dominance.then_some(DominanceSettings {
            min_hets: self.min_hets,
            impute: self.impute_dominance,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.enter_limit > 0.0 && self.enter_limit <= 1.0) {
            bail!("enter limit must be in (0, 1], got {}", self.enter_limit);
        }
        if self.permutation_test {
            if self.permutations == 0 {
                bail!("permutation test requires at least one permutation");
            }
            if !(self.permutation_alpha > 0.0 && self.permutation_alpha < 1.0) {
                bail!(
                    "permutation alpha must be in (0, 1), got {}",
                    self.permutation_alpha
                );
            }
        }
        if !(self.interval_alpha > 0.0 && self.interval_alpha <= 1.0) {
            bail!("interval alpha must be in (0, 1], got {}", self.interval_alpha);
        }
        if self.resamples > 0 && !(self.resample_fraction > 0.0 && self.resample_fraction <= 1.0) {
            bail!(
                "resample fraction must be in (0, 1], got {}",
                self.resample_fraction
            );
        }
        Ok(())
    }

    /// Save a JSON sidecar of the configuration used.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write configuration: {}", path.display()))
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse configuration: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SelectionConfig::default();
        assert_eq!(c.enter_limit, 1e-5);
        assert_eq!(c.exit_limit, 2e-5);
        assert_eq!(c.max_variants, 100);
        assert_eq!(c.min_hets, 20);
        assert!(c.dominance_settings().is_none());
        c.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let c = SelectionConfig {
            permutation_test: true,
            permutation_alpha: 1.5,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = SelectionConfig {
            enter_limit: 0.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_json_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let c = SelectionConfig {
            criterion: Criterion::Mbic,
            dominance: true,
            ..Default::default()
        };
        c.save_json(&path).unwrap();
        let loaded = SelectionConfig::load_json(&path).unwrap();
        assert_eq!(loaded, c);
        assert_eq!(loaded.dominance_settings().map(|d| d.min_hets), Some(20));
    }
}
