//! The regression kernel seam.
//!
//! Drivers fit an ordered list of terms through a `RegressionKernel` and read
//! sums of squares back from the resulting `FittedModel`. The default kernel
//! is the sweep-operator least-squares fit from stepgwas-linalg.

use anyhow::Result;
use stepgwas_linalg::{BlockTest, DenseMatrix, SweepLinearModel};

use crate::term::ModelTerm;

/// A least-squares fit of a response on an ordered list of terms.
///
/// Sums of squares are returned as `(ss, df)` pairs.
pub trait FittedModel: Send + Sync {
    fn residual_ss_df(&self) -> (f64, f64);

    /// SS of term `k` given terms `0..k`.
    fn incremental_ss_df(&self, term: usize) -> (f64, f64);

    /// SS of term `k` given every other term.
    fn marginal_ss_df(&self, term: usize) -> (f64, f64);

    /// Uncorrected model SS and the model rank.
    fn full_model_ss_df(&self) -> (f64, f64);

    fn beta(&self) -> &[f64];

    fn inverse_of_xtx(&self) -> &DenseMatrix;

    fn predicted_values(&self) -> Vec<f64>;

    fn residuals(&self) -> Vec<f64>;

    /// Test `term` as if appended to this model, without refitting.
    fn test_new_term(&self, term: &ModelTerm) -> Result<BlockTest>;

    /// Marginal test of term `k` against another response with the same design.
    fn retest_term(&self, term: usize, y: &[f64]) -> Result<BlockTest>;
}

/// Fits term lists against a response.
pub trait RegressionKernel: Send + Sync {
    type Fit: FittedModel;

    fn fit(&self, terms: &[ModelTerm], y: &[f64]) -> Result<Self::Fit>;
}

/// Sweep-operator kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepKernel;

impl RegressionKernel for SweepKernel {
    type Fit = SweepLinearModel;

    fn fit(&self, terms: &[ModelTerm], y: &[f64]) -> Result<SweepLinearModel> {
        let blocks: Vec<&DenseMatrix> = terms.iter().map(|t| t.design()).collect();
        Ok(SweepLinearModel::fit(&blocks, y)?)
    }
}

impl FittedModel for SweepLinearModel {
    fn residual_ss_df(&self) -> (f64, f64) {
        SweepLinearModel::residual_ss_df(self)
    }

    fn incremental_ss_df(&self, term: usize) -> (f64, f64) {
        SweepLinearModel::incremental_ss_df(self, term)
    }

    fn marginal_ss_df(&self, term: usize) -> (f64, f64) {
        SweepLinearModel::marginal_ss_df(self, term)
    }

    fn full_model_ss_df(&self) -> (f64, f64) {
        SweepLinearModel::full_model_ss_df(self)
    }

    fn beta(&self) -> &[f64] {
        SweepLinearModel::beta(self)
    }

    fn inverse_of_xtx(&self) -> &DenseMatrix {
        SweepLinearModel::inverse_of_xtx(self)
    }

    fn predicted_values(&self) -> Vec<f64> {
        SweepLinearModel::predicted_values(self)
    }

    fn residuals(&self) -> Vec<f64> {
        SweepLinearModel::residuals(self)
    }

    fn test_new_term(&self, term: &ModelTerm) -> Result<BlockTest> {
        Ok(self.test_new_block(term.design())?)
    }

    fn retest_term(&self, term: usize, y: &[f64]) -> Result<BlockTest> {
        Ok(self.retest_block(term, y)?)
    }
}
