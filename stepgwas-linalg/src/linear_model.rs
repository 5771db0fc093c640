#![allow(clippy::needless_range_loop)]
//! Fixed-effect linear model fitted by sweeping an augmented crossproduct.
//!
//! Blocks are swept in the order given, so `incremental_ss_df(k)` is the
//! sequential (type I) sum of squares of block k given blocks 0..k. Sums of
//! squares are uncorrected: a model that should include an intercept carries
//! it as an explicit leading block.

use std::ops::Range;

use crate::dense::DenseMatrix;
use crate::sweep::{generalized_inverse, generalized_inverse_with_reference, sweep, LinalgError};

/// Test of one block of columns: its sum of squares and the error term it is
/// tested against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockTest {
    pub ss: f64,
    pub df: f64,
    pub error_ss: f64,
    pub error_df: f64,
}

/// A least-squares fit of `y` on the column-concatenation of ordered blocks.
#[derive(Debug, Clone)]
pub struct SweepLinearModel {
    x: DenseMatrix,
    y: Vec<f64>,
    blocks: Vec<Range<usize>>,
    swept: Vec<bool>,
    /// Generalized inverse of X'X (zero rows/columns for aliased columns).
    g: DenseMatrix,
    beta: Vec<f64>,
    incremental: Vec<(f64, f64)>,
    total_ss: f64,
    residual_ss: f64,
    residual_df: f64,
    rank: usize,
}

impl SweepLinearModel {
    /// Fit `y` against the given design blocks.
    pub fn fit(blocks: &[&DenseMatrix], y: &[f64]) -> Result<Self, LinalgError> {
        if blocks.is_empty() {
            return Err(LinalgError::EmptyDesign);
        }
        let n = y.len();
        for b in blocks {
            if b.nrows() != n {
                return Err(LinalgError::DimensionMismatch {
                    expected: n,
                    got: b.nrows(),
                });
            }
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::NonFinite("response"));
        }

        let x = DenseMatrix::hconcat(blocks);
        let p = x.ncols();
        if p == 0 {
            return Err(LinalgError::EmptyDesign);
        }

        let mut ranges = Vec::with_capacity(blocks.len());
        let mut start = 0;
        for b in blocks {
            ranges.push(start..start + b.ncols());
            start += b.ncols();
        }

        // Augmented crossproduct [X'X X'y; y'X y'y]
        let xtx = x.crossproduct();
        let xty = x.t_mat_vec(y);
        let yty = DenseMatrix::dot(y, y);
        let mut a = DenseMatrix::zeros(p + 1, p + 1);
        for i in 0..p {
            for j in 0..p {
                a.set(i, j, xtx.get(i, j));
            }
            a.set(i, p, xty[i]);
            a.set(p, i, xty[i]);
        }
        a.set(p, p, yty);
        if (0..p).any(|i| !xtx.get(i, i).is_finite()) {
            return Err(LinalgError::NonFinite("design matrix"));
        }

        let reference: Vec<f64> = (0..p).map(|i| xtx.get(i, i)).collect();
        let mut swept = vec![false; p];
        let mut incremental = Vec::with_capacity(ranges.len());
        let mut previous_rss = yty;
        for range in &ranges {
            let mut df = 0usize;
            for k in range.clone() {
                swept[k] = sweep(&mut a, k, reference[k]);
                if swept[k] {
                    df += 1;
                }
            }
            let rss = a.get(p, p);
            incremental.push((previous_rss - rss, df as f64));
            previous_rss = rss;
        }

        let rank = swept.iter().filter(|&&s| s).count();
        let mut g = DenseMatrix::zeros(p, p);
        let mut beta = vec![0.0; p];
        for i in 0..p {
            if !swept[i] {
                continue;
            }
            beta[i] = a.get(i, p);
            for j in 0..p {
                if swept[j] {
                    g.set(i, j, a.get(i, j));
                }
            }
        }

        Ok(Self {
            x,
            y: y.to_vec(),
            blocks: ranges,
            swept,
            g,
            beta,
            incremental,
            total_ss: yty,
            residual_ss: a.get(p, p).max(0.0),
            residual_df: n as f64 - rank as f64,
            rank,
        })
    }

    /// Number of blocks in the model.
    pub fn number_of_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of observations.
    pub fn number_of_observations(&self) -> usize {
        self.y.len()
    }

    /// Residual sum of squares and degrees of freedom.
    pub fn residual_ss_df(&self) -> (f64, f64) {
        (self.residual_ss, self.residual_df)
    }

    /// Sequential sum of squares and df of `block` given all earlier blocks.
    pub fn incremental_ss_df(&self, block: usize) -> (f64, f64) {
        self.incremental[block]
    }

    /// Model sum of squares (uncorrected) and model rank.
    pub fn full_model_ss_df(&self) -> (f64, f64) {
        (self.total_ss - self.residual_ss, self.rank as f64)
    }

    /// Sum of squares and df of `block` given every other block in the model.
    pub fn marginal_ss_df(&self, block: usize) -> (f64, f64) {
        let idx = self.swept_columns(block);
        self.block_wald(&idx, &self.beta)
    }

    /// Coefficients, zero for aliased columns.
    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    /// Generalized inverse of X'X.
    pub fn inverse_of_xtx(&self) -> &DenseMatrix {
        &self.g
    }

    /// Fitted values X * beta.
    pub fn predicted_values(&self) -> Vec<f64> {
        self.x.mat_vec(&self.beta)
    }

    /// Residuals y - X * beta.
    pub fn residuals(&self) -> Vec<f64> {
        let yhat = self.predicted_values();
        self.y.iter().zip(yhat.iter()).map(|(y, f)| y - f).collect()
    }

    /// Test a new block `z` as if it were appended to this model, without
    /// refitting: SS = (Z'e)' [Z'(I - H)Z]^- (Z'e).
    pub fn test_new_block(&self, z: &DenseMatrix) -> Result<BlockTest, LinalgError> {
        let n = self.y.len();
        if z.nrows() != n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: z.nrows(),
            });
        }
        let q = z.ncols();
        if q == 0 {
            return Ok(BlockTest {
                ss: 0.0,
                df: 0.0,
                error_ss: self.residual_ss,
                error_df: self.residual_df,
            });
        }

        let e = self.residuals();
        let ztz = z.crossproduct();
        let xtz = self.x.cross(z);
        let gxtz = self.g.mat_mul(&xtz);
        let mut m = DenseMatrix::zeros(q, q);
        for i in 0..q {
            for j in 0..q {
                let mut s = 0.0;
                for k in 0..xtz.nrows() {
                    s += xtz.get(k, i) * gxtz.get(k, j);
                }
                m.set(i, j, ztz.get(i, j) - s);
            }
        }
        let reference: Vec<f64> = (0..q).map(|i| ztz.get(i, i)).collect();
        if reference.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::NonFinite("new block"));
        }
        let minv = generalized_inverse_with_reference(&m, &reference);
        let zte = z.t_mat_vec(&e);
        let ss = minv.quadratic_form(&zte).max(0.0);
        let df = minv.rank() as f64;

        Ok(BlockTest {
            ss,
            df,
            error_ss: (self.residual_ss - ss).max(0.0),
            error_df: self.residual_df - df,
        })
    }

    /// Marginal test of `block` for another response with the same design,
    /// reusing this fit's inverse: beta* = G X'y*.
    pub fn retest_block(&self, block: usize, y: &[f64]) -> Result<BlockTest, LinalgError> {
        if y.len() != self.y.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.y.len(),
                got: y.len(),
            });
        }
        let xty = self.x.t_mat_vec(y);
        let beta = self.g.mat_vec(&xty);
        let error_ss = (DenseMatrix::dot(y, y) - DenseMatrix::dot(&beta, &xty)).max(0.0);
        let idx = self.swept_columns(block);
        let (ss, df) = self.block_wald(&idx, &beta);
        Ok(BlockTest {
            ss,
            df,
            error_ss,
            error_df: self.residual_df,
        })
    }

    fn swept_columns(&self, block: usize) -> Vec<usize> {
        self.blocks[block].clone().filter(|&k| self.swept[k]).collect()
    }

    /// b_k' (G_kk)^- b_k over the given columns.
    fn block_wald(&self, idx: &[usize], beta: &[f64]) -> (f64, f64) {
        if idx.is_empty() {
            return (0.0, 0.0);
        }
        let gkk = self.g.principal_submatrix(idx);
        let inv = generalized_inverse(&gkk);
        let bk: Vec<f64> = idx.iter().map(|&k| beta[k]).collect();
        (inv.quadratic_form(&bk).max(0.0), inv.rank() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> DenseMatrix {
        DenseMatrix::from_col_major(n, 1, vec![1.0; n])
    }

    #[test]
    fn test_simple_regression() {
        let y = [1.0, 3.0, 2.0, 5.0, 4.0];
        let xv = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mean = ones(5);
        let x = DenseMatrix::from_col_major(5, 1, xv.to_vec());
        let fit = SweepLinearModel::fit(&[&mean, &x], &y).unwrap();

        // slope = Sxy / Sxx = 8 / 10, intercept = 3 - 0.8 * 3
        assert!((fit.beta()[1] - 0.8).abs() < 1e-10);
        assert!((fit.beta()[0] - 0.6).abs() < 1e-10);

        // SS total corrected = 10, SS regression = 6.4
        let (ss_x, df_x) = fit.incremental_ss_df(1);
        assert!((ss_x - 6.4).abs() < 1e-10);
        assert_eq!(df_x, 1.0);
        let (rss, rdf) = fit.residual_ss_df();
        assert!((rss - 3.6).abs() < 1e-10);
        assert_eq!(rdf, 3.0);

        // last block: marginal == incremental
        let (m_ss, m_df) = fit.marginal_ss_df(1);
        assert!((m_ss - ss_x).abs() < 1e-10);
        assert_eq!(m_df, 1.0);
    }

    #[test]
    fn test_aliased_block_has_zero_df() {
        let y = [1.0, 2.0, 4.0, 3.0];
        let mean = ones(4);
        let constant = DenseMatrix::from_col_major(4, 1, vec![7.0; 4]);
        let fit = SweepLinearModel::fit(&[&mean, &constant], &y).unwrap();
        let (ss, df) = fit.incremental_ss_df(1);
        assert_eq!(df, 0.0);
        assert!(ss.abs() < 1e-9);
        assert_eq!(fit.beta()[1], 0.0);
    }

    #[test]
    fn test_new_block_matches_refit() {
        let y = [2.0, 1.0, 4.0, 3.0, 6.0, 5.0, 8.0];
        let mean = ones(7);
        let z = DenseMatrix::from_col_major(7, 1, vec![0.0, 1.0, 1.0, 2.0, 0.0, 2.0, 1.0]);
        let base = SweepLinearModel::fit(&[&mean], &y).unwrap();
        let test = base.test_new_block(&z).unwrap();

        let full = SweepLinearModel::fit(&[&mean, &z], &y).unwrap();
        let (ss, df) = full.incremental_ss_df(1);
        let (rss, rdf) = full.residual_ss_df();
        assert!((test.ss - ss).abs() < 1e-9);
        assert_eq!(test.df, df);
        assert!((test.error_ss - rss).abs() < 1e-9);
        assert_eq!(test.error_df, rdf);
    }

    #[test]
    fn test_retest_block_matches_refit_on_new_response() {
        let mean = ones(6);
        let z = DenseMatrix::from_col_major(6, 1, vec![0.0, 1.0, 2.0, 1.0, 0.0, 2.0]);
        let y1 = [1.0, 2.0, 3.0, 2.5, 1.5, 3.5];
        let y2 = [3.0, 1.0, 0.5, 2.0, 2.0, 1.0];
        let fit1 = SweepLinearModel::fit(&[&mean, &z], &y1).unwrap();
        let fit2 = SweepLinearModel::fit(&[&mean, &z], &y2).unwrap();

        let retest = fit1.retest_block(1, &y2).unwrap();
        let (ss2, df2) = fit2.marginal_ss_df(1);
        let (rss2, _) = fit2.residual_ss_df();
        assert!((retest.ss - ss2).abs() < 1e-9);
        assert_eq!(retest.df, df2);
        assert!((retest.error_ss - rss2).abs() < 1e-9);
    }

    /// Additive 0/1/2 column and its 1 - |a - 1| dominance column.
    fn additive_dominance(a: &[f64]) -> DenseMatrix {
        let d: Vec<f64> = a.iter().map(|v| 1.0 - (v - 1.0).abs()).collect();
        DenseMatrix::from_columns(a.len(), &[a, d.as_slice()])
    }

    #[test]
    fn test_two_column_block_matches_refit() {
        let a = [0.0, 1.0, 2.0, 1.0, 0.0, 2.0, 1.0, 2.0, 0.0];
        let y = [1.0, 4.5, 2.0, 3.5, 0.5, 2.5, 4.0, 1.5, 1.2];
        let y2 = [2.0, 1.0, 3.0, 0.5, 2.5, 1.0, 1.5, 3.5, 0.0];
        let mean = ones(9);
        let z = additive_dominance(&a);

        let base = SweepLinearModel::fit(&[&mean], &y).unwrap();
        let test = base.test_new_block(&z).unwrap();
        let full = SweepLinearModel::fit(&[&mean, &z], &y).unwrap();
        let (ss, df) = full.incremental_ss_df(1);
        let (rss, rdf) = full.residual_ss_df();
        assert_eq!(df, 2.0);
        assert!((test.ss - ss).abs() < 1e-9);
        assert_eq!(test.df, 2.0);
        assert!((test.error_ss - rss).abs() < 1e-9);
        assert_eq!(test.error_df, rdf);

        let retest = full.retest_block(1, &y2).unwrap();
        let refit = SweepLinearModel::fit(&[&mean, &z], &y2).unwrap();
        let (ss2, df2) = refit.marginal_ss_df(1);
        let (rss2, rdf2) = refit.residual_ss_df();
        assert_eq!(df2, 2.0);
        assert!((retest.ss - ss2).abs() < 1e-9);
        assert_eq!(retest.df, df2);
        assert!((retest.error_ss - rss2).abs() < 1e-9);
        assert_eq!(retest.error_df, rdf2);
    }

    #[test]
    fn test_predicted_plus_residuals_is_response() {
        let y = [1.0, 4.0, 2.0, 8.0];
        let mean = ones(4);
        let x = DenseMatrix::from_col_major(4, 1, vec![0.0, 1.0, 0.0, 2.0]);
        let fit = SweepLinearModel::fit(&[&mean, &x], &y).unwrap();
        let yhat = fit.predicted_values();
        let e = fit.residuals();
        for i in 0..4 {
            assert!((yhat[i] + e[i] - y[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_empty_design_is_error() {
        assert!(SweepLinearModel::fit(&[], &[1.0, 2.0]).is_err());
    }
}
