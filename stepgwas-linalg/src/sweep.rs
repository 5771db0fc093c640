#![allow(clippy::needless_range_loop)]
//! The sweep operator on symmetric crossproduct matrices.
//!
//! Uses Goodnight's formulation: sweeping every pivot of a positive definite
//! matrix yields its inverse, and sweeping the leading p pivots of
//! `[X'X X'y; y'X y'y]` leaves the coefficients in the last column and the
//! residual sum of squares in the corner. Pivots that fall below
//! `SWEEP_TOLERANCE` times their reference diagonal are left unswept, which is
//! how aliased (linearly dependent) columns end up with zero degrees of freedom.

use crate::dense::DenseMatrix;
use thiserror::Error;

/// Relative pivot tolerance below which a column is treated as aliased.
pub const SWEEP_TOLERANCE: f64 = 1e-10;

#[derive(Error, Debug)]
pub enum LinalgError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Design has no columns")]
    EmptyDesign,

    #[error("Non-finite value encountered in {0}")]
    NonFinite(&'static str),
}

/// Sweep pivot `k` of `a` in place.
///
/// Returns false, leaving `a` untouched, when the pivot is not larger than
/// `SWEEP_TOLERANCE * reference`.
pub fn sweep(a: &mut DenseMatrix, k: usize, reference: f64) -> bool {
    let n = a.nrows();
    let d = a.get(k, k);
    if !(reference > 0.0 && d > SWEEP_TOLERANCE * reference) {
        return false;
    }

    for j in 0..n {
        a.set(k, j, a.get(k, j) / d);
    }
    for i in 0..n {
        if i == k {
            continue;
        }
        let b = a.get(i, k);
        if b == 0.0 {
            continue;
        }
        for j in 0..n {
            a.set(i, j, a.get(i, j) - b * a.get(k, j));
        }
        a.set(i, k, -b / d);
    }
    a.set(k, k, 1.0 / d);
    true
}

/// A generalized inverse produced by sweeping every pivot.
pub struct SweptInverse {
    /// The g2-inverse: rows and columns of unswept pivots are zero.
    pub inverse: DenseMatrix,
    /// Which pivots were swept.
    pub swept: Vec<bool>,
}

impl SweptInverse {
    /// Rank of the original matrix (number of swept pivots).
    pub fn rank(&self) -> usize {
        self.swept.iter().filter(|&&s| s).count()
    }

    /// Quadratic form v' A^- v.
    pub fn quadratic_form(&self, v: &[f64]) -> f64 {
        let av = self.inverse.mat_vec(v);
        DenseMatrix::dot(v, &av)
    }
}

/// Generalized inverse of a symmetric positive semi-definite matrix, using its
/// own diagonal as the pivot reference.
pub fn generalized_inverse(a: &DenseMatrix) -> SweptInverse {
    let reference: Vec<f64> = (0..a.nrows()).map(|i| a.get(i, i)).collect();
    generalized_inverse_with_reference(a, &reference)
}

/// Generalized inverse with explicit pivot references.
///
/// Used when `a` is a residualized crossproduct (e.g. Z'(I - H)Z), whose
/// diagonal can be vanishingly small relative to the raw Z'Z it came from.
pub fn generalized_inverse_with_reference(a: &DenseMatrix, reference: &[f64]) -> SweptInverse {
    let n = a.nrows();
    assert_eq!(n, a.ncols());
    assert_eq!(n, reference.len());

    let mut w = a.clone();
    let swept: Vec<bool> = (0..n).map(|k| sweep(&mut w, k, reference[k])).collect();
    for k in 0..n {
        if !swept[k] {
            for i in 0..n {
                w.set(i, k, 0.0);
                w.set(k, i, 0.0);
            }
        }
    }
    SweptInverse { inverse: w, swept }
}
