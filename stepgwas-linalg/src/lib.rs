//! stepgwas-linalg: Least-squares kernel for stepgwas
//!
//! Provides a faer-backed dense matrix, the sweep operator, and a
//! sweep-based linear model that fits an ordered list of design blocks
//! and reports sequential and marginal sums of squares per block.

pub mod dense;
pub mod linear_model;
pub mod sweep;

pub use dense::DenseMatrix;
pub use linear_model::{BlockTest, SweepLinearModel};
pub use sweep::LinalgError;
