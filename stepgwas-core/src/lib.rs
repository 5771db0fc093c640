//! stepgwas-core: Parallel forward-selection engine for stepwise GWAS models
//!
//! Implements candidate sites, additive and additive+dominance model terms,
//! parallel site scoring, the forward selection driver, permutation
//! calibration of the entry threshold, support-interval scanning, the paired
//! site store and tab-delimited reports.

pub mod config;
pub mod evaluator;
pub mod interval;
pub mod kernel;
pub mod model;
pub mod permutation;
pub mod report;
pub mod selection;
pub mod site;
pub mod stats;
pub mod store;
pub mod term;

pub use config::SelectionConfig;
pub use kernel::{FittedModel, RegressionKernel, SweepKernel};
pub use model::Model;
pub use selection::{ForwardSelection, StepOutcome, TraitData};
pub use site::{build_site_list, AdditiveSite, Criterion};
pub use term::ModelTerm;
