//! Resampling inference for A/B tests.
//!
//! Stateful test sessions (Bayesian beta, empirical bootstrap, quantile
//! bootstrap, t resampling) share one seeded parallel engine with the
//! stateless permutation tests and the bootstrap/jackknife interval
//! estimators. Enable the `python` feature to build the extension module.

pub mod beta_bayes;
pub mod bootstrap_ci;
pub mod bootstrapping;
pub mod closed_form;
pub mod config;
pub mod did;
pub mod engine;
pub mod error;
pub mod format;
pub mod jackknife;
pub mod perm;
pub mod quantile_bootstrap;
pub mod session;
pub mod t_resampling;
pub mod tools;

#[cfg(feature = "python")]
mod python;

pub use beta_bayes::{BetaBayesTest, Prior};
pub use bootstrap_ci::{bootstrap_ci, bootstrap_wrapper, BootstrapCi, BootstrapCiOptions, CiMethod};
pub use bootstrapping::EmpiricalBootstrapTest;
pub use config::SessionConfig;
pub use did::{permutation_did, permutation_did_labeled, DidLabels, DidResult, DidValues};
pub use engine::{Parallelism, ResamplingEngine};
pub use error::{ResampleError, Result};
pub use jackknife::{jackknife_estimate, JackknifeEstimate};
pub use perm::{permutation_test, PermutationResult};
pub use quantile_bootstrap::QuantileBootstrapTest;
pub use session::{
    ChartData, ComputeOptions, SessionInput, TestParameters, TestReport, TestSession,
};
pub use t_resampling::TDistributionResamplingTest;
pub use tools::{ConfidenceInterval, Sidedness, Statistic};
