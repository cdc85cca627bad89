//! # bp-gp
//!
//! Exact Gaussian-process regression used by the BO loop: a scaled
//! Matérn-5/2 kernel, Gaussian noise, a pluggable prior mean and MAP fitting
//! of every hyperparameter and calibration parameter.

mod constant_mean;
mod fit;
mod gp;
mod kernel;
mod likelihood;

pub use constant_mean::ConstantMean;
pub use fit::{FitConfig, FitSummary};
pub use gp::{cholesky_with_jitter, ExactGp, Posterior};
pub use kernel::Matern52Kernel;
pub use likelihood::{GaussianLikelihood, MIN_NOISE};
