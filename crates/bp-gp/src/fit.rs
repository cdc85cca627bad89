//! Maximum a posteriori fitting of GP hyperparameters and mean parameters.
//!
//! The objective `(MLL + log prior) / n` is maximized with L-BFGS over the
//! concatenated raw vector. Gradients are central finite differences of the
//! cost, so any mean function plugs in without analytic derivatives.

use std::cell::RefCell;

use argmin::core::{CostFunction, Error, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use bp_types::{BpResult, GpError};
use finitediff::FiniteDiff;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gp::ExactGp;

type Theta = Vec<f64>;
type LineSearch = MoreThuenteLineSearch<Theta, Theta, f64>;
type Lbfgs = LBFGS<LineSearch, Theta, Theta, f64>;

/// Solver settings for hyperparameter fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub max_iters: u64,
    pub lbfgs_mem: usize,
    pub tol_grad: f64,
    pub tol_cost: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iters: 75,
            lbfgs_mem: 7,
            tol_grad: 1e-6,
            tol_cost: 1e-9,
        }
    }
}

impl FitConfig {
    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_lbfgs_mem(mut self, mem: usize) -> Self {
        self.lbfgs_mem = mem;
        self
    }

    pub fn with_tol_grad(mut self, tol: f64) -> Self {
        self.tol_grad = tol;
        self
    }

    pub fn with_tol_cost(mut self, tol: f64) -> Self {
        self.tol_cost = tol;
        self
    }
}

/// Outcome of one [`ExactGp::fit`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    pub iterations: u64,
    /// Objective before fitting.
    pub initial: f64,
    /// Objective at the parameters left in place.
    pub objective: f64,
    /// Whether the solver failed and the initial parameters were restored.
    pub restored: bool,
}

/// Exposes the negative fitting objective to `argmin`.
struct MapProblem<'a, 'm> {
    gp: RefCell<&'a mut ExactGp<'m>>,
}

impl CostFunction for MapProblem<'_, '_> {
    type Param = Theta;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let mut gp = self.gp.borrow_mut();
        gp.load_raw_parameters(theta)?;
        let value = gp.objective()?;
        if !value.is_finite() {
            return Err(GpError::FitFailed {
                message: format!("non-finite objective {value}"),
            }
            .into());
        }
        Ok(-value)
    }
}

impl Gradient for MapProblem<'_, '_> {
    type Param = Theta;
    type Gradient = Theta;

    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        // The finite-difference closure must return f64; stash the first error.
        let failure: RefCell<Option<Error>> = RefCell::new(None);
        let cost = |t: &Theta| -> f64 {
            match self.cost(t) {
                Ok(v) => v,
                Err(e) => {
                    let mut slot = failure.borrow_mut();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    f64::NAN
                }
            }
        };
        let grad = theta.central_diff(&cost);
        if let Some(err) = failure.into_inner() {
            return Err(err);
        }
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(GpError::FitFailed {
                message: "non-finite gradient".to_string(),
            }
            .into());
        }
        Ok(grad)
    }
}

fn run_lbfgs(
    gp: &mut ExactGp<'_>,
    theta0: Theta,
    config: &FitConfig,
) -> Result<(Theta, u64), Error> {
    let solver: Lbfgs = LBFGS::new(MoreThuenteLineSearch::new(), config.lbfgs_mem)
        .with_tolerance_grad(config.tol_grad)?
        .with_tolerance_cost(config.tol_cost)?;
    let problem = MapProblem {
        gp: RefCell::new(gp),
    };
    let result = Executor::new(problem, solver)
        .configure(|state| state.param(theta0).max_iters(config.max_iters))
        .run()?;
    let state = result.state();
    let best = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| Error::msg("solver finished without a best parameter"))?;
    Ok((best, state.get_iter()))
}

impl ExactGp<'_> {
    /// Fit every raw parameter (kernel, noise, mean) in place.
    ///
    /// A solver failure is not an error: it is logged and the parameters
    /// from before the call are restored.
    pub fn fit(&mut self, config: &FitConfig) -> BpResult<FitSummary> {
        let theta0 = self.raw_parameters();
        let initial = self.objective()?;

        match run_lbfgs(self, theta0.clone(), config) {
            Ok((best, iterations)) => {
                self.load_raw_parameters(&best)?;
                let objective = self.objective()?;
                debug!(
                    step = self.step(),
                    iterations,
                    initial,
                    objective,
                    "fitted GP hyperparameters"
                );
                Ok(FitSummary {
                    iterations,
                    initial,
                    objective,
                    restored: false,
                })
            }
            Err(err) => {
                warn!(
                    step = self.step(),
                    error = %err,
                    "GP fit failed, restoring previous parameters"
                );
                self.load_raw_parameters(&theta0)?;
                Ok(FitSummary {
                    iterations: 0,
                    initial,
                    objective: initial,
                    restored: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_mean::ConstantMean;
    use bp_calibration::MeanFunction;
    use ndarray::Array;

    fn data(n: usize) -> (ndarray::Array2<f64>, ndarray::Array2<f64>) {
        let x = Array::linspace(0.0, 1.0, n).into_shape_with_order((n, 1)).unwrap();
        let y = x.mapv(|v: f64| (4.0 * v).cos() + 0.5 * v);
        (x, y)
    }

    #[test]
    fn fit_does_not_worsen_objective() {
        let (x, y) = data(10);
        let mut mean = ConstantMean::new(1).unwrap();
        let mut gp = ExactGp::new(&mut mean, x, y.view(), 3).unwrap();
        let summary = gp.fit(&FitConfig::default().with_max_iters(30)).unwrap();
        assert!(summary.objective >= summary.initial - 1e-9);
        assert!((gp.objective().unwrap() - summary.objective).abs() < 1e-12);
    }

    #[test]
    fn fit_updates_the_borrowed_mean() {
        let (x, y) = data(10);
        let y = y.mapv(|v| v + 3.0);
        let mut mean = ConstantMean::new(1).unwrap();
        let before = mean.raw_parameters();
        {
            let mut gp = ExactGp::new(&mut mean, x, y.view(), 0).unwrap();
            let summary = gp.fit(&FitConfig::default()).unwrap();
            assert!(!summary.restored);
        }
        assert_ne!(mean.raw_parameters(), before);
    }

    #[test]
    fn config_roundtrips_defaults() {
        let cfg: FitConfig = serde_json::from_str(r#"{"max_iters": 10}"#).unwrap();
        assert_eq!(cfg, FitConfig::default().with_max_iters(10));
    }
}
