//! Analytic acquisition functions and their maximization over the unit cube.

use bp_gp::Posterior;
use bp_types::{BpResult, ExperimentError};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::search::unit_cube_samples;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Which acquisition function guides the next query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcquisitionConfig {
    ExpectedImprovement,
    UpperConfidenceBound { beta: f64 },
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig::ExpectedImprovement
    }
}

impl AcquisitionConfig {
    /// Parse a short name (`EI` or `UCB`, case-insensitive).
    pub fn from_name(name: &str, beta: f64) -> Result<Self, ExperimentError> {
        match name.to_ascii_lowercase().as_str() {
            "ei" => Ok(AcquisitionConfig::ExpectedImprovement),
            "ucb" => Ok(AcquisitionConfig::UpperConfidenceBound { beta }),
            _ => Err(ExperimentError::UnknownAcquisition {
                name: name.to_string(),
            }),
        }
    }

    /// Directory label used in output paths.
    pub fn label(&self) -> &'static str {
        match self {
            AcquisitionConfig::ExpectedImprovement => "EI",
            AcquisitionConfig::UpperConfidenceBound { .. } => "UCB",
        }
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        match *self {
            AcquisitionConfig::UpperConfidenceBound { beta } if !(beta.is_finite() && beta >= 0.0) => {
                Err(ExperimentError::InvalidConfig {
                    message: format!("UCB beta must be finite and non-negative, got {beta}"),
                })
            }
            _ => Ok(()),
        }
    }
}

/// An acquisition function bound to the current incumbent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition {
    ExpectedImprovement { best_f: f64 },
    UpperConfidenceBound { beta: f64 },
}

impl Acquisition {
    pub fn new(config: AcquisitionConfig, best_f: f64) -> Self {
        match config {
            AcquisitionConfig::ExpectedImprovement => Acquisition::ExpectedImprovement { best_f },
            AcquisitionConfig::UpperConfidenceBound { beta } => {
                Acquisition::UpperConfidenceBound { beta }
            }
        }
    }

    /// Acquisition value for every point of a posterior batch.
    pub fn evaluate(&self, posterior: &Posterior) -> Array1<f64> {
        let std = posterior.std();
        match *self {
            Acquisition::ExpectedImprovement { best_f } => posterior
                .mean
                .iter()
                .zip(std.iter())
                .map(|(&mu, &sigma)| expected_improvement(mu, sigma, best_f))
                .collect(),
            Acquisition::UpperConfidenceBound { beta } => {
                &posterior.mean + &(std * beta.sqrt())
            }
        }
    }
}

fn expected_improvement(mu: f64, sigma: f64, best_f: f64) -> f64 {
    let gain = mu - best_f;
    if sigma <= 0.0 {
        return gain.max(0.0);
    }
    let z = gain / sigma;
    let cdf = 0.5 * erfc(-z / std::f64::consts::SQRT_2);
    let pdf = INV_SQRT_2PI * (-0.5 * z * z).exp();
    (gain * cdf + sigma * pdf).max(0.0)
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Random-restart local search over `[0, 1]^dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionOptimizer {
    /// Uniform candidates drawn in the first phase.
    pub n_candidates: usize,
    /// Best candidates kept for local refinement.
    pub n_starts: usize,
    /// Perturbations per start and round.
    pub n_perturb: usize,
    pub n_rounds: usize,
    pub initial_radius: f64,
    pub shrink: f64,
}

impl Default for AcquisitionOptimizer {
    fn default() -> Self {
        Self {
            n_candidates: 512,
            n_starts: 5,
            n_perturb: 32,
            n_rounds: 6,
            initial_radius: 0.1,
            shrink: 0.5,
        }
    }
}

impl AcquisitionOptimizer {
    pub fn with_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub fn with_rounds(mut self, n: usize) -> Self {
        self.n_rounds = n;
        self
    }

    pub fn with_radius(mut self, initial_radius: f64, shrink: f64) -> Self {
        self.initial_radius = initial_radius;
        self.shrink = shrink;
        self
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        let invalid = |message: String| Err(ExperimentError::InvalidConfig { message });
        if self.n_candidates == 0 {
            return invalid("acquisition optimizer needs at least one candidate".to_string());
        }
        if !(self.initial_radius.is_finite() && self.initial_radius >= 0.0) {
            return invalid(format!(
                "initial_radius must be finite and non-negative, got {}",
                self.initial_radius
            ));
        }
        if !(self.shrink.is_finite() && self.shrink > 0.0 && self.shrink <= 1.0) {
            return invalid(format!("shrink must lie in (0, 1], got {}", self.shrink));
        }
        Ok(())
    }

    /// Maximize `f` over the unit cube. `f` maps a `(B, dim)` batch to `B`
    /// values; non-finite values never win.
    pub fn maximize<F, R>(&self, dim: usize, rng: &mut R, f: F) -> BpResult<(Array1<f64>, f64)>
    where
        F: Fn(ArrayView2<'_, f64>) -> BpResult<Array1<f64>>,
        R: Rng,
    {
        self.validate()?;
        let candidates = unit_cube_samples(self.n_candidates.max(1), dim, rng);
        let values = sanitize(f(candidates.view())?);

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
        let n_starts = self.n_starts.clamp(1, order.len());
        let mut starts: Vec<(Array1<f64>, f64)> = order[..n_starts]
            .iter()
            .map(|&i| (candidates.row(i).to_owned(), values[i]))
            .collect();

        let mut radius = self.initial_radius;
        for _ in 0..self.n_rounds {
            let n_perturb = self.n_perturb.max(1);
            let mut batch = Array2::zeros((starts.len() * n_perturb, dim));
            for (s, (center, _)) in starts.iter().enumerate() {
                for p in 0..n_perturb {
                    let mut row = batch.row_mut(s * n_perturb + p);
                    for (slot, &c) in row.iter_mut().zip(center.iter()) {
                        *slot = (c + rng.random_range(-radius..=radius)).clamp(0.0, 1.0);
                    }
                }
            }
            let batch_values = sanitize(f(batch.view())?);
            for (s, (center, best)) in starts.iter_mut().enumerate() {
                let chunk = batch_values.slice(ndarray::s![s * n_perturb..(s + 1) * n_perturb]);
                if let Some((p, &v)) = chunk
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                {
                    if v > *best {
                        *best = v;
                        *center = batch.row(s * n_perturb + p).to_owned();
                    }
                }
            }
            radius *= self.shrink;
        }

        starts
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| bp_types::internal_error!("acquisition optimizer produced no candidate"))
    }
}

fn sanitize(values: Array1<f64>) -> Array1<f64> {
    values.mapv(|v| if v.is_finite() { v } else { f64::NEG_INFINITY })
}

/// Index of the largest value along a column vector.
pub(crate) fn argmax(values: ArrayView2<'_, f64>) -> Option<usize> {
    values
        .index_axis(Axis(1), 0)
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ei_matches_closed_form() {
        // At mu == best_f, EI = sigma * phi(0).
        assert_relative_eq!(expected_improvement(1.0, 2.0, 1.0), 2.0 * INV_SQRT_2PI, epsilon = 1e-12);
        assert_eq!(expected_improvement(0.5, 0.0, 1.0), 0.0);
        assert_eq!(expected_improvement(1.5, 0.0, 1.0), 0.5);
    }

    #[test]
    fn ei_prefers_higher_mean_and_uncertainty() {
        let post = Posterior {
            mean: array![0.0, 0.5, 0.5],
            variance: array![0.04, 0.04, 0.25],
        };
        let ei = Acquisition::new(AcquisitionConfig::ExpectedImprovement, 0.4).evaluate(&post);
        assert!(ei[1] > ei[0]);
        assert!(ei[2] > ei[1]);
        assert!(ei.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn ucb_adds_scaled_std() {
        let post = Posterior {
            mean: array![1.0, -1.0],
            variance: array![4.0, 1.0],
        };
        let ucb = Acquisition::new(AcquisitionConfig::UpperConfidenceBound { beta: 4.0 }, 0.0)
            .evaluate(&post);
        assert_relative_eq!(ucb[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(ucb[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn parses_names() {
        assert_eq!(
            AcquisitionConfig::from_name("EI", 2.0).unwrap(),
            AcquisitionConfig::ExpectedImprovement
        );
        assert_eq!(
            AcquisitionConfig::from_name("ucb", 0.5).unwrap().label(),
            "UCB"
        );
        assert!(AcquisitionConfig::from_name("pi", 2.0).is_err());
        assert!(AcquisitionConfig::UpperConfidenceBound { beta: -1.0 }.validate().is_err());
    }

    #[test]
    fn optimizer_finds_interior_maximum() {
        let target = array![0.3, 0.7];
        let f = |x: ArrayView2<'_, f64>| -> BpResult<Array1<f64>> {
            Ok(x.rows()
                .into_iter()
                .map(|r| -(&r - &target).mapv(|d| d * d).sum())
                .collect())
        };
        let mut rng = StdRng::seed_from_u64(5);
        let (best, value) = AcquisitionOptimizer::default().maximize(2, &mut rng, f).unwrap();
        assert!((best[0] - 0.3).abs() < 0.02, "{best}");
        assert!((best[1] - 0.7).abs() < 0.02, "{best}");
        assert!(value > -1e-3);
    }

    #[test]
    fn optimizer_ignores_non_finite_values() {
        let f = |x: ArrayView2<'_, f64>| -> BpResult<Array1<f64>> {
            Ok(x.column(0).mapv(|v| if v < 0.5 { f64::NAN } else { v }))
        };
        let mut rng = StdRng::seed_from_u64(9);
        let (best, value) = AcquisitionOptimizer::default().maximize(1, &mut rng, f).unwrap();
        assert!(best[0] >= 0.5);
        assert!(value.is_finite());
    }

    #[test]
    fn bad_search_radius_is_an_error() {
        let f = |x: ArrayView2<'_, f64>| -> BpResult<Array1<f64>> { Ok(x.column(0).to_owned()) };
        let mut rng = StdRng::seed_from_u64(1);
        for optimizer in [
            AcquisitionOptimizer::default().with_radius(-0.1, 0.5),
            AcquisitionOptimizer::default().with_radius(f64::NAN, 0.5),
            AcquisitionOptimizer::default().with_radius(0.1, f64::NAN),
            AcquisitionOptimizer::default().with_radius(0.1, 0.0),
        ] {
            assert!(optimizer.validate().is_err());
            assert!(matches!(
                optimizer.maximize(1, &mut rng, f),
                Err(bp_types::BpError::Experiment(ExperimentError::InvalidConfig { .. }))
            ));
        }
        assert!(AcquisitionOptimizer::default().with_radius(0.0, 1.0).validate().is_ok());
    }

    #[test]
    fn argmax_skips_nan() {
        let v = array![[0.1], [f64::NAN], [0.4], [0.2]];
        assert_eq!(argmax(v.view()), Some(2));
    }
}
