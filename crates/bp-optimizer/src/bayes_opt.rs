//! One Bayesian-optimization repetition: history, GP refit and acquisition.

use bp_calibration::{DataTransform, MeanFunction, SharedModel, TransformPipeline};
use bp_gp::{ExactGp, FitConfig, FitSummary};
use bp_types::{BpResult, CalibrationError, ExperimentError};
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::acquisition::{argmax, Acquisition, AcquisitionConfig, AcquisitionOptimizer};
use crate::search::{RandomSearch, SearchSpace, SearchStrategy};

/// Held-out points used to score the posterior against the ground truth.
#[derive(Debug, Clone)]
pub struct EvalSet {
    /// Points in GP (unit-cube) space.
    pub x_gp: Array2<f64>,
    /// Ground-truth objective at each point.
    pub y: Array1<f64>,
}

impl EvalSet {
    /// Sample `n` points uniformly from `space` and evaluate `truth` there.
    pub fn sample(space: &SearchSpace, truth: &SharedModel, n: usize, seed: u64) -> BpResult<Self> {
        let x = RandomSearch::new(space.clone(), seed).suggest(n);
        let y = truth.evaluate(x.view())?;
        let x_gp = space.input_transform()?.forward(x.view())?;
        Ok(Self {
            x_gp,
            y: y.column(0).to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Posterior quality on an [`EvalSet`], all in native objective units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub mae_post: f64,
    pub corr_post: f64,
    /// MAE of the prior mean alone.
    pub mae_prior: f64,
}

/// Result of one BO step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: usize,
    /// Queried point in native units.
    pub x: Array1<f64>,
    pub y: f64,
    pub acquisition_value: f64,
    pub fit: FitSummary,
    pub metrics: Option<StepMetrics>,
}

/// Sequential BO over a box-bounded search space.
///
/// Observations are kept in native units; the GP sees inputs normalized to
/// the unit cube and standardized outcomes, refit before every step.
pub struct BayesOpt {
    space: SearchSpace,
    objective: SharedModel,
    pipeline: TransformPipeline,
    acquisition: AcquisitionConfig,
    optimizer: AcquisitionOptimizer,
    fit: FitConfig,
    rng: StdRng,
    x: Array2<f64>,
    y: Array2<f64>,
}

impl BayesOpt {
    pub fn new(space: SearchSpace, objective: SharedModel, seed: u64) -> BpResult<Self> {
        space.validate()?;
        if objective.x_dim() != space.dim() || objective.y_dim() != 1 {
            return Err(ExperimentError::InvalidConfig {
                message: format!(
                    "objective {} maps {} -> {}, search space has {} dimensions",
                    objective.name(),
                    objective.x_dim(),
                    objective.y_dim(),
                    space.dim()
                ),
            }
            .into());
        }
        let pipeline = TransformPipeline::new(space.input_transform()?, DataTransform::standardize(1));
        let dim = space.dim();
        Ok(Self {
            space,
            objective,
            pipeline,
            acquisition: AcquisitionConfig::default(),
            optimizer: AcquisitionOptimizer::default(),
            fit: FitConfig::default(),
            rng: StdRng::seed_from_u64(seed),
            x: Array2::zeros((0, dim)),
            y: Array2::zeros((0, 1)),
        })
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionConfig) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_optimizer(mut self, optimizer: AcquisitionOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_fit(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    /// Observed inputs, native units.
    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    /// Observed objective values, `(n, 1)`.
    pub fn y(&self) -> &Array2<f64> {
        &self.y
    }

    pub fn n_observed(&self) -> usize {
        self.y.nrows()
    }

    /// Best observation so far.
    pub fn best(&self) -> Option<(ArrayView1<'_, f64>, f64)> {
        argmax(self.y.view()).map(|i| (self.x.row(i), self.y[[i, 0]]))
    }

    /// Draw `n_init` uniform samples and observe them.
    pub fn initialize(&mut self, n_init: usize) -> BpResult<()> {
        let seed = self.rng.random();
        let x = RandomSearch::new(self.space.clone(), seed).suggest(n_init);
        self.observe(x)?;
        debug!(n_init, "initial samples observed");
        Ok(())
    }

    fn observe(&mut self, x: Array2<f64>) -> BpResult<Array2<f64>> {
        let y = self.objective.evaluate(x.view())?;
        if y.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite {
                context: self.objective.name().to_string(),
            }
            .into());
        }
        self.x = concatenate(Axis(0), &[self.x.view(), x.view()])
            .map_err(|e| bp_types::internal_error!("history append failed: {e}"))?;
        self.y = concatenate(Axis(0), &[self.y.view(), y.view()])
            .map_err(|e| bp_types::internal_error!("history append failed: {e}"))?;
        Ok(y)
    }

    /// Refit the GP on the history with `mean` as its prior mean, query the
    /// acquisition maximizer and observe it.
    ///
    /// Fitting writes the learned parameters back into `mean`.
    pub fn step(
        &mut self,
        mean: &mut dyn MeanFunction,
        step: usize,
        eval: Option<&EvalSet>,
    ) -> BpResult<StepOutcome> {
        if self.n_observed() == 0 {
            return Err(ExperimentError::InvalidConfig {
                message: "BO step requires at least one observation".to_string(),
            }
            .into());
        }
        self.pipeline.adapt_outcome(self.y.view())?;
        mean.sync_transforms(&self.pipeline)?;

        let train_x = self.pipeline.to_gp_inputs(self.x.view())?;
        let train_y = self.pipeline.to_gp_space(self.y.view())?;
        let best_f = train_y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut gp = ExactGp::new(mean, train_x, train_y.view(), step)?;
        let fit = gp.fit(&self.fit)?;

        let acquisition = Acquisition::new(self.acquisition, best_f);
        let (candidate, acquisition_value) =
            self.optimizer
                .maximize(self.space.dim(), &mut self.rng, |u| {
                    Ok(acquisition.evaluate(&gp.posterior(u)?))
                })?;

        let metrics = match eval {
            Some(eval) => Some(self.score(&gp, eval, step)?),
            None => None,
        };
        drop(gp);

        let query = candidate.insert_axis(Axis(0));
        let x_native = self.pipeline.to_model_space(query.view())?;
        let y = self.observe(x_native.clone())?;

        debug!(
            step,
            y = y[[0, 0]],
            acquisition_value,
            fit_iterations = fit.iterations,
            "BO step complete"
        );
        Ok(StepOutcome {
            step,
            x: x_native.row(0).to_owned(),
            y: y[[0, 0]],
            acquisition_value,
            fit,
            metrics,
        })
    }

    fn score(&self, gp: &ExactGp<'_>, eval: &EvalSet, step: usize) -> BpResult<StepMetrics> {
        let posterior = gp.posterior(eval.x_gp.view())?;
        let post = self
            .pipeline
            .from_gp_space(posterior.mean.view().insert_axis(Axis(1)))?;
        let prior = gp.mean().forward(eval.x_gp.view(), step)?;
        let prior = self.pipeline.from_gp_space(prior.view())?;

        let post = post.column(0);
        Ok(StepMetrics {
            mae_post: mean_abs_error(post, eval.y.view()),
            corr_post: pearson(post, eval.y.view()),
            mae_prior: mean_abs_error(prior.column(0), eval.y.view()),
        })
    }
}

impl std::fmt::Debug for BayesOpt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BayesOpt")
            .field("objective", &self.objective.name())
            .field("acquisition", &self.acquisition)
            .field("n_observed", &self.n_observed())
            .finish()
    }
}

pub(crate) fn mean_abs_error(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    (&a - &b).mapv(f64::abs).sum() / a.len() as f64
}

/// Pearson correlation; zero when either series has no spread.
pub(crate) fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let n = a.len();
    if n < 2 {
        return 0.0;
    }
    let (ma, mb) = (a.sum() / n as f64, b.sum() / n as f64);
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        cov += (x - ma) * (y - mb);
        va += (x - ma) * (x - ma);
        vb += (y - mb) * (y - mb);
    }
    let denom = (va * vb).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        cov / denom
    }
}
