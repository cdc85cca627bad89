//! Repeated BO runs for one configuration.
//!
//! The calibrated prior mean is built once per experiment and carried through
//! every step of every repetition, so its parameters keep learning across
//! repetitions. With `reset_per_repetition` each repetition starts from a
//! fresh copy instead, and repetitions run in parallel.

use std::sync::Arc;

use bp_calibration::{
    CalibrationLayer, DataTransform, MeanFunction, PriorMean, SharedModel, TransformPipeline,
};
use bp_gp::ConstantMean;
use bp_types::{BpError, BpResult, ExperimentError};
use ndarray::{s, Array1, Array2, Array3, ArrayD};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::bayes_opt::{BayesOpt, EvalSet, StepOutcome};
use crate::beamline::BeamlineModel;
use crate::config::{ExperimentConfig, PriorConfig};
use crate::record::RunRecord;
use crate::search::SearchSpace;
use crate::status::{ExperimentId, ExperimentStatus, RepetitionStatus};

/// Mixed into the seed of the evaluation set so it differs from the
/// repetitions' own samples.
const EVAL_SEED_SALT: u64 = 0x5eed_e7a1;

type Snapshot = Vec<(String, Array1<f64>)>;

/// Everything observed during one repetition.
#[derive(Debug, Clone)]
pub struct RepetitionResult {
    pub repetition: usize,
    /// `(n_init + n_step, x_dim)`, native units.
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub mae_post: Vec<f64>,
    pub corr_post: Vec<f64>,
    pub mae_prior: Vec<f64>,
    /// Whether the physics prior mean drove the GP at each step.
    pub prior_active: Vec<bool>,
    /// Public value of every calibration parameter after each step's fit.
    pub snapshots: Vec<Snapshot>,
}

/// Final status plus the record, which exists only if every repetition
/// completed.
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub status: ExperimentStatus,
    pub record: Option<RunRecord>,
}

pub struct Experiment {
    config: ExperimentConfig,
    space: SearchSpace,
    truth: SharedModel,
    auxiliary: SharedModel,
}

impl Experiment {
    /// Beamline experiment: ground truth versus an auxiliary model
    /// miscalibrated by `config.mismatch`.
    pub fn new(config: ExperimentConfig) -> BpResult<Self> {
        config.validate()?;
        let auxiliary = BeamlineModel::miscalibrated(config.mismatch)?;
        Self::with_models(
            config,
            BeamlineModel::search_space(),
            Arc::new(BeamlineModel::ground_truth()),
            Arc::new(auxiliary),
        )
    }

    pub fn with_models(
        config: ExperimentConfig,
        space: SearchSpace,
        truth: SharedModel,
        auxiliary: SharedModel,
    ) -> BpResult<Self> {
        config.validate()?;
        space.validate()?;
        if auxiliary.x_dim() != truth.x_dim() || auxiliary.y_dim() != truth.y_dim() {
            return Err(ExperimentError::InvalidConfig {
                message: format!(
                    "auxiliary model {} does not match ground truth {} dimensions",
                    auxiliary.name(),
                    truth.name()
                ),
            }
            .into());
        }
        Ok(Self {
            config,
            space,
            truth,
            auxiliary,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Prior mean for the configuration; `None` for the constant prior.
    fn build_prior(&self) -> BpResult<Option<PriorMean>> {
        let pipeline =
            TransformPipeline::new(self.space.input_transform()?, DataTransform::standardize(1));
        let layer = match &self.config.prior {
            PriorConfig::Constant => return Ok(None),
            PriorConfig::Calibrated { calibration } => CalibrationLayer::from_spec(calibration)?,
            PriorConfig::Alternate { .. } => CalibrationLayer::identity(),
        };
        Ok(Some(PriorMean::new(pipeline, self.auxiliary.clone(), layer)?))
    }

    pub fn run(&self) -> BpResult<ExperimentOutcome> {
        let cfg = &self.config;
        let mut status = ExperimentStatus::new(cfg.name.as_str());
        status.mark_running();
        info!(
            config = %cfg.name,
            acquisition = cfg.acquisition.label(),
            n_run = cfg.n_run,
            n_step = cfg.n_step,
            mismatch = cfg.mismatch,
            reset_per_repetition = cfg.reset_per_repetition,
            "starting experiment"
        );

        let eval = EvalSet::sample(&self.space, &self.truth, cfg.n_eval, cfg.seed ^ EVAL_SEED_SALT)?;
        let template = self.build_prior()?;

        let runs: Vec<(RepetitionStatus, BpResult<RepetitionResult>)> = if cfg.reset_per_repetition {
            (0..cfg.n_run)
                .into_par_iter()
                .map(|rep| {
                    let mut prior = template.clone();
                    self.run_tracked(status.id, rep, prior.as_mut(), &eval)
                })
                .collect()
        } else {
            let mut shared = template;
            let mut runs = Vec::with_capacity(cfg.n_run);
            for rep in 0..cfg.n_run {
                let run = self.run_tracked(status.id, rep, shared.as_mut(), &eval);
                let failed = run.1.is_err();
                runs.push(run);
                if failed {
                    break;
                }
            }
            runs
        };

        let mut results = Vec::with_capacity(runs.len());
        let mut failure = None;
        for (rep_status, result) in runs {
            status.repetitions.push(rep_status);
            match result {
                Ok(r) => results.push(r),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(err) = failure {
            status.mark_failed(err.to_string());
            warn!(config = %cfg.name, error = %err, "experiment failed");
            return Ok(ExperimentOutcome {
                status,
                record: None,
            });
        }

        let record = self.build_record(status.id, &results)?;
        status.mark_completed();
        info!(
            config = %cfg.name,
            best = status.best().map(|b| b.objective),
            "experiment complete"
        );
        Ok(ExperimentOutcome {
            status,
            record: Some(record),
        })
    }

    fn run_tracked(
        &self,
        experiment_id: ExperimentId,
        repetition: usize,
        prior: Option<&mut PriorMean>,
        eval: &EvalSet,
    ) -> (RepetitionStatus, BpResult<RepetitionResult>) {
        let mut status = RepetitionStatus::new(experiment_id, repetition);
        status.mark_running();
        let result = self.run_repetition(repetition, prior, eval, &mut status);
        match &result {
            Ok(_) => {
                status.mark_completed();
                info!(
                    repetition,
                    best = status.best.as_ref().map(|b| b.objective),
                    "repetition complete"
                );
            }
            Err(e) => {
                warn!(repetition, error = %e, "repetition failed");
                status.mark_failed(e.to_string());
            }
        }
        (status, result)
    }

    fn run_repetition(
        &self,
        repetition: usize,
        mut prior: Option<&mut PriorMean>,
        eval: &EvalSet,
        status: &mut RepetitionStatus,
    ) -> BpResult<RepetitionResult> {
        let cfg = &self.config;
        let failed = |step: usize, err: BpError| -> BpError {
            ExperimentError::RepetitionFailed {
                repetition,
                step,
                message: err.to_string(),
            }
            .into()
        };

        let mut bo = BayesOpt::new(
            self.space.clone(),
            self.truth.clone(),
            cfg.seed.wrapping_add(repetition as u64),
        )?
        .with_acquisition(cfg.acquisition)
        .with_optimizer(cfg.optimizer.clone())
        .with_fit(cfg.fit.clone());

        bo.initialize(cfg.n_init).map_err(|e| failed(0, e))?;
        // Initial samples are attributed to step 0.
        for (row, &y) in bo.x().rows().into_iter().zip(bo.y().iter()) {
            status.update_best(0, &row.to_vec(), y);
        }

        let mut result = RepetitionResult {
            repetition,
            x: Array2::zeros((0, self.space.dim())),
            y: Array2::zeros((0, 1)),
            mae_post: Vec::with_capacity(cfg.n_step),
            corr_post: Vec::with_capacity(cfg.n_step),
            mae_prior: Vec::with_capacity(cfg.n_step),
            prior_active: Vec::with_capacity(cfg.n_step),
            snapshots: Vec::with_capacity(cfg.n_step),
        };

        for step in 0..cfg.n_step {
            let (outcome, active, snapshot) = self
                .advance(&mut bo, prior.as_deref_mut(), step, eval)
                .map_err(|e| failed(step, e))?;
            let metrics = outcome
                .metrics
                .ok_or_else(|| failed(step, bp_types::internal_error!("step produced no metrics")))?;

            status.update_best(step, &outcome.x.to_vec(), outcome.y);
            status.steps_completed = step + 1;
            result.mae_post.push(metrics.mae_post);
            result.corr_post.push(metrics.corr_post);
            result.mae_prior.push(metrics.mae_prior);
            result.prior_active.push(active);
            result.snapshots.push(snapshot);
        }

        result.x = bo.x().clone();
        result.y = bo.y().clone();
        Ok(result)
    }

    /// One BO step with the mean this configuration prescribes.
    fn advance(
        &self,
        bo: &mut BayesOpt,
        prior: Option<&mut PriorMean>,
        step: usize,
        eval: &EvalSet,
    ) -> BpResult<(StepOutcome, bool, Snapshot)> {
        match (&self.config.prior, prior) {
            (PriorConfig::Alternate { period }, Some(prior)) if step % period == 0 => {
                let mut constant = ConstantMean::new(self.space.dim())?;
                let outcome = bo.step(&mut constant, step, Some(eval))?;
                Ok((outcome, false, prior.named_values()))
            }
            (_, Some(prior)) => {
                let outcome = bo.step(&mut *prior, step, Some(eval))?;
                Ok((outcome, true, prior.named_values()))
            }
            (_, None) => {
                let mut constant = ConstantMean::new(self.space.dim())?;
                let outcome = bo.step(&mut constant, step, Some(eval))?;
                Ok((outcome, false, constant.named_values()))
            }
        }
    }

    fn build_record(
        &self,
        experiment_id: ExperimentId,
        results: &[RepetitionResult],
    ) -> BpResult<RunRecord> {
        let cfg = &self.config;
        let n_run = results.len();
        let n_total = cfg.n_init + cfg.n_step;
        let mut record = RunRecord::new(
            experiment_id,
            cfg.name.as_str(),
            cfg.acquisition.label(),
            cfg.recorded_mismatch(),
        );

        let mut x = Array3::zeros((n_run, n_total, self.space.dim()));
        let mut y = Array3::zeros((n_run, n_total, 1));
        for (r, res) in results.iter().enumerate() {
            x.slice_mut(s![r, .., ..]).assign(&res.x);
            y.slice_mut(s![r, .., ..]).assign(&res.y);
        }
        record.insert("x", x.into_dyn());
        record.insert("y", y.into_dyn());

        let n_step = cfg.n_step;
        record.insert("mae_post", per_step(results, n_step, |res, s| res.mae_post[s]));
        record.insert("corr_post", per_step(results, n_step, |res, s| res.corr_post[s]));
        let prior_field = if cfg.prior.is_constant() {
            "mae_const"
        } else {
            "mae_prior"
        };
        record.insert(prior_field, per_step(results, n_step, |res, s| res.mae_prior[s]));
        record.insert(
            "prior_active",
            per_step(results, n_step, |res, s| if res.prior_active[s] { 1.0 } else { 0.0 }),
        );

        let names: Snapshot = results
            .first()
            .and_then(|res| res.snapshots.first())
            .cloned()
            .unwrap_or_default();
        for (i, (name, value)) in names.iter().enumerate() {
            let tensor = Array3::from_shape_fn((n_run, cfg.n_step, value.len()), |(r, s, k)| {
                results[r].snapshots[s][i].1[k]
            });
            record.insert(name.clone(), tensor.into_dyn());
        }
        Ok(record)
    }
}

/// `(n_run, n_step)` tensor of a per-step scalar.
fn per_step<F>(results: &[RepetitionResult], n_step: usize, f: F) -> ArrayD<f64>
where
    F: Fn(&RepetitionResult, usize) -> f64,
{
    Array2::from_shape_fn((results.len(), n_step), |(r, s)| f(&results[r], s)).into_dyn()
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("config", &self.config.name)
            .field("truth", &self.truth.name())
            .field("auxiliary", &self.auxiliary.name())
            .finish()
    }
}
