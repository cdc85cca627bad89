//! # bp-optimizer
//!
//! Bayesian optimization of a quadrupole beamline with physics-informed GP
//! prior means.
//!
//! Provides the search space, analytic acquisition functions, the thin-lens
//! beamline models, the per-repetition BO loop, experiment orchestration with
//! status tracking, and the persisted run record.

mod acquisition;
mod bayes_opt;
mod beamline;
mod config;
mod experiment;
mod record;
mod search;
mod status;

pub use acquisition::{Acquisition, AcquisitionConfig, AcquisitionOptimizer};
pub use bayes_opt::{BayesOpt, EvalSet, StepMetrics, StepOutcome};
pub use beamline::{BeamlineModel, Lattice, Miscalibration, TwissBeam};
pub use config::{ConfigName, ExperimentConfig, PriorConfig, FIXED_OFFSET};
pub use experiment::{Experiment, ExperimentOutcome, RepetitionResult};
pub use record::RunRecord;
pub use search::{unit_cube_samples, ParameterDef, RandomSearch, SearchSpace, SearchStrategy};
pub use status::{BestObservation, ExperimentId, ExperimentStatus, RepetitionStatus, RunState};
