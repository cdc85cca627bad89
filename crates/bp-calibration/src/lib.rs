//! # bp-calibration
//!
//! Calibrated prior means for physics-informed Gaussian processes.
//!
//! Wraps an auxiliary model behind input normalization and outcome
//! standardization, and lets a calibration layer apply learnable corrections
//! (shift, scale, offset, time-blended flattening) before and after the model.

mod constraint;
mod layer;
mod mean;
mod model;
mod parameter;
mod prior;
mod schedule;
mod transforms;

pub use constraint::{safe_logistic, safe_logit, safe_softplus, safe_softplus_inv, Constraint};
pub use layer::{
    CalibrationKind, CalibrationLayer, CalibrationSpec, FlattenOptions, InputCorrection,
    LinearInputOptions, LinearOptions, LinearOutputOptions, OffsetOptions, OutputCorrection,
    ScaleOptions,
};
pub use mean::{MeanFunction, PriorMean};
pub use model::{EvaluatedModel, FnModel, SharedModel};
pub use parameter::{CalibrationParameter, ParameterOptions};
pub use prior::Prior;
pub use schedule::FlattenSchedule;
pub use transforms::{DataTransform, TransformKind, TransformMode, TransformPipeline};
