//! Calibration layers: learnable corrections applied around the auxiliary
//! model.
//!
//! A [`CalibrationLayer`] holds two independent capability slots, an optional
//! [`InputCorrection`] applied before the model and an optional
//! [`OutputCorrection`] applied after it. The combined linear calibration is
//! simply a layer with both slots filled.

use bp_types::CalibrationError;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::model::check_columns;
use crate::parameter::{CalibrationParameter, ParameterOptions};
use crate::schedule::FlattenSchedule;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for `x' = x_scale * (x + x_shift)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearInputOptions {
    pub x_dim: usize,
    pub x_shift: ParameterOptions,
    pub x_scale: ParameterOptions,
}

impl Default for LinearInputOptions {
    fn default() -> Self {
        Self {
            x_dim: 1,
            x_shift: ParameterOptions::shift_default(),
            x_scale: ParameterOptions::scale_default(),
        }
    }
}

impl LinearInputOptions {
    pub fn with_x_dim(mut self, x_dim: usize) -> Self {
        self.x_dim = x_dim;
        self
    }

    pub fn with_x_shift(mut self, options: ParameterOptions) -> Self {
        self.x_shift = options;
        self
    }

    pub fn with_x_scale(mut self, options: ParameterOptions) -> Self {
        self.x_scale = options;
        self
    }
}

/// Options for the output side of a linear calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOutputOptions {
    pub y_dim: usize,
    pub y_shift: ParameterOptions,
    pub y_scale: ParameterOptions,
}

impl Default for LinearOutputOptions {
    fn default() -> Self {
        Self {
            y_dim: 1,
            y_shift: ParameterOptions::shift_default(),
            y_scale: ParameterOptions::scale_default(),
        }
    }
}

impl LinearOutputOptions {
    pub fn with_y_dim(mut self, y_dim: usize) -> Self {
        self.y_dim = y_dim;
        self
    }

    pub fn with_y_shift(mut self, options: ParameterOptions) -> Self {
        self.y_shift = options;
        self
    }

    pub fn with_y_scale(mut self, options: ParameterOptions) -> Self {
        self.y_scale = options;
        self
    }
}

/// Options for the combined input and output linear calibration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOptions {
    #[serde(flatten)]
    pub input: LinearInputOptions,
    #[serde(flatten)]
    pub output: LinearOutputOptions,
}

/// Options for `y = f(x) + y_shift`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetOptions {
    pub y_dim: usize,
    pub y_shift: ParameterOptions,
    pub initial: f64,
}

impl Default for OffsetOptions {
    fn default() -> Self {
        Self {
            y_dim: 1,
            y_shift: ParameterOptions::new(),
            initial: 0.0,
        }
    }
}

impl OffsetOptions {
    pub fn with_y_dim(mut self, y_dim: usize) -> Self {
        self.y_dim = y_dim;
        self
    }

    pub fn with_y_shift(mut self, options: ParameterOptions) -> Self {
        self.y_shift = options;
        self
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }
}

/// Options for `y = y_scale * f(x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleOptions {
    pub y_dim: usize,
    pub y_scale: ParameterOptions,
    pub initial: f64,
}

impl Default for ScaleOptions {
    fn default() -> Self {
        Self {
            y_dim: 1,
            y_scale: ParameterOptions::new(),
            initial: 1.0,
        }
    }
}

impl ScaleOptions {
    pub fn with_y_dim(mut self, y_dim: usize) -> Self {
        self.y_dim = y_dim;
        self
    }

    pub fn with_y_scale(mut self, options: ParameterOptions) -> Self {
        self.y_scale = options;
        self
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }
}

/// Options for `y = (1 - w) f(x) + w * constant`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenOptions {
    pub y_dim: usize,
    pub step_range: (usize, usize),
    pub w_lim: (f64, f64),
    pub constant: ParameterOptions,
    pub initial: f64,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            y_dim: 1,
            step_range: (0, 10),
            w_lim: (0.01, 0.99),
            constant: ParameterOptions::new(),
            initial: 0.0,
        }
    }
}

impl FlattenOptions {
    pub fn with_y_dim(mut self, y_dim: usize) -> Self {
        self.y_dim = y_dim;
        self
    }

    pub fn with_step_range(mut self, start: usize, end: usize) -> Self {
        self.step_range = (start, end);
        self
    }

    pub fn with_w_lim(mut self, w_min: f64, w_max: f64) -> Self {
        self.w_lim = (w_min, w_max);
        self
    }

    pub fn with_constant(mut self, options: ParameterOptions) -> Self {
        self.constant = options;
        self
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }
}

/// Serializable description of a layer, used by experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationSpec {
    Identity,
    LinearInput(LinearInputOptions),
    LinearOutput(LinearOutputOptions),
    Linear(LinearOptions),
    OutputOffset(OffsetOptions),
    OutputScale(ScaleOptions),
    FixedOffset { y_dim: usize, y_shift: f64 },
    Flatten(FlattenOptions),
}

impl Default for CalibrationSpec {
    fn default() -> Self {
        CalibrationSpec::Identity
    }
}

// ---------------------------------------------------------------------------
// Correction slots
// ---------------------------------------------------------------------------

/// Correction applied to native model inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputCorrection {
    /// `x' = scale * (x + shift)`
    Linear {
        shift: CalibrationParameter,
        scale: CalibrationParameter,
    },
}

impl InputCorrection {
    pub fn dim(&self) -> usize {
        match self {
            InputCorrection::Linear { shift, .. } => shift.dim(),
        }
    }

    pub fn apply(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, CalibrationError> {
        match self {
            InputCorrection::Linear { shift, scale } => {
                check_columns(shift.name(), shift.dim(), x.ncols())?;
                Ok((&x + &shift.value()) * &scale.value())
            }
        }
    }

    fn parameters(&self) -> Vec<&CalibrationParameter> {
        match self {
            InputCorrection::Linear { shift, scale } => vec![shift, scale],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter> {
        match self {
            InputCorrection::Linear { shift, scale } => vec![shift, scale],
        }
    }
}

/// Correction applied to native model outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputCorrection {
    /// `y' = scale * (y + shift)`
    ShiftThenScale {
        shift: CalibrationParameter,
        scale: CalibrationParameter,
    },
    /// `y' = scale * y + shift`
    ScaleThenShift {
        scale: CalibrationParameter,
        shift: CalibrationParameter,
    },
    /// `y' = y + shift`
    Offset { shift: CalibrationParameter },
    /// `y' = scale * y`
    Scale { scale: CalibrationParameter },
    /// `y' = y + c` with a constant, non-learnable `c`.
    FixedOffset { y_dim: usize, constant: f64 },
    /// `y' = (1 - w) * y + w * constant` with `w` from the schedule.
    Flatten {
        constant: CalibrationParameter,
        schedule: FlattenSchedule,
    },
}

impl OutputCorrection {
    pub fn dim(&self) -> usize {
        match self {
            OutputCorrection::ShiftThenScale { shift, .. }
            | OutputCorrection::ScaleThenShift { shift, .. }
            | OutputCorrection::Offset { shift } => shift.dim(),
            OutputCorrection::Scale { scale } => scale.dim(),
            OutputCorrection::FixedOffset { y_dim, .. } => *y_dim,
            OutputCorrection::Flatten { constant, .. } => constant.dim(),
        }
    }

    pub fn apply(&self, y: ArrayView2<'_, f64>, step: usize) -> Result<Array2<f64>, CalibrationError> {
        check_columns("output correction", self.dim(), y.ncols())?;
        let out = match self {
            OutputCorrection::ShiftThenScale { shift, scale } => {
                (&y + &shift.value()) * &scale.value()
            }
            OutputCorrection::ScaleThenShift { scale, shift } => {
                &y * &scale.value() + &shift.value()
            }
            OutputCorrection::Offset { shift } => &y + &shift.value(),
            OutputCorrection::Scale { scale } => &y * &scale.value(),
            OutputCorrection::FixedOffset { constant, .. } => &y + *constant,
            OutputCorrection::Flatten { constant, schedule } => {
                let w = schedule.weight(step);
                &y * (1.0 - w) + &(constant.value() * w)
            }
        };
        Ok(out)
    }

    fn parameters(&self) -> Vec<&CalibrationParameter> {
        match self {
            OutputCorrection::ShiftThenScale { shift, scale }
            | OutputCorrection::ScaleThenShift { scale, shift } => vec![shift, scale],
            OutputCorrection::Offset { shift } => vec![shift],
            OutputCorrection::Scale { scale } => vec![scale],
            OutputCorrection::FixedOffset { .. } => Vec::new(),
            OutputCorrection::Flatten { constant, .. } => vec![constant],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter> {
        match self {
            OutputCorrection::ShiftThenScale { shift, scale }
            | OutputCorrection::ScaleThenShift { scale, shift } => vec![shift, scale],
            OutputCorrection::Offset { shift } => vec![shift],
            OutputCorrection::Scale { scale } => vec![scale],
            OutputCorrection::FixedOffset { .. } => Vec::new(),
            OutputCorrection::Flatten { constant, .. } => vec![constant],
        }
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// Which calibration policy a layer implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Identity,
    LinearInput,
    LinearOutput,
    Linear,
    OutputOffset,
    OutputScale,
    FixedOffset,
    Flatten,
}

/// A calibration policy with its learnable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLayer {
    kind: CalibrationKind,
    input: Option<InputCorrection>,
    output: Option<OutputCorrection>,
}

impl CalibrationLayer {
    /// No adjustment: `y = f(x)`.
    pub fn identity() -> Self {
        Self {
            kind: CalibrationKind::Identity,
            input: None,
            output: None,
        }
    }

    /// `y = f(x_scale * (x + x_shift))`
    pub fn linear_input(options: &LinearInputOptions) -> Result<Self, CalibrationError> {
        Ok(Self {
            kind: CalibrationKind::LinearInput,
            input: Some(linear_input_slot(options)?),
            output: None,
        })
    }

    /// `y = y_scale * (f(x) + y_shift)`
    pub fn linear_output(options: &LinearOutputOptions) -> Result<Self, CalibrationError> {
        let (shift, scale) = linear_output_params(options)?;
        Ok(Self {
            kind: CalibrationKind::LinearOutput,
            input: None,
            output: Some(OutputCorrection::ShiftThenScale { shift, scale }),
        })
    }

    /// `y = y_scale * f(x_scale * (x + x_shift)) + y_shift`
    pub fn linear(options: &LinearOptions) -> Result<Self, CalibrationError> {
        let (shift, scale) = linear_output_params(&options.output)?;
        Ok(Self {
            kind: CalibrationKind::Linear,
            input: Some(linear_input_slot(&options.input)?),
            output: Some(OutputCorrection::ScaleThenShift { scale, shift }),
        })
    }

    /// `y = f(x) + y_shift`
    pub fn output_offset(options: &OffsetOptions) -> Result<Self, CalibrationError> {
        let shift = CalibrationParameter::filled(
            "y_shift",
            options.y_dim,
            options.initial,
            options.y_shift,
        )?;
        Ok(Self {
            kind: CalibrationKind::OutputOffset,
            input: None,
            output: Some(OutputCorrection::Offset { shift }),
        })
    }

    /// `y = y_scale * f(x)`
    pub fn output_scale(options: &ScaleOptions) -> Result<Self, CalibrationError> {
        let scale = CalibrationParameter::filled(
            "y_scale",
            options.y_dim,
            options.initial,
            options.y_scale,
        )?;
        Ok(Self {
            kind: CalibrationKind::OutputScale,
            input: None,
            output: Some(OutputCorrection::Scale { scale }),
        })
    }

    /// `y = f(x) + c` with a constant `c`.
    pub fn fixed_offset(y_dim: usize, y_shift: f64) -> Result<Self, CalibrationError> {
        if y_dim == 0 {
            return Err(CalibrationError::ShapeMismatch {
                context: "fixed offset".to_string(),
                expected: 1,
                actual: 0,
            });
        }
        if !y_shift.is_finite() {
            return Err(CalibrationError::NonFinite {
                context: "fixed offset".to_string(),
            });
        }
        Ok(Self {
            kind: CalibrationKind::FixedOffset,
            input: None,
            output: Some(OutputCorrection::FixedOffset {
                y_dim,
                constant: y_shift,
            }),
        })
    }

    /// `y = (1 - w) * f(x) + w * constant`
    pub fn flatten(options: &FlattenOptions) -> Result<Self, CalibrationError> {
        let schedule = FlattenSchedule::new(options.step_range, options.w_lim)?;
        let constant = CalibrationParameter::filled(
            "constant",
            options.y_dim,
            options.initial,
            options.constant,
        )?;
        Ok(Self {
            kind: CalibrationKind::Flatten,
            input: None,
            output: Some(OutputCorrection::Flatten { constant, schedule }),
        })
    }

    pub fn from_spec(spec: &CalibrationSpec) -> Result<Self, CalibrationError> {
        match spec {
            CalibrationSpec::Identity => Ok(Self::identity()),
            CalibrationSpec::LinearInput(o) => Self::linear_input(o),
            CalibrationSpec::LinearOutput(o) => Self::linear_output(o),
            CalibrationSpec::Linear(o) => Self::linear(o),
            CalibrationSpec::OutputOffset(o) => Self::output_offset(o),
            CalibrationSpec::OutputScale(o) => Self::output_scale(o),
            CalibrationSpec::FixedOffset { y_dim, y_shift } => Self::fixed_offset(*y_dim, *y_shift),
            CalibrationSpec::Flatten(o) => Self::flatten(o),
        }
    }

    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    pub fn input_correction(&self) -> Option<&InputCorrection> {
        self.input.as_ref()
    }

    pub fn output_correction(&self) -> Option<&OutputCorrection> {
        self.output.as_ref()
    }

    /// Check slot dimensions against the wrapped model.
    pub fn check_dims(&self, x_dim: usize, y_dim: usize) -> Result<(), CalibrationError> {
        if let Some(input) = &self.input {
            check_columns("input correction", x_dim, input.dim())?;
        }
        if let Some(output) = &self.output {
            check_columns("output correction", y_dim, output.dim())?;
        }
        Ok(())
    }

    /// Apply the input slot, or pass `x` through unchanged.
    pub fn correct_input(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, CalibrationError> {
        match &self.input {
            Some(input) => input.apply(x),
            None => Ok(x.to_owned()),
        }
    }

    /// Apply the output slot at `step`, or pass `y` through unchanged.
    pub fn correct_output(
        &self,
        y: ArrayView2<'_, f64>,
        step: usize,
    ) -> Result<Array2<f64>, CalibrationError> {
        match &self.output {
            Some(output) => output.apply(y, step),
            None => Ok(y.to_owned()),
        }
    }

    /// Blend weight at `step` for the flatten policy.
    pub fn blend_weight(&self, step: usize) -> Option<f64> {
        match &self.output {
            Some(OutputCorrection::Flatten { schedule, .. }) => Some(schedule.weight(step)),
            _ => None,
        }
    }

    /// Learnable parameters, input slot first, in a stable order.
    pub fn parameters(&self) -> Vec<&CalibrationParameter> {
        let mut params = Vec::new();
        if let Some(input) = &self.input {
            params.extend(input.parameters());
        }
        if let Some(output) = &self.output {
            params.extend(output.parameters());
        }
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter> {
        let mut params = Vec::new();
        if let Some(input) = &mut self.input {
            params.extend(input.parameters_mut());
        }
        if let Some(output) = &mut self.output {
            params.extend(output.parameters_mut());
        }
        params
    }

    pub fn parameter(&self, name: &str) -> Option<&CalibrationParameter> {
        self.parameters().into_iter().find(|p| p.name() == name)
    }

    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut CalibrationParameter> {
        self.parameters_mut().into_iter().find(|p| p.name() == name)
    }
}

impl Default for CalibrationLayer {
    fn default() -> Self {
        Self::identity()
    }
}

fn linear_input_slot(options: &LinearInputOptions) -> Result<InputCorrection, CalibrationError> {
    let shift = CalibrationParameter::filled("x_shift", options.x_dim, 0.0, options.x_shift)?;
    let scale = CalibrationParameter::filled("x_scale", options.x_dim, 1.0, options.x_scale)?;
    Ok(InputCorrection::Linear { shift, scale })
}

fn linear_output_params(
    options: &LinearOutputOptions,
) -> Result<(CalibrationParameter, CalibrationParameter), CalibrationError> {
    let shift = CalibrationParameter::filled("y_shift", options.y_dim, 0.0, options.y_shift)?;
    let scale = CalibrationParameter::filled("y_scale", options.y_dim, 1.0, options.y_scale)?;
    Ok((shift, scale))
}
