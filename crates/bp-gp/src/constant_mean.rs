//! Flat prior mean with a single learnable constant.

use bp_calibration::{CalibrationParameter, MeanFunction, ParameterOptions};
use bp_types::{BpResult, CalibrationError};
use ndarray::{Array2, ArrayView2};

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantMean {
    x_dim: usize,
    constant: CalibrationParameter,
}

impl ConstantMean {
    pub fn new(x_dim: usize) -> Result<Self, CalibrationError> {
        Ok(Self {
            x_dim,
            constant: CalibrationParameter::filled("constant", 1, 0.0, ParameterOptions::new())?,
        })
    }

    pub fn constant(&self) -> f64 {
        self.constant.value()[0]
    }
}

impl MeanFunction for ConstantMean {
    fn y_dim(&self) -> usize {
        1
    }

    fn forward(&self, x: ArrayView2<'_, f64>, _step: usize) -> BpResult<Array2<f64>> {
        if x.ncols() != self.x_dim {
            return Err(CalibrationError::ShapeMismatch {
                context: "constant mean inputs".to_string(),
                expected: self.x_dim,
                actual: x.ncols(),
            }
            .into());
        }
        Ok(Array2::from_elem((x.nrows(), 1), self.constant()))
    }

    fn parameters(&self) -> Vec<&CalibrationParameter> {
        vec![&self.constant]
    }

    fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter> {
        vec![&mut self.constant]
    }

    fn name(&self) -> &str {
        "constant_mean"
    }
}
