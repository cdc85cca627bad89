//! Homoskedastic Gaussian observation noise.

use bp_calibration::{CalibrationParameter, Constraint, ParameterOptions, Prior};
use bp_types::CalibrationError;

/// Lower bound on the noise variance.
pub const MIN_NOISE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianLikelihood {
    noise: CalibrationParameter,
}

impl GaussianLikelihood {
    pub fn new(initial: f64) -> Result<Self, CalibrationError> {
        let noise = CalibrationParameter::filled(
            "noise",
            1,
            initial.max(2.0 * MIN_NOISE),
            ParameterOptions::new()
                .with_prior(Prior::Gamma {
                    concentration: 1.1,
                    rate: 0.05,
                })
                .with_constraint(Constraint::GreaterThan { lower: MIN_NOISE }),
        )?;
        Ok(Self { noise })
    }

    pub fn noise(&self) -> f64 {
        self.noise.value()[0]
    }

    pub fn parameter(&self) -> &CalibrationParameter {
        &self.noise
    }

    pub fn parameter_mut(&mut self) -> &mut CalibrationParameter {
        &mut self.noise
    }
}
