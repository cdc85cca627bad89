//! Scaled Matérn-5/2 kernel with automatic relevance determination.

use bp_calibration::{CalibrationParameter, Constraint, ParameterOptions, Prior};
use bp_types::CalibrationError;
use ndarray::{Array2, ArrayView2};

const SQRT_5: f64 = 2.236_067_977_499_79;

/// `outputscale * matern52(r)` where `r` is the lengthscale-weighted distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Matern52Kernel {
    lengthscale: CalibrationParameter,
    outputscale: CalibrationParameter,
}

impl Matern52Kernel {
    /// Kernel over `x_dim` inputs with Gamma hyperpriors on every parameter.
    pub fn new(x_dim: usize) -> Result<Self, CalibrationError> {
        let lengthscale = CalibrationParameter::filled(
            "lengthscale",
            x_dim,
            1.0 / 3.0,
            ParameterOptions::new()
                .with_prior(Prior::Gamma {
                    concentration: 3.0,
                    rate: 6.0,
                })
                .with_constraint(Constraint::Positive),
        )?;
        let outputscale = CalibrationParameter::filled(
            "outputscale",
            1,
            1.0,
            ParameterOptions::new()
                .with_prior(Prior::Gamma {
                    concentration: 2.0,
                    rate: 0.15,
                })
                .with_constraint(Constraint::Positive),
        )?;
        Ok(Self {
            lengthscale,
            outputscale,
        })
    }

    pub fn x_dim(&self) -> usize {
        self.lengthscale.dim()
    }

    pub fn lengthscale(&self) -> &CalibrationParameter {
        &self.lengthscale
    }

    pub fn outputscale(&self) -> &CalibrationParameter {
        &self.outputscale
    }

    /// Prior variance at any point.
    pub fn diag_value(&self) -> f64 {
        self.outputscale.value()[0]
    }

    /// Cross-covariance between the rows of `a` and `b`.
    pub fn matrix(&self, a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Array2<f64> {
        let ls = self.lengthscale.value();
        let scale = self.diag_value();
        let mut k = Array2::zeros((a.nrows(), b.nrows()));
        for (i, row_a) in a.rows().into_iter().enumerate() {
            for (j, row_b) in b.rows().into_iter().enumerate() {
                let r2: f64 = row_a
                    .iter()
                    .zip(row_b.iter())
                    .zip(ls.iter())
                    .map(|((&p, &q), &l)| ((p - q) / l).powi(2))
                    .sum();
                let r = r2.sqrt();
                k[[i, j]] = scale * (1.0 + SQRT_5 * r + 5.0 / 3.0 * r2) * (-SQRT_5 * r).exp();
            }
        }
        k
    }

    pub fn parameters(&self) -> Vec<&CalibrationParameter> {
        vec![&self.lengthscale, &self.outputscale]
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter> {
        vec![&mut self.lengthscale, &mut self.outputscale]
    }
}
