//! Prior distributions over constrained parameter values.

use bp_types::CalibrationError;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Gamma, LogNormal, Normal, Uniform};

/// A univariate prior, broadcast elementwise over a parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prior {
    Normal { loc: f64, scale: f64 },
    /// Shape/rate parameterization.
    Gamma { concentration: f64, rate: f64 },
    LogNormal { loc: f64, scale: f64 },
    Uniform { low: f64, high: f64 },
}

impl Prior {
    /// Standard normal, the default prior for shift-like parameters.
    pub fn standard_normal() -> Self {
        Prior::Normal { loc: 0.0, scale: 1.0 }
    }

    /// Gamma(2, 2), the default prior for scale-like parameters.
    pub fn default_scale() -> Self {
        Prior::Gamma {
            concentration: 2.0,
            rate: 2.0,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Prior::Normal { .. } => "Normal",
            Prior::Gamma { .. } => "Gamma",
            Prior::LogNormal { .. } => "LogNormal",
            Prior::Uniform { .. } => "Uniform",
        }
    }

    /// Reject hyperparameters the underlying distribution cannot represent.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let built = match *self {
            Prior::Normal { loc, scale } => Normal::new(loc, scale).err().map(|e| e.to_string()),
            Prior::Gamma {
                concentration,
                rate,
            } => Gamma::new(concentration, rate).err().map(|e| e.to_string()),
            Prior::LogNormal { loc, scale } => {
                LogNormal::new(loc, scale).err().map(|e| e.to_string())
            }
            Prior::Uniform { low, high } => Uniform::new(low, high).err().map(|e| e.to_string()),
        };
        match built {
            None => Ok(()),
            Some(message) => Err(CalibrationError::InvalidPrior {
                prior: self.name().to_string(),
                message,
            }),
        }
    }

    /// Log density at a single constrained value. Values outside the support
    /// yield `-inf`.
    pub fn log_prob(&self, value: f64) -> f64 {
        let lp = match *self {
            Prior::Normal { loc, scale } => Normal::new(loc, scale).ok().map(|d| d.ln_pdf(value)),
            Prior::Gamma {
                concentration,
                rate,
            } => Gamma::new(concentration, rate).ok().map(|d| d.ln_pdf(value)),
            Prior::LogNormal { loc, scale } => {
                LogNormal::new(loc, scale).ok().map(|d| d.ln_pdf(value))
            }
            Prior::Uniform { low, high } => Uniform::new(low, high).ok().map(|d| d.ln_pdf(value)),
        };
        lp.unwrap_or(f64::NEG_INFINITY)
    }

    /// Summed log density over every element of a parameter value.
    pub fn log_prob_sum(&self, values: ArrayView1<'_, f64>) -> f64 {
        values.iter().map(|&v| self.log_prob(v)).sum()
    }
}
