//! Learnable parameters with optional constraint and prior.
//!
//! A [`CalibrationParameter`] is the single descriptor through which every
//! learnable quantity is read and written. Whether the raw storage goes through
//! a constraint bijection is decided by the `constraint` tag, never by probing
//! for the presence of auxiliary fields.

use bp_types::CalibrationError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::prior::Prior;

/// Registration options for a single parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterOptions {
    /// Prior over the constrained value. `None` disables regularization.
    #[serde(default)]
    pub prior: Option<Prior>,
    /// Constraint on the public value. `None` stores the value directly.
    #[serde(default)]
    pub constraint: Option<Constraint>,
}

impl ParameterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn without_prior(mut self) -> Self {
        self.prior = None;
        self
    }

    pub fn unconstrained(mut self) -> Self {
        self.constraint = None;
        self
    }

    /// Normal(0, 1) prior, no constraint.
    pub fn shift_default() -> Self {
        Self::new().with_prior(Prior::standard_normal())
    }

    /// Gamma(2, 2) prior with a positive constraint.
    pub fn scale_default() -> Self {
        Self::new()
            .with_prior(Prior::default_scale())
            .with_constraint(Constraint::Positive)
    }
}

/// A named, vector-valued learnable quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameter {
    name: String,
    raw: Array1<f64>,
    constraint: Option<Constraint>,
    prior: Option<Prior>,
}

impl CalibrationParameter {
    /// Register a parameter whose public value starts at `initial`.
    pub fn new(
        name: impl Into<String>,
        initial: ArrayView1<'_, f64>,
        options: ParameterOptions,
    ) -> Result<Self, CalibrationError> {
        let name = name.into();
        if initial.is_empty() {
            return Err(CalibrationError::ShapeMismatch {
                context: name,
                expected: 1,
                actual: 0,
            });
        }
        if let Some(constraint) = &options.constraint {
            constraint.validate()?;
        }
        if let Some(prior) = &options.prior {
            prior.validate()?;
        }

        let mut param = Self {
            raw: Array1::zeros(initial.len()),
            name,
            constraint: options.constraint,
            prior: options.prior,
        };
        param.set_value(initial)?;
        Ok(param)
    }

    /// Register a parameter of dimension `dim` with every element set to `value`.
    pub fn filled(
        name: impl Into<String>,
        dim: usize,
        value: f64,
        options: ParameterOptions,
    ) -> Result<Self, CalibrationError> {
        let initial = Array1::from_elem(dim, value);
        Self::new(name, initial.view(), options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim(&self) -> usize {
        self.raw.len()
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    pub fn prior(&self) -> Option<&Prior> {
        self.prior.as_ref()
    }

    pub fn is_constrained(&self) -> bool {
        self.constraint.is_some()
    }

    /// Raw (unconstrained) storage.
    pub fn raw(&self) -> ArrayView1<'_, f64> {
        self.raw.view()
    }

    /// Public value: the constraint-transformed view of raw storage.
    pub fn value(&self) -> Array1<f64> {
        match &self.constraint {
            Some(c) => self.raw.mapv(|r| c.transform(r)),
            None => self.raw.clone(),
        }
    }

    /// Write a public value, inverse-transforming into raw storage.
    pub fn set_value(&mut self, value: ArrayView1<'_, f64>) -> Result<(), CalibrationError> {
        self.check_dim(value.len())?;
        let raw = match &self.constraint {
            Some(c) => {
                let mut raw = Array1::zeros(value.len());
                for (slot, &v) in raw.iter_mut().zip(value.iter()) {
                    *slot = c.inverse_transform(v).ok_or_else(|| CalibrationError::OutOfDomain {
                        parameter: self.name.clone(),
                        value: v,
                        constraint: c.to_string(),
                    })?;
                }
                raw
            }
            None => {
                if let Some(&bad) = value.iter().find(|v| !v.is_finite()) {
                    return Err(CalibrationError::OutOfDomain {
                        parameter: self.name.clone(),
                        value: bad,
                        constraint: "finite".to_string(),
                    });
                }
                value.to_owned()
            }
        };
        self.raw = raw;
        Ok(())
    }

    /// Set every element of the public value to `value`.
    pub fn fill_value(&mut self, value: f64) -> Result<(), CalibrationError> {
        let filled = Array1::from_elem(self.dim(), value);
        self.set_value(filled.view())
    }

    /// Overwrite raw storage directly, as an optimizer does.
    pub fn set_raw(&mut self, raw: &[f64]) -> Result<(), CalibrationError> {
        self.check_dim(raw.len())?;
        if raw.iter().any(|r| !r.is_finite()) {
            return Err(CalibrationError::NonFinite {
                context: format!("raw update of {}", self.name),
            });
        }
        self.raw.iter_mut().zip(raw).for_each(|(slot, &r)| *slot = r);
        Ok(())
    }

    /// Log prior density of the current public value; zero without a prior.
    pub fn log_prior(&self) -> f64 {
        match &self.prior {
            Some(prior) => prior.log_prob_sum(self.value().view()),
            None => 0.0,
        }
    }

    fn check_dim(&self, actual: usize) -> Result<(), CalibrationError> {
        if actual != self.raw.len() {
            return Err(CalibrationError::ShapeMismatch {
                context: self.name.clone(),
                expected: self.raw.len(),
                actual,
            });
        }
        Ok(())
    }
}
