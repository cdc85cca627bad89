//! The auxiliary physics model wrapped by a prior mean.

use bp_types::CalibrationError;
use ndarray::{Array2, ArrayView2};
use std::fmt;
use std::sync::Arc;

/// A deterministic model evaluated in its native input/output space.
///
/// `evaluate` maps a `(B, x_dim)` batch to a `(B, y_dim)` batch.
pub trait EvaluatedModel: Send + Sync {
    fn x_dim(&self) -> usize;

    fn y_dim(&self) -> usize;

    fn evaluate(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, CalibrationError>;

    /// Human-readable model name for logging.
    fn name(&self) -> &str {
        "model"
    }
}

/// Shared handle to an auxiliary model.
pub type SharedModel = Arc<dyn EvaluatedModel>;

type RowFn = dyn Fn(&[f64]) -> Vec<f64> + Send + Sync;

/// Adapts a row-wise closure into an [`EvaluatedModel`].
pub struct FnModel {
    name: String,
    x_dim: usize,
    y_dim: usize,
    f: Box<RowFn>,
}

impl FnModel {
    pub fn new<F>(name: impl Into<String>, x_dim: usize, y_dim: usize, f: F) -> Self
    where
        F: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            x_dim,
            y_dim,
            f: Box::new(f),
        }
    }

    pub fn shared(self) -> SharedModel {
        Arc::new(self)
    }
}

impl fmt::Debug for FnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModel")
            .field("name", &self.name)
            .field("x_dim", &self.x_dim)
            .field("y_dim", &self.y_dim)
            .finish()
    }
}

impl EvaluatedModel for FnModel {
    fn x_dim(&self) -> usize {
        self.x_dim
    }

    fn y_dim(&self) -> usize {
        self.y_dim
    }

    fn evaluate(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, CalibrationError> {
        check_columns(&self.name, self.x_dim, x.ncols())?;
        let mut out = Array2::zeros((x.nrows(), self.y_dim));
        for (row, mut target) in x.rows().into_iter().zip(out.rows_mut()) {
            let input: Vec<f64> = row.to_vec();
            let y = (self.f)(&input);
            check_columns(&self.name, self.y_dim, y.len())?;
            target.iter_mut().zip(y).for_each(|(slot, v)| *slot = v);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shape guard shared by models and layers.
pub(crate) fn check_columns(
    context: &str,
    expected: usize,
    actual: usize,
) -> Result<(), CalibrationError> {
    if expected != actual {
        return Err(CalibrationError::ShapeMismatch {
            context: context.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
