//! Input normalization and outcome standardization between GP space and the
//! auxiliary model's native space.
//!
//! Transforms carry a [`TransformMode`]. Statistics are only ever refit through
//! an explicit [`DataTransform::fit`] call made in adapting mode; forward and
//! inverse maps take `&self` and cannot drift during inference.

use bp_types::TransformError;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Smallest admissible normalization range or standard deviation.
const MIN_SCALE: f64 = 1e-8;

/// Whether a transform may refit its statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformMode {
    Adapting,
    Eval,
}

/// The supported transform families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformKind {
    Identity,
    /// Affine map of `[lower, upper]` onto the unit cube. Bounds are learned
    /// from data when not supplied.
    Normalize {
        lower: Option<Array1<f64>>,
        upper: Option<Array1<f64>>,
    },
    /// Zero-mean, unit-variance map. Statistics are learned from data.
    Standardize {
        means: Option<Array1<f64>>,
        stdvs: Option<Array1<f64>>,
    },
}

/// A column-wise transform over `(B, dim)` batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransform {
    kind: TransformKind,
    dim: usize,
    mode: TransformMode,
}

impl DataTransform {
    pub fn identity(dim: usize) -> Self {
        Self {
            kind: TransformKind::Identity,
            dim,
            mode: TransformMode::Eval,
        }
    }

    /// Normalization with fixed bounds.
    pub fn normalize(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self, TransformError> {
        if lower.len() != upper.len() {
            return Err(TransformError::DimensionMismatch {
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        for (dim, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !(lo < hi) {
                return Err(TransformError::InvalidBounds {
                    dim,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self {
            dim: lower.len(),
            kind: TransformKind::Normalize {
                lower: Some(lower),
                upper: Some(upper),
            },
            mode: TransformMode::Eval,
        })
    }

    /// Normalization whose bounds are learned on the first fit.
    pub fn normalize_learned(dim: usize) -> Self {
        Self {
            kind: TransformKind::Normalize {
                lower: None,
                upper: None,
            },
            dim,
            mode: TransformMode::Adapting,
        }
    }

    /// Standardization whose statistics are learned by `fit`.
    pub fn standardize(dim: usize) -> Self {
        Self {
            kind: TransformKind::Standardize {
                means: None,
                stdvs: None,
            },
            dim,
            mode: TransformMode::Adapting,
        }
    }

    pub fn kind(&self) -> &TransformKind {
        &self.kind
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn eval(&mut self) {
        self.mode = TransformMode::Eval;
    }

    pub fn train(&mut self) {
        self.mode = TransformMode::Adapting;
    }

    fn label(&self) -> &'static str {
        match self.kind {
            TransformKind::Identity => "identity",
            TransformKind::Normalize { .. } => "normalize",
            TransformKind::Standardize { .. } => "standardize",
        }
    }

    /// Refit statistics on `data`. Returns `false` (and leaves statistics
    /// untouched) unless the transform is in adapting mode.
    pub fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<bool, TransformError> {
        if self.mode != TransformMode::Adapting {
            return Ok(false);
        }
        self.check_dim(data.ncols())?;
        if data.nrows() == 0 {
            return Err(TransformError::EmptyBatch {
                transform: self.label().to_string(),
            });
        }

        match &mut self.kind {
            TransformKind::Identity => return Ok(false),
            TransformKind::Normalize { lower, upper } => {
                let lo = data.fold_axis(Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
                let hi = data.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
                let hi = ndarray::Zip::from(&lo)
                    .and(&hi)
                    .map_collect(|&l, &h| h.max(l + MIN_SCALE));
                *lower = Some(lo);
                *upper = Some(hi);
            }
            TransformKind::Standardize { means, stdvs } => {
                let n = data.nrows();
                let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(data.ncols()));
                let std = if n > 1 {
                    data.std_axis(Axis(0), 1.0).mapv(|s| s.max(MIN_SCALE))
                } else {
                    Array1::ones(data.ncols())
                };
                *means = Some(mean);
                *stdvs = Some(std);
            }
        }
        Ok(true)
    }

    /// Forward map.
    pub fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, TransformError> {
        self.check_dim(x.ncols())?;
        match &self.kind {
            TransformKind::Identity => Ok(x.to_owned()),
            TransformKind::Normalize { lower, upper } => {
                let (lo, hi) = self.fitted(lower, upper)?;
                Ok((&x - lo) / &(hi - lo))
            }
            TransformKind::Standardize { means, stdvs } => {
                let (m, s) = self.fitted(means, stdvs)?;
                Ok((&x - m) / s)
            }
        }
    }

    /// Inverse map.
    pub fn inverse(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, TransformError> {
        self.check_dim(x.ncols())?;
        match &self.kind {
            TransformKind::Identity => Ok(x.to_owned()),
            TransformKind::Normalize { lower, upper } => {
                let (lo, hi) = self.fitted(lower, upper)?;
                Ok(&x * &(hi - lo) + lo)
            }
            TransformKind::Standardize { means, stdvs } => {
                let (m, s) = self.fitted(means, stdvs)?;
                Ok(&x * s + m)
            }
        }
    }

    fn fitted<'a>(
        &self,
        a: &'a Option<Array1<f64>>,
        b: &'a Option<Array1<f64>>,
    ) -> Result<(&'a Array1<f64>, &'a Array1<f64>), TransformError> {
        match (a, b) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(TransformError::NotFitted {
                transform: self.label().to_string(),
            }),
        }
    }

    fn check_dim(&self, actual: usize) -> Result<(), TransformError> {
        if actual != self.dim {
            return Err(TransformError::DimensionMismatch {
                expected: self.dim,
                actual,
            });
        }
        Ok(())
    }
}

/// Input transform plus outcome transform, as shared with the GP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformPipeline {
    input: DataTransform,
    outcome: DataTransform,
}

impl TransformPipeline {
    /// Build a pipeline; both transforms are switched to eval mode.
    pub fn new(input: DataTransform, outcome: DataTransform) -> Self {
        let mut pipeline = Self { input, outcome };
        pipeline.freeze();
        pipeline
    }

    pub fn identity(x_dim: usize, y_dim: usize) -> Self {
        Self::new(DataTransform::identity(x_dim), DataTransform::identity(y_dim))
    }

    pub fn input(&self) -> &DataTransform {
        &self.input
    }

    pub fn outcome(&self) -> &DataTransform {
        &self.outcome
    }

    pub fn x_dim(&self) -> usize {
        self.input.dim()
    }

    pub fn y_dim(&self) -> usize {
        self.outcome.dim()
    }

    /// Force both transforms into non-adapting mode.
    pub fn freeze(&mut self) {
        self.input.eval();
        self.outcome.eval();
    }

    /// GP-space inputs to native model inputs.
    pub fn to_model_space(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, TransformError> {
        self.input.inverse(x)
    }

    /// Native model inputs to GP-space inputs.
    pub fn to_gp_inputs(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, TransformError> {
        self.input.forward(x)
    }

    /// Native model outputs to GP-space outputs.
    pub fn to_gp_space(&self, y: ArrayView2<'_, f64>) -> Result<Array2<f64>, TransformError> {
        self.outcome.forward(y)
    }

    /// GP-space outputs back to native outputs.
    pub fn from_gp_space(&self, y: ArrayView2<'_, f64>) -> Result<Array2<f64>, TransformError> {
        self.outcome.inverse(y)
    }

    /// Refit the outcome transform on native outputs, then freeze again.
    pub fn adapt_outcome(&mut self, y: ArrayView2<'_, f64>) -> Result<bool, TransformError> {
        self.outcome.train();
        let fitted = self.outcome.fit(y);
        self.freeze();
        fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn normalize_maps_bounds_to_unit_cube() {
        let t = DataTransform::normalize(array![-2.0, 0.0], array![2.0, 10.0]).unwrap();
        let x = array![[-2.0, 0.0], [0.0, 5.0], [2.0, 10.0]];
        let z = t.forward(x.view()).unwrap();
        assert_eq!(z, array![[0.0, 0.0], [0.5, 0.5], [1.0, 1.0]]);
        let back = t.inverse(z.view()).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn normalize_rejects_inverted_bounds() {
        let err = DataTransform::normalize(array![1.0], array![0.0]).unwrap_err();
        assert!(matches!(err, TransformError::InvalidBounds { dim: 0, .. }));
    }

    #[test]
    fn standardize_fits_unbiased_statistics() {
        let mut t = DataTransform::standardize(1);
        let y = array![[1.0], [2.0], [3.0]];
        assert!(t.fit(y.view()).unwrap());
        let z = t.forward(y.view()).unwrap();
        assert_relative_eq!(z[[0, 0]], -1.0, epsilon = 1e-12);
        assert_relative_eq!(z[[1, 0]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(z[[2, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn standardize_single_observation_uses_unit_scale() {
        let mut t = DataTransform::standardize(1);
        t.fit(array![[4.0]].view()).unwrap();
        let z = t.forward(array![[5.0]].view()).unwrap();
        assert_relative_eq!(z[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn eval_mode_does_not_refit() {
        let mut t = DataTransform::standardize(1);
        t.fit(array![[0.0], [2.0]].view()).unwrap();
        t.eval();
        assert!(!t.fit(array![[100.0], [300.0]].view()).unwrap());
        let z = t.forward(array![[1.0]].view()).unwrap();
        assert_relative_eq!(z[[0, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unfitted_standardize_errors() {
        let t = DataTransform::standardize(1);
        assert!(matches!(
            t.forward(array![[1.0]].view()),
            Err(TransformError::NotFitted { .. })
        ));
    }

    #[test]
    fn learned_normalize_uses_data_range() {
        let mut t = DataTransform::normalize_learned(1);
        t.fit(array![[2.0], [6.0]].view()).unwrap();
        let z = t.forward(array![[4.0]].view()).unwrap();
        assert_relative_eq!(z[[0, 0]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn pipeline_freezes_after_adaptation() {
        let mut pipeline = TransformPipeline::new(
            DataTransform::normalize(array![0.0], array![4.0]).unwrap(),
            DataTransform::standardize(1),
        );
        assert_eq!(pipeline.outcome().mode(), TransformMode::Eval);
        assert!(pipeline.adapt_outcome(array![[1.0], [3.0]].view()).unwrap());
        assert_eq!(pipeline.outcome().mode(), TransformMode::Eval);
        assert_eq!(pipeline.input().mode(), TransformMode::Eval);

        let x_model = pipeline.to_model_space(array![[0.25]].view()).unwrap();
        assert_relative_eq!(x_model[[0, 0]], 1.0, epsilon = 1e-12);
        let y_gp = pipeline.to_gp_space(array![[2.0]].view()).unwrap();
        assert_relative_eq!(y_gp[[0, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let pipeline = TransformPipeline::identity(2, 1);
        assert!(matches!(
            pipeline.to_model_space(array![[1.0]].view()),
            Err(TransformError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }
}
