//! Prior-mean interface consumed by the GP and the physics-informed
//! [`PriorMean`] implementation.

use bp_types::{BpResult, CalibrationError};
use ndarray::{Array1, Array2, ArrayView2};
use tracing::debug;

use crate::layer::CalibrationLayer;
use crate::model::{check_columns, SharedModel};
use crate::parameter::CalibrationParameter;
use crate::transforms::TransformPipeline;

/// A GP prior mean: a batch of GP-space inputs plus the BO step maps to a
/// batch of GP-space outputs.
///
/// Implementors expose their learnable parameters in a stable order so that
/// an optimizer can treat them as one flat raw vector.
pub trait MeanFunction: Send + Sync {
    fn y_dim(&self) -> usize;

    fn forward(&self, x: ArrayView2<'_, f64>, step: usize) -> BpResult<Array2<f64>>;

    fn parameters(&self) -> Vec<&CalibrationParameter>;

    fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter>;

    fn name(&self) -> &str {
        "mean"
    }

    /// Adopt the orchestrator's current transform statistics. Means that do
    /// not work in native space ignore this.
    fn sync_transforms(&mut self, _pipeline: &TransformPipeline) -> BpResult<()> {
        Ok(())
    }

    /// Total length of the flattened raw parameter vector.
    fn raw_len(&self) -> usize {
        self.parameters().iter().map(|p| p.dim()).sum()
    }

    /// Concatenated raw storage of every parameter.
    fn raw_parameters(&self) -> Vec<f64> {
        self.parameters()
            .iter()
            .flat_map(|p| p.raw().to_vec())
            .collect()
    }

    /// Overwrite raw storage from a flat vector laid out as in [`raw_parameters`].
    ///
    /// [`raw_parameters`]: MeanFunction::raw_parameters
    fn load_raw_parameters(&mut self, raw: &[f64]) -> Result<(), CalibrationError> {
        check_columns("mean raw parameters", self.raw_len(), raw.len())?;
        let mut offset = 0;
        for param in self.parameters_mut() {
            let dim = param.dim();
            param.set_raw(&raw[offset..offset + dim])?;
            offset += dim;
        }
        Ok(())
    }

    /// Sum of the log priors of every parameter.
    fn log_prior(&self) -> f64 {
        self.parameters().iter().map(|p| p.log_prior()).sum()
    }

    /// Public values keyed by parameter name.
    fn named_values(&self) -> Vec<(String, Array1<f64>)> {
        self.parameters()
            .iter()
            .map(|p| (p.name().to_string(), p.value()))
            .collect()
    }
}

/// Prior mean built from an auxiliary model, a transform pipeline and one
/// calibration layer.
#[derive(Clone)]
pub struct PriorMean {
    pipeline: TransformPipeline,
    model: SharedModel,
    layer: CalibrationLayer,
}

impl PriorMean {
    pub fn new(
        pipeline: TransformPipeline,
        model: SharedModel,
        layer: CalibrationLayer,
    ) -> BpResult<Self> {
        check_columns("pipeline inputs", model.x_dim(), pipeline.x_dim())?;
        check_columns("pipeline outcomes", model.y_dim(), pipeline.y_dim())?;
        layer.check_dims(model.x_dim(), model.y_dim())?;
        debug!(
            model = model.name(),
            layer = ?layer.kind(),
            params = layer.parameters().len(),
            "assembled prior mean"
        );
        Ok(Self {
            pipeline,
            model,
            layer,
        })
    }

    /// Prior mean without any calibration.
    pub fn uncalibrated(pipeline: TransformPipeline, model: SharedModel) -> BpResult<Self> {
        Self::new(pipeline, model, CalibrationLayer::identity())
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    pub fn layer(&self) -> &CalibrationLayer {
        &self.layer
    }

    pub fn layer_mut(&mut self) -> &mut CalibrationLayer {
        &mut self.layer
    }

    /// Refit the outcome standardization on native observations.
    pub fn adapt_outcome(&mut self, y: ArrayView2<'_, f64>) -> BpResult<bool> {
        Ok(self.pipeline.adapt_outcome(y)?)
    }

    /// Replace the pipeline with one of the same dimensions.
    pub fn set_pipeline(&mut self, pipeline: TransformPipeline) -> BpResult<()> {
        check_columns("pipeline inputs", self.pipeline.x_dim(), pipeline.x_dim())?;
        check_columns("pipeline outcomes", self.pipeline.y_dim(), pipeline.y_dim())?;
        let mut pipeline = pipeline;
        pipeline.freeze();
        self.pipeline = pipeline;
        Ok(())
    }

    /// Evaluate the calibrated prior mean at GP-space points.
    pub fn evaluate(&self, x: ArrayView2<'_, f64>, step: usize) -> BpResult<Array2<f64>> {
        check_columns("prior mean inputs", self.pipeline.x_dim(), x.ncols())?;
        let x_model = self.pipeline.to_model_space(x)?;
        let x_model = self.layer.correct_input(x_model.view())?;
        let y_model = self.model.evaluate(x_model.view())?;
        check_columns(self.model.name(), self.model.y_dim(), y_model.ncols())?;
        if y_model.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite {
                context: self.model.name().to_string(),
            }
            .into());
        }
        let y_model = self.layer.correct_output(y_model.view(), step)?;
        Ok(self.pipeline.to_gp_space(y_model.view())?)
    }
}

impl std::fmt::Debug for PriorMean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorMean")
            .field("model", &self.model.name())
            .field("pipeline", &self.pipeline)
            .field("layer", &self.layer)
            .finish()
    }
}

impl MeanFunction for PriorMean {
    fn y_dim(&self) -> usize {
        self.model.y_dim()
    }

    fn forward(&self, x: ArrayView2<'_, f64>, step: usize) -> BpResult<Array2<f64>> {
        self.evaluate(x, step)
    }

    fn parameters(&self) -> Vec<&CalibrationParameter> {
        self.layer.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut CalibrationParameter> {
        self.layer.parameters_mut()
    }

    fn name(&self) -> &str {
        "prior_mean"
    }

    fn sync_transforms(&mut self, pipeline: &TransformPipeline) -> BpResult<()> {
        self.set_pipeline(pipeline.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LinearOptions, OffsetOptions};
    use crate::model::FnModel;
    use crate::transforms::DataTransform;
    use approx::assert_relative_eq;
    use bp_types::BpError;
    use ndarray::array;

    fn square_model() -> SharedModel {
        FnModel::new("square", 1, 1, |x| vec![x[0] * x[0]]).shared()
    }

    #[test]
    fn identity_layer_reproduces_model() {
        let mean =
            PriorMean::uncalibrated(TransformPipeline::identity(1, 1), square_model()).unwrap();
        let y = mean.evaluate(array![[2.0], [-3.0]].view(), 0).unwrap();
        assert_eq!(y, array![[4.0], [9.0]]);
    }

    #[test]
    fn input_correction_precedes_model_and_output_follows() {
        let layer = CalibrationLayer::linear(&LinearOptions::default()).unwrap();
        let mut mean =
            PriorMean::new(TransformPipeline::identity(1, 1), square_model(), layer).unwrap();
        let l = mean.layer_mut();
        l.parameter_mut("x_shift").unwrap().fill_value(1.0).unwrap();
        l.parameter_mut("x_scale").unwrap().fill_value(2.0).unwrap();
        l.parameter_mut("y_scale").unwrap().fill_value(0.5).unwrap();
        l.parameter_mut("y_shift").unwrap().fill_value(-1.0).unwrap();

        // 0.5 * (2 * (1 + 1))^2 - 1
        let y = mean.evaluate(array![[1.0]].view(), 0).unwrap();
        assert_relative_eq!(y[[0, 0]], 7.0, epsilon = 1e-10);
    }

    #[test]
    fn pipeline_wraps_the_chain() {
        let input = DataTransform::normalize(array![0.0], array![4.0]).unwrap();
        let mut outcome = DataTransform::standardize(1);
        outcome.fit(array![[0.0], [2.0]].view()).unwrap();
        let pipeline = TransformPipeline::new(input, outcome);
        let mean = PriorMean::uncalibrated(pipeline, square_model()).unwrap();

        // GP 0.5 -> native 2.0 -> model 4.0 -> standardized (4 - 1) / sqrt(2)
        let y = mean.evaluate(array![[0.5]].view(), 0).unwrap();
        assert_relative_eq!(y[[0, 0]], 3.0 / 2f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn raw_vector_roundtrip_reaches_values() {
        let layer = CalibrationLayer::output_offset(&OffsetOptions::default()).unwrap();
        let mut mean =
            PriorMean::new(TransformPipeline::identity(1, 1), square_model(), layer).unwrap();
        assert_eq!(mean.raw_len(), 1);
        mean.load_raw_parameters(&[0.25]).unwrap();
        assert_eq!(mean.raw_parameters(), vec![0.25]);
        let y = mean.forward(array![[1.0]].view(), 0).unwrap();
        assert_relative_eq!(y[[0, 0]], 1.25, epsilon = 1e-12);
        assert!(mean.load_raw_parameters(&[0.0, 1.0]).is_err());
    }

    #[test]
    fn mismatched_dimensions_fail_eagerly() {
        let layer = CalibrationLayer::linear(&LinearOptions::default()).unwrap();
        let err = PriorMean::new(TransformPipeline::identity(2, 1), square_model(), layer)
            .unwrap_err();
        assert!(matches!(
            err,
            BpError::Calibration(CalibrationError::ShapeMismatch { .. })
        ));

        let mean =
            PriorMean::uncalibrated(TransformPipeline::identity(1, 1), square_model()).unwrap();
        assert!(matches!(
            mean.evaluate(array![[1.0, 2.0]].view(), 0),
            Err(BpError::Calibration(CalibrationError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn synced_pipeline_is_used_for_evaluation() {
        let mut mean =
            PriorMean::uncalibrated(TransformPipeline::identity(1, 1), square_model()).unwrap();
        let mut pipeline = TransformPipeline::new(
            DataTransform::identity(1),
            DataTransform::standardize(1),
        );
        pipeline.adapt_outcome(array![[1.0], [3.0]].view()).unwrap();
        mean.sync_transforms(&pipeline).unwrap();

        let y = mean.evaluate(array![[2.0]].view(), 0).unwrap();
        assert_relative_eq!(y[[0, 0]], 2.0 / 2f64.sqrt(), epsilon = 1e-10);
        assert!(mean
            .sync_transforms(&TransformPipeline::identity(2, 1))
            .is_err());
    }

    #[test]
    fn non_finite_model_output_is_an_error() {
        let model = FnModel::new("nan", 1, 1, |_| vec![f64::NAN]).shared();
        let mean = PriorMean::uncalibrated(TransformPipeline::identity(1, 1), model).unwrap();
        assert!(matches!(
            mean.evaluate(array![[0.0]].view(), 0),
            Err(BpError::Calibration(CalibrationError::NonFinite { .. }))
        ));
    }

    #[test]
    fn named_values_follow_layer_order() {
        let layer = CalibrationLayer::linear(&LinearOptions::default()).unwrap();
        let mean =
            PriorMean::new(TransformPipeline::identity(1, 1), square_model(), layer).unwrap();
        let names: Vec<String> = mean.named_values().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x_shift", "x_scale", "y_shift", "y_scale"]);
        assert!(mean.log_prior().is_finite());
    }
}
