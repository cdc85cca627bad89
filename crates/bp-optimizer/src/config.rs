//! Experiment configuration: named presets, JSON loading and validation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bp_calibration::{
    CalibrationSpec, FlattenOptions, LinearInputOptions, LinearOptions, LinearOutputOptions,
    OffsetOptions, ScaleOptions,
};
use bp_gp::FitConfig;
use bp_types::{BpResult, ExperimentError};
use serde::{Deserialize, Serialize};

use crate::acquisition::{AcquisitionConfig, AcquisitionOptimizer};

/// Width of the beamline input (three quadrupole strengths).
const BEAMLINE_X_DIM: usize = 3;
/// Offset used by the `fixed_offset` preset.
pub const FIXED_OFFSET: f64 = 5e-3;

/// Named experiment presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigName {
    ConstantPrior,
    NoAdjustment,
    OffsetCalibration,
    ScaleCalibration,
    FixedOffset,
    Flatten,
    Alternate,
    LinearInput,
    LinearOutput,
    LinearCalibration,
}

impl ConfigName {
    pub const ALL: [ConfigName; 10] = [
        ConfigName::ConstantPrior,
        ConfigName::NoAdjustment,
        ConfigName::OffsetCalibration,
        ConfigName::ScaleCalibration,
        ConfigName::FixedOffset,
        ConfigName::Flatten,
        ConfigName::Alternate,
        ConfigName::LinearInput,
        ConfigName::LinearOutput,
        ConfigName::LinearCalibration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigName::ConstantPrior => "constant_prior",
            ConfigName::NoAdjustment => "no_adjustment",
            ConfigName::OffsetCalibration => "offset_calibration",
            ConfigName::ScaleCalibration => "scale_calibration",
            ConfigName::FixedOffset => "fixed_offset",
            ConfigName::Flatten => "flatten",
            ConfigName::Alternate => "alternate",
            ConfigName::LinearInput => "linear_input",
            ConfigName::LinearOutput => "linear_output",
            ConfigName::LinearCalibration => "linear_calibration",
        }
    }
}

impl fmt::Display for ConfigName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigName {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ExperimentError::UnknownConfig {
                name: s.to_string(),
            })
    }
}

/// Which prior mean the GP uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriorConfig {
    /// Flat learnable constant, rebuilt at every step.
    Constant,
    /// Auxiliary model behind a calibration layer.
    Calibrated { calibration: CalibrationSpec },
    /// Uncalibrated auxiliary model, replaced by a constant mean on every
    /// step divisible by `period`.
    Alternate { period: usize },
}

impl PriorConfig {
    pub fn is_constant(&self) -> bool {
        matches!(self, PriorConfig::Constant)
    }
}

/// Everything needed to run one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub name: ConfigName,
    pub acquisition: AcquisitionConfig,
    /// Random initial samples per repetition.
    pub n_init: usize,
    pub n_run: usize,
    /// BO steps per repetition.
    pub n_step: usize,
    /// Size of the held-out evaluation set for posterior metrics.
    pub n_eval: usize,
    /// Miscalibration level of the auxiliary model.
    pub mismatch: f64,
    pub seed: u64,
    /// Build a fresh prior mean for every repetition instead of carrying the
    /// calibration across the whole experiment.
    pub reset_per_repetition: bool,
    pub prior: PriorConfig,
    pub fit: FitConfig,
    pub optimizer: AcquisitionOptimizer,
    pub output_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::preset(ConfigName::NoAdjustment)
    }
}

impl ExperimentConfig {
    /// Preset for a named configuration with the default run sizes.
    pub fn preset(name: ConfigName) -> Self {
        let calibrated = |calibration| PriorConfig::Calibrated { calibration };
        let prior = match name {
            ConfigName::ConstantPrior => PriorConfig::Constant,
            ConfigName::NoAdjustment => calibrated(CalibrationSpec::Identity),
            ConfigName::OffsetCalibration => {
                calibrated(CalibrationSpec::OutputOffset(OffsetOptions::default()))
            }
            ConfigName::ScaleCalibration => {
                calibrated(CalibrationSpec::OutputScale(ScaleOptions::default()))
            }
            ConfigName::FixedOffset => calibrated(CalibrationSpec::FixedOffset {
                y_dim: 1,
                y_shift: FIXED_OFFSET,
            }),
            ConfigName::Flatten => calibrated(CalibrationSpec::Flatten(
                FlattenOptions::default()
                    .with_step_range(5, 15)
                    .with_w_lim(0.01, 0.99),
            )),
            ConfigName::Alternate => PriorConfig::Alternate { period: 4 },
            ConfigName::LinearInput => calibrated(CalibrationSpec::LinearInput(
                LinearInputOptions::default().with_x_dim(BEAMLINE_X_DIM),
            )),
            ConfigName::LinearOutput => {
                calibrated(CalibrationSpec::LinearOutput(LinearOutputOptions::default()))
            }
            ConfigName::LinearCalibration => calibrated(CalibrationSpec::Linear(LinearOptions {
                input: LinearInputOptions::default().with_x_dim(BEAMLINE_X_DIM),
                output: LinearOutputOptions::default(),
            })),
        };

        Self {
            name,
            acquisition: AcquisitionConfig::ExpectedImprovement,
            n_init: 3,
            n_run: 100,
            n_step: 50,
            n_eval: 10_000,
            mismatch: 0.5,
            seed: 0,
            reset_per_repetition: false,
            prior,
            fit: FitConfig::default(),
            optimizer: AcquisitionOptimizer::default(),
            output_dir: PathBuf::from("results"),
        }
    }

    /// Load from a JSON file. Fields the file omits come from the preset it
    /// names, or from `no_adjustment` when it names none.
    pub fn from_json_file(path: impl AsRef<Path>) -> BpResult<Self> {
        Self::load_json(path.as_ref(), None)
    }

    /// Load from a JSON file, filling omitted fields from the `name` preset.
    /// A file that names a different preset is rejected.
    pub fn from_json_file_as(path: impl AsRef<Path>, name: ConfigName) -> BpResult<Self> {
        Self::load_json(path.as_ref(), Some(name))
    }

    fn load_json(path: &Path, requested: Option<ConfigName>) -> BpResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        let config = Self::overlay_preset(value, requested)?;
        config.validate()?;
        Ok(config)
    }

    fn overlay_preset(value: serde_json::Value, requested: Option<ConfigName>) -> BpResult<Self> {
        let serde_json::Value::Object(fields) = value else {
            return Err(bp_types::config_error!(
                "experiment configuration must be a JSON object"
            ));
        };
        let named = fields
            .get("name")
            .cloned()
            .map(serde_json::from_value::<ConfigName>)
            .transpose()?;
        let name = match (named, requested) {
            (Some(file), Some(cli)) if file != cli => {
                return Err(bp_types::config_error!(
                    "configuration file is for {file} but {cli} was requested"
                ));
            }
            (named, requested) => named.or(requested).unwrap_or(ConfigName::NoAdjustment),
        };

        let serde_json::Value::Object(mut merged) = serde_json::to_value(Self::preset(name))? else {
            return Err(bp_types::internal_error!("preset {name} is not a JSON object"));
        };
        merged.extend(fields);
        merged.insert("name".to_string(), serde_json::to_value(name)?);
        Ok(serde_json::from_value(serde_json::Value::Object(merged))?)
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionConfig) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_n_init(mut self, n: usize) -> Self {
        self.n_init = n;
        self
    }

    pub fn with_n_run(mut self, n: usize) -> Self {
        self.n_run = n;
        self
    }

    pub fn with_n_step(mut self, n: usize) -> Self {
        self.n_step = n;
        self
    }

    pub fn with_n_eval(mut self, n: usize) -> Self {
        self.n_eval = n;
        self
    }

    pub fn with_mismatch(mut self, mismatch: f64) -> Self {
        self.mismatch = mismatch;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_reset_per_repetition(mut self, reset: bool) -> Self {
        self.reset_per_repetition = reset;
        self
    }

    pub fn with_fit(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    pub fn with_optimizer(mut self, optimizer: AcquisitionOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Mismatch level recorded with results; `None` for the constant prior,
    /// which never sees the auxiliary model.
    pub fn recorded_mismatch(&self) -> Option<f64> {
        if self.prior.is_constant() {
            None
        } else {
            Some(self.mismatch)
        }
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        let invalid = |message: String| Err(ExperimentError::InvalidConfig { message });
        if self.n_init == 0 {
            return invalid("n_init must be at least 1".to_string());
        }
        if self.n_run == 0 {
            return invalid("n_run must be at least 1".to_string());
        }
        if self.n_eval == 0 {
            return invalid("n_eval must be at least 1".to_string());
        }
        if !(self.mismatch.is_finite() && self.mismatch >= 0.0) {
            return invalid(format!("mismatch must be finite and non-negative, got {}", self.mismatch));
        }
        if let PriorConfig::Alternate { period: 0 } = self.prior {
            return invalid("alternate period must be at least 1".to_string());
        }
        self.optimizer.validate()?;
        self.acquisition.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_types::BpError;
    use std::io::Write;

    #[test]
    fn names_roundtrip_through_strings() {
        for name in ConfigName::ALL {
            assert_eq!(name.to_string().parse::<ConfigName>().unwrap(), name);
        }
        assert!(matches!(
            "bogus".parse::<ConfigName>(),
            Err(ExperimentError::UnknownConfig { .. })
        ));
    }

    #[test]
    fn presets_use_driver_defaults() {
        let cfg = ExperimentConfig::preset(ConfigName::Flatten);
        assert_eq!((cfg.n_init, cfg.n_run, cfg.n_step), (3, 100, 50));
        assert_eq!(cfg.acquisition, AcquisitionConfig::ExpectedImprovement);
        assert!(!cfg.reset_per_repetition);
        match cfg.prior {
            PriorConfig::Calibrated {
                calibration: CalibrationSpec::Flatten(ref o),
            } => {
                assert_eq!(o.step_range, (5, 15));
                assert_eq!(o.w_lim, (0.01, 0.99));
            }
            ref other => panic!("unexpected prior {other:?}"),
        }
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn fixed_offset_and_alternate_presets() {
        match ExperimentConfig::preset(ConfigName::FixedOffset).prior {
            PriorConfig::Calibrated {
                calibration: CalibrationSpec::FixedOffset { y_shift, .. },
            } => assert_eq!(y_shift, FIXED_OFFSET),
            other => panic!("unexpected prior {other:?}"),
        }
        assert_eq!(
            ExperimentConfig::preset(ConfigName::Alternate).prior,
            PriorConfig::Alternate { period: 4 }
        );
    }

    #[test]
    fn constant_prior_records_no_mismatch() {
        assert_eq!(ExperimentConfig::preset(ConfigName::ConstantPrior).recorded_mismatch(), None);
        assert_eq!(
            ExperimentConfig::preset(ConfigName::ScaleCalibration)
                .with_mismatch(0.25)
                .recorded_mismatch(),
            Some(0.25)
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = ExperimentConfig::preset(ConfigName::NoAdjustment);
        assert!(base.clone().with_n_init(0).validate().is_err());
        assert!(base.clone().with_n_run(0).validate().is_err());
        assert!(base.clone().with_mismatch(f64::NAN).validate().is_err());
        assert!(base
            .clone()
            .with_acquisition(AcquisitionConfig::UpperConfidenceBound { beta: -2.0 })
            .validate()
            .is_err());
        let mut alt = ExperimentConfig::preset(ConfigName::Alternate);
        alt.prior = PriorConfig::Alternate { period: 0 };
        assert!(alt.validate().is_err());
        for optimizer in [
            AcquisitionOptimizer::default().with_radius(-0.1, 0.5),
            AcquisitionOptimizer::default().with_radius(f64::NAN, 0.5),
            AcquisitionOptimizer::default().with_radius(0.1, f64::NAN),
            AcquisitionOptimizer::default().with_radius(0.1, 1.5),
            AcquisitionOptimizer::default().with_candidates(0),
        ] {
            assert!(matches!(
                base.clone().with_optimizer(optimizer).validate(),
                Err(ExperimentError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn negative_radius_in_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "flatten", "optimizer": {{"initial_radius": -0.1}}}}"#).unwrap();
        assert!(matches!(
            ExperimentConfig::from_json_file(file.path()),
            Err(BpError::Experiment(ExperimentError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn loads_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "offset_calibration", "n_run": 2, "n_step": 4,
                "acquisition": {{"type": "upper_confidence_bound", "beta": 0.5}},
                "prior": {{"type": "calibrated", "calibration": {{"kind": "output_offset", "initial": 0.1}}}}}}"#
        )
        .unwrap();
        let cfg = ExperimentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.name, ConfigName::OffsetCalibration);
        assert_eq!((cfg.n_run, cfg.n_step, cfg.n_init), (2, 4, 3));
        assert_eq!(cfg.acquisition.label(), "UCB");
        match cfg.prior {
            PriorConfig::Calibrated {
                calibration: CalibrationSpec::OutputOffset(o),
            } => assert_eq!(o.initial, 0.1),
            other => panic!("unexpected prior {other:?}"),
        }
    }

    #[test]
    fn name_only_file_takes_the_named_preset() {
        for name in [ConfigName::ConstantPrior, ConfigName::Flatten, ConfigName::Alternate] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, r#"{{"name": "{name}", "n_run": 2}}"#).unwrap();
            let cfg = ExperimentConfig::from_json_file(file.path()).unwrap();
            assert_eq!(cfg.name, name);
            assert_eq!(cfg.prior, ExperimentConfig::preset(name).prior);
            assert_eq!(cfg.n_run, 2);
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "constant_prior"}}"#).unwrap();
        let cfg = ExperimentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.recorded_mismatch(), None);
    }

    #[test]
    fn requested_name_fills_unnamed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"n_step": 7}}"#).unwrap();
        let cfg = ExperimentConfig::from_json_file_as(file.path(), ConfigName::Flatten).unwrap();
        assert_eq!(cfg.name, ConfigName::Flatten);
        assert_eq!(cfg.prior, ExperimentConfig::preset(ConfigName::Flatten).prior);
        assert_eq!(cfg.n_step, 7);

        let cfg = ExperimentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.name, ConfigName::NoAdjustment);
    }

    #[test]
    fn conflicting_names_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "constant_prior"}}"#).unwrap();
        assert!(matches!(
            ExperimentConfig::from_json_file_as(file.path(), ConfigName::Flatten),
            Err(BpError::Config(_))
        ));
        assert!(ExperimentConfig::from_json_file_as(file.path(), ConfigName::ConstantPrior).is_ok());
    }

    #[test]
    fn non_object_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        assert!(matches!(
            ExperimentConfig::from_json_file(file.path()),
            Err(BpError::Config(_))
        ));
    }

    #[test]
    fn invalid_json_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"n_init": 0}}"#).unwrap();
        assert!(ExperimentConfig::from_json_file(file.path()).is_err());
    }
}
