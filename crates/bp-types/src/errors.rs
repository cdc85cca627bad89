use thiserror::Error;

/// Main error type for the BeamPrior system
#[derive(Error, Debug)]
pub enum BpError {
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("GP error: {0}")]
    Gp(#[from] GpError),

    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised by calibration layers, parameters, priors and constraints
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Degenerate schedule: step range ({start}, {end}) has zero length")]
    DegenerateSchedule { start: usize, end: usize },

    #[error("Value {value} of parameter {parameter} is outside the constraint domain {constraint}")]
    OutOfDomain {
        parameter: String,
        value: f64,
        constraint: String,
    },

    #[error("Invalid prior {prior}: {message}")]
    InvalidPrior { prior: String, message: String },

    #[error("Invalid constraint: {message}")]
    InvalidConstraint { message: String },

    #[error("Non-finite value produced by {context}")]
    NonFinite { context: String },

    #[error("Auxiliary model evaluation failed: {message}")]
    ModelFailed { message: String },
}

/// Errors raised by input/outcome transforms
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Transform has no fitted statistics: {transform}")]
    NotFitted { transform: String },

    #[error("Transform dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid bounds for dimension {dim}: lower {lower} >= upper {upper}")]
    InvalidBounds { dim: usize, lower: f64, upper: f64 },

    #[error("Cannot fit {transform} on an empty batch")]
    EmptyBatch { transform: String },
}

/// Errors raised by the GP engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpError {
    #[error("Kernel matrix is not positive definite after jitter {jitter}")]
    NotPositiveDefinite { jitter: f64 },

    #[error("Training data mismatch: {message}")]
    TrainingData { message: String },

    #[error("Hyperparameter fitting failed: {message}")]
    FitFailed { message: String },

    #[error("Raw parameter vector has length {actual}, expected {expected}")]
    ParameterLength { expected: usize, actual: usize },

    #[error("Mean function must be single-output, got y_dim {y_dim}")]
    MultiOutputMean { y_dim: usize },
}

/// Errors raised by the BO driver and experiment runner
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExperimentError {
    #[error("Unknown configuration: {name}")]
    UnknownConfig { name: String },

    #[error("Unknown acquisition function: {name}")]
    UnknownAcquisition { name: String },

    #[error("Invalid experiment configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Repetition {repetition} failed at step {step}: {message}")]
    RepetitionFailed {
        repetition: usize,
        step: usize,
        message: String,
    },

    #[error("Run record field not found: {field}")]
    FieldNotFound { field: String },
}

/// Result type alias for BeamPrior operations
pub type BpResult<T> = Result<T, BpError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::BpError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::BpError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::BpError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CalibrationError::ShapeMismatch {
            context: "x_shift".to_string(),
            expected: 3,
            actual: 2,
        };

        assert!(error.to_string().contains("Shape mismatch"));
        assert!(error.to_string().contains("x_shift"));
        assert!(error.to_string().contains('3'));
    }

    #[test]
    fn test_error_conversion() {
        let cal_error = CalibrationError::DegenerateSchedule { start: 5, end: 5 };
        let bp_error: BpError = cal_error.into();

        match bp_error {
            BpError::Calibration(_) => (),
            _ => panic!("Expected Calibration error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, BpError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, BpError::Internal(_)));
        let config_err = config_error!("Missing required field: {}", "n_step");
        assert!(config_err.to_string().contains("n_step"));
    }
}
