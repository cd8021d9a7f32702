use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the calibration workspace.
///
/// Everything that reaches the entry point as a `CalibrationError` is fatal to
/// the run. Per-trial failures (solver crashes, unparsable output) are carried
/// as data in a `TrialOutcome` and never surface through this type, so a
/// `DataError` only enters it explicitly, as `GroundTruth`.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ground truth error: {0}")]
    GroundTruth(DataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History error: {0}")]
    History(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration and case-template errors. All of them abort the run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid bounds: lower {lower} must be finite and below upper {upper}")]
    InvalidBounds { lower: f64, upper: f64 },

    #[error("Invalid penalty {penalty}: must be finite and positive")]
    InvalidPenalty { penalty: f64 },

    #[error("Invalid setting {field}: {message}")]
    InvalidSetting { field: String, message: String },

    #[error("Template not found: {path}")]
    TemplateNotFound { path: PathBuf },

    #[error("Malformed template {path}: {message}")]
    MalformedTemplate { path: PathBuf, message: String },

    #[error("Case resource not found: {path}")]
    ResourceNotFound { path: PathBuf },
}

/// Profile loading, parsing and comparison errors.
///
/// Raised while loading ground truth these are fatal; raised while evaluating a
/// trial's output they demote that trial to a crash.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("Profile positions must be strictly increasing: point {index} at {current} follows {previous}")]
    NotMonotonic {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("Non-finite value in profile at point {index}")]
    NonFinite { index: usize },

    #[error("Insufficient coverage: position {position} lies outside simulated range [{min}, {max}]")]
    InsufficientCoverage { position: f64, min: f64, max: f64 },
}

/// Result type alias for calibration operations
pub type CalibResult<T> = Result<T, CalibrationError>;

/// Macro for creating configuration setting errors
#[macro_export]
macro_rules! config_error {
    ($field:expr, $($arg:tt)*) => {
        $crate::ConfigError::InvalidSetting {
            field: $field.to_string(),
            message: format!($($arg)*),
        }
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CalibrationError::Internal(format!($($arg)*))
    };
}
