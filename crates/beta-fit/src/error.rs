//! Error types for fitting operations with rich diagnostics.
//!
//! A failed fit never aborts a batch: the batch runner turns a [`FitError`]
//! into a stub result plus a diagnostics file and moves on. Errors that
//! escape the batch are I/O failures on the run directory itself.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `FIT-XXXX`:
//! - `FIT-1xxx`: I/O errors (run directory, result files, target files)
//! - `FIT-2xxx`: Mesh provider errors
//! - `FIT-3xxx`: Input validation errors (targets, eval sets)
//! - `FIT-4xxx`: Measurement errors passed through from `body-measure`

use body_measure::MeasureError;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fitting operations.
pub type FitResult<T> = Result<T, FitError>;

/// Machine-readable error codes for fitting operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitErrorCode {
    // I/O errors (1xxx)
    /// FIT-1001: Failed to read file
    IoRead = 1001,
    /// FIT-1002: Failed to write file
    IoWrite = 1002,
    /// FIT-1003: Failed to parse file contents
    ParseError = 1003,

    // Provider errors (2xxx)
    /// FIT-2001: Mesh provider failed to generate a mesh
    ProviderFailed = 2001,
    /// FIT-2002: Shape vector has the wrong length or non-finite entries
    InvalidBeta = 2002,
    /// FIT-2003: Unknown mesh provider name
    UnknownProvider = 2003,
    /// FIT-2004: Mesh provider panicked during generation
    ProviderPanicked = 2004,

    // Validation errors (3xxx)
    /// FIT-3001: Target vector is empty or non-finite
    InvalidTargets = 3001,
    /// FIT-3002: Evaluation set too small
    EvalSetTooSmall = 3002,

    // Measurement errors (4xxx)
    /// FIT-4001: Error raised by the measurement library
    Measure = 4001,
}

impl FitErrorCode {
    /// Returns the error code as a string in the format `FIT-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FitErrorCode::IoRead => "FIT-1001",
            FitErrorCode::IoWrite => "FIT-1002",
            FitErrorCode::ParseError => "FIT-1003",
            FitErrorCode::ProviderFailed => "FIT-2001",
            FitErrorCode::InvalidBeta => "FIT-2002",
            FitErrorCode::UnknownProvider => "FIT-2003",
            FitErrorCode::ProviderPanicked => "FIT-2004",
            FitErrorCode::InvalidTargets => "FIT-3001",
            FitErrorCode::EvalSetTooSmall => "FIT-3002",
            FitErrorCode::Measure => "FIT-4001",
        }
    }
}

impl std::fmt::Display for FitErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for fitting errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the file or directory.
    CheckPath { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Run a prerequisite step first.
    RunFirst { command: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckPath { checks } => {
                write!(f, "Check: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::RunFirst { command } => {
                write!(f, "Run `{}` first", command)
            }
            RecoverySuggestion::None => {
                write!(f, "No automatic recovery available")
            }
        }
    }
}

/// Errors that can occur during fitting and batch runs.
#[derive(Debug, Error, Diagnostic)]
pub enum FitError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(fit::io::read),
        help("Check that the file exists and is readable")
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(fit::io::write),
        help("Check that the run directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a JSON file.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(code(fit::parse::error))]
    ParseError { path: PathBuf, details: String },

    /// The mesh provider could not build a mesh.
    #[error("mesh provider '{provider}' failed: {details}")]
    #[diagnostic(code(fit::provider::failed))]
    ProviderFailed { provider: String, details: String },

    /// The shape vector does not suit the provider.
    #[error("invalid shape vector for '{provider}': {details}")]
    #[diagnostic(
        code(fit::provider::beta),
        help("Pass at most num_betas() finite coefficients")
    )]
    InvalidBeta { provider: String, details: String },

    /// Unknown mesh provider name.
    #[error("unknown mesh provider: {name}")]
    #[diagnostic(
        code(fit::provider::unknown),
        help("Supported providers: scaled, torso")
    )]
    UnknownProvider { name: String },

    /// The mesh provider panicked while generating a mesh.
    #[error("mesh provider '{provider}' panicked: {message}")]
    #[diagnostic(
        code(fit::provider::panicked),
        help("This is a bug in the mesh provider; the prototype is recorded as failed")
    )]
    ProviderPanicked { provider: String, message: String },

    /// The target vector cannot be fitted.
    #[error("invalid targets: {details}")]
    #[diagnostic(
        code(fit::validation::targets),
        help("Targets must be finite circumferences in meters for the fitted keys")
    )]
    InvalidTargets { details: String },

    /// Evaluation set has too few prototypes.
    #[error("evaluation set has {found} prototypes, need at least {required}")]
    #[diagnostic(
        code(fit::validation::eval_set),
        help("Fit more prototypes or build the hip evaluation set first")
    )]
    EvalSetTooSmall { found: usize, required: usize },

    /// Error from the measurement library.
    #[error("measurement failed: {0}")]
    #[diagnostic(code(fit::measure))]
    Measure(#[from] MeasureError),
}

impl FitError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> FitErrorCode {
        match self {
            FitError::IoRead { .. } => FitErrorCode::IoRead,
            FitError::IoWrite { .. } => FitErrorCode::IoWrite,
            FitError::ParseError { .. } => FitErrorCode::ParseError,
            FitError::ProviderFailed { .. } => FitErrorCode::ProviderFailed,
            FitError::InvalidBeta { .. } => FitErrorCode::InvalidBeta,
            FitError::UnknownProvider { .. } => FitErrorCode::UnknownProvider,
            FitError::ProviderPanicked { .. } => FitErrorCode::ProviderPanicked,
            FitError::InvalidTargets { .. } => FitErrorCode::InvalidTargets,
            FitError::EvalSetTooSmall { .. } => FitErrorCode::EvalSetTooSmall,
            FitError::Measure(_) => FitErrorCode::Measure,
        }
    }

    /// Short type name recorded as `error_type` in stub results.
    pub fn error_type(&self) -> &'static str {
        match self {
            FitError::IoRead { .. } | FitError::IoWrite { .. } => "IoError",
            FitError::ParseError { .. } => "ParseError",
            FitError::ProviderFailed { .. } => "ProviderError",
            FitError::InvalidBeta { .. } => "InvalidBeta",
            FitError::UnknownProvider { .. } => "UnknownProvider",
            FitError::ProviderPanicked { .. } => "ProviderPanic",
            FitError::InvalidTargets { .. } => "InvalidTargets",
            FitError::EvalSetTooSmall { .. } => "EvalSetTooSmall",
            FitError::Measure(_) => "MeasureError",
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            FitError::IoRead { .. } | FitError::ParseError { .. } => {
                RecoverySuggestion::CheckPath {
                    checks: vec!["file exists".into(), "valid JSON".into()],
                }
            }
            FitError::IoWrite { .. } => RecoverySuggestion::CheckPath {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            FitError::ProviderFailed { .. }
            | FitError::InvalidBeta { .. }
            | FitError::ProviderPanicked { .. } => {
                RecoverySuggestion::AdjustParameters {
                    parameters: vec![("--mesh-provider".into(), "scaled".into())],
                }
            }
            FitError::UnknownProvider { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("--mesh-provider".into(), "scaled | torso".into())],
            },
            FitError::InvalidTargets { .. } => RecoverySuggestion::CheckPath {
                checks: vec!["centroid_vectors are finite".into(), "feature_keys".into()],
            },
            FitError::EvalSetTooSmall { .. } => RecoverySuggestion::RunFirst {
                command: "body fit --k 40".into(),
            },
            FitError::Measure(_) => RecoverySuggestion::None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        FitError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a ProviderFailed error.
    pub fn provider(provider: impl Into<String>, details: impl Into<String>) -> Self {
        FitError::ProviderFailed {
            provider: provider.into(),
            details: details.into(),
        }
    }

    /// Create an InvalidBeta error.
    pub fn invalid_beta(provider: impl Into<String>, details: impl Into<String>) -> Self {
        FitError::InvalidBeta {
            provider: provider.into(),
            details: details.into(),
        }
    }

    /// Create a ProviderPanicked error from a caught panic payload.
    pub fn provider_panicked(
        provider: impl Into<String>,
        payload: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        FitError::ProviderPanicked {
            provider: provider.into(),
            message,
        }
    }

    /// Create an InvalidTargets error.
    pub fn invalid_targets(details: impl Into<String>) -> Self {
        FitError::InvalidTargets {
            details: details.into(),
        }
    }
}
