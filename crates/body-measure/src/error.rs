//! Error types for measurement operations with rich diagnostics.
//!
//! Data-dependent failures inside the measurement pipeline (empty bands,
//! degenerate hulls, too few points) are never errors: they surface as a
//! missing value plus warning codes on the [`MeasurementResult`]. The errors
//! here cover the surrounding surface: reading vertex files, parsing key and
//! band identifiers, and constructing band configurations.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `MEAS-XXXX`:
//! - `MEAS-1xxx`: I/O errors (file reading, writing, parsing)
//! - `MEAS-2xxx`: Input validation errors (vertex rows, band bounds)
//! - `MEAS-3xxx`: Identifier errors (measurement keys, hip bands, hip methods)
//!
//! # Example
//!
//! ```rust,ignore
//! use body_measure::{MeasureError, MeasureErrorCode};
//!
//! let err = MeasureError::unknown_key("NECK_CIRC_M");
//! println!("Error code: {}", err.code()); // MEAS-3001
//! println!("Recovery: {}", err.recovery_suggestion());
//! ```
//!
//! [`MeasurementResult`]: crate::MeasurementResult

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for measurement operations.
pub type MeasureResult<T> = Result<T, MeasureError>;

/// Machine-readable error codes for measurement operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureErrorCode {
    // I/O errors (1xxx)
    /// MEAS-1001: Failed to read file
    IoRead = 1001,
    /// MEAS-1002: Failed to write file
    IoWrite = 1002,
    /// MEAS-1003: Failed to parse file contents
    ParseError = 1003,

    // Validation errors (2xxx)
    /// MEAS-2001: Vertex row is not a 3-component numeric row
    InvalidVertexData = 2001,
    /// MEAS-2002: Band bounds are not strictly increasing
    InvalidBand = 2002,

    // Identifier errors (3xxx)
    /// MEAS-3001: Unknown measurement key
    UnknownKey = 3001,
    /// MEAS-3002: Unknown hip band config id
    UnknownHipBand = 3002,
    /// MEAS-3003: Unknown hip method name
    UnknownHipMethod = 3003,
}

impl MeasureErrorCode {
    /// Returns the error code as a string in the format `MEAS-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureErrorCode::IoRead => "MEAS-1001",
            MeasureErrorCode::IoWrite => "MEAS-1002",
            MeasureErrorCode::ParseError => "MEAS-1003",
            MeasureErrorCode::InvalidVertexData => "MEAS-2001",
            MeasureErrorCode::InvalidBand => "MEAS-2002",
            MeasureErrorCode::UnknownKey => "MEAS-3001",
            MeasureErrorCode::UnknownHipBand => "MEAS-3002",
            MeasureErrorCode::UnknownHipMethod => "MEAS-3003",
        }
    }
}

impl std::fmt::Display for MeasureErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for measurement errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the input file.
    CheckInputFile { checks: Vec<String> },
    /// Use one of the accepted identifiers.
    UseKnownIdentifier { accepted: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckInputFile { checks } => {
                write!(f, "Check the input file for: {}", checks.join(", "))
            }
            RecoverySuggestion::UseKnownIdentifier { accepted } => {
                write!(f, "Use one of: {}", accepted.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::None => {
                write!(f, "No automatic recovery available")
            }
        }
    }
}

/// Location information for measurement errors.
#[derive(Debug, Clone)]
pub enum ErrorLocation {
    /// Error at a specific vertex row.
    VertexRow { index: usize },
    /// Error in a file.
    File { path: PathBuf },
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorLocation::VertexRow { index } => write!(f, "vertex row {}", index),
            ErrorLocation::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur around measurement operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MeasureError {
    /// Error reading from a file.
    #[error("failed to read vertices from {path}")]
    #[diagnostic(
        code(measure::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(measure::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a vertex file.
    #[error("failed to parse vertices from {path}: {details}")]
    #[diagnostic(
        code(measure::parse::error),
        help("Expected a JSON array of [x, y, z] rows, or an object with a \"verts\" array.")
    )]
    ParseError { path: PathBuf, details: String },

    /// A vertex row could not be interpreted.
    #[error("invalid vertex row {row}: {details}")]
    #[diagnostic(
        code(measure::validation::vertex),
        help("Each vertex must be a row of exactly three numbers in meters.")
    )]
    InvalidVertexData { row: usize, details: String },

    /// Band bounds are not ordered.
    #[error("invalid band: y_start {y_start} must be below y_end {y_end}")]
    #[diagnostic(
        code(measure::validation::band),
        help("Band bounds are fractions of the body height; y_start must be strictly less than y_end.")
    )]
    InvalidBand { y_start: f64, y_end: f64 },

    /// Unknown measurement key.
    #[error("unknown measurement key: {name}")]
    #[diagnostic(
        code(measure::key::unknown),
        help("Supported keys: BUST_CIRC_M, WAIST_CIRC_M, HIP_CIRC_M")
    )]
    UnknownKey { name: String },

    /// Unknown hip band config id.
    #[error("unknown hip band config: {id}")]
    #[diagnostic(
        code(measure::hip::band),
        help("Supported hip band configs: A, B, C, D, E, B_high")
    )]
    UnknownHipBand { id: String },

    /// Unknown hip method.
    #[error("unknown hip method: {name}")]
    #[diagnostic(
        code(measure::hip::method),
        help("Supported hip methods: world_y_band, pelvis_frame_band")
    )]
    UnknownHipMethod { name: String },
}

impl MeasureError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> MeasureErrorCode {
        match self {
            MeasureError::IoRead { .. } => MeasureErrorCode::IoRead,
            MeasureError::IoWrite { .. } => MeasureErrorCode::IoWrite,
            MeasureError::ParseError { .. } => MeasureErrorCode::ParseError,
            MeasureError::InvalidVertexData { .. } => MeasureErrorCode::InvalidVertexData,
            MeasureError::InvalidBand { .. } => MeasureErrorCode::InvalidBand,
            MeasureError::UnknownKey { .. } => MeasureErrorCode::UnknownKey,
            MeasureError::UnknownHipBand { .. } => MeasureErrorCode::UnknownHipBand,
            MeasureError::UnknownHipMethod { .. } => MeasureErrorCode::UnknownHipMethod,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeasureError::IoRead { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            MeasureError::IoWrite { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            MeasureError::ParseError { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["valid JSON".into(), "[N, 3] vertex rows".into()],
            },
            MeasureError::InvalidVertexData { .. } => RecoverySuggestion::CheckInputFile {
                checks: vec!["three numbers per row".into()],
            },
            MeasureError::InvalidBand { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("y_start".into(), "less than y_end".into())],
            },
            MeasureError::UnknownKey { .. } => RecoverySuggestion::UseKnownIdentifier {
                accepted: vec![
                    "BUST_CIRC_M".into(),
                    "WAIST_CIRC_M".into(),
                    "HIP_CIRC_M".into(),
                ],
            },
            MeasureError::UnknownHipBand { .. } => RecoverySuggestion::UseKnownIdentifier {
                accepted: ["A", "B", "C", "D", "E", "B_high"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            MeasureError::UnknownHipMethod { .. } => RecoverySuggestion::UseKnownIdentifier {
                accepted: vec!["world_y_band".into(), "pelvis_frame_band".into()],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<ErrorLocation> {
        match self {
            MeasureError::IoRead { path, .. }
            | MeasureError::IoWrite { path, .. }
            | MeasureError::ParseError { path, .. } => {
                Some(ErrorLocation::File { path: path.clone() })
            }
            MeasureError::InvalidVertexData { row, .. } => {
                Some(ErrorLocation::VertexRow { index: *row })
            }
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeasureError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeasureError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        MeasureError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an InvalidVertexData error.
    pub fn invalid_vertex(row: usize, details: impl Into<String>) -> Self {
        MeasureError::InvalidVertexData {
            row,
            details: details.into(),
        }
    }

    /// Create an UnknownKey error.
    pub fn unknown_key(name: impl Into<String>) -> Self {
        MeasureError::UnknownKey { name: name.into() }
    }

    /// Create an UnknownHipBand error.
    pub fn unknown_hip_band(id: impl Into<String>) -> Self {
        MeasureError::UnknownHipBand { id: id.into() }
    }

    /// Create an UnknownHipMethod error.
    pub fn unknown_hip_method(name: impl Into<String>) -> Self {
        MeasureError::UnknownHipMethod { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MeasureError::unknown_key("NECK_CIRC_M");
        assert_eq!(err.code(), MeasureErrorCode::UnknownKey);
        assert_eq!(err.code().as_str(), "MEAS-3001");

        let err = MeasureError::InvalidBand {
            y_start: 0.5,
            y_end: 0.5,
        };
        assert_eq!(err.code().to_string(), "MEAS-2002");
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = MeasureError::unknown_hip_band("Z");
        match err.recovery_suggestion() {
            RecoverySuggestion::UseKnownIdentifier { accepted } => {
                assert_eq!(accepted.len(), 6);
                assert!(accepted.contains(&"B_high".to_string()));
            }
            _ => panic!("Expected UseKnownIdentifier suggestion"),
        }
    }

    #[test]
    fn test_location_info() {
        let err = MeasureError::invalid_vertex(7, "expected 3 components, found 2");
        match err.location() {
            Some(ErrorLocation::VertexRow { index }) => assert_eq!(index, 7),
            _ => panic!("Expected VertexRow location"),
        }
        assert!(MeasureError::unknown_key("x").location().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = MeasureError::parse_error("verts.json", "expected array");
        let display = format!("{}", err);
        assert!(display.contains("verts.json"));
        assert!(display.contains("expected array"));
    }
}
