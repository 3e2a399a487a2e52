//! Error types for the multiniche library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum NicheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Malformed contrast list '{input}': {reason}")]
    ContrastSyntax { input: String, reason: String },

    #[error("Group '{group}' referenced by {context} is not present in the data")]
    UnknownGroup { group: String, context: String },

    #[error("Contrast '{0}' has no entry in the contrast-to-group table")]
    MissingContrastGroup(String),

    #[error("Sample '{sample}' has conflicting values for '{column}': '{first}' and '{second}'")]
    InconsistentSample {
        sample: String,
        column: String,
        first: String,
        second: String,
    },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NicheError {
    /// Whether this error stems from user configuration rather than data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NicheError::MissingColumn(_)
                | NicheError::ContrastSyntax { .. }
                | NicheError::UnknownGroup { .. }
                | NicheError::MissingContrastGroup(_)
                | NicheError::InvalidParameter(_)
        )
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, NicheError>;
