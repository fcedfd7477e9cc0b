//! Error types for the creel estimation library.

use thiserror::Error;

/// Main error type for creel estimation operations.
///
/// Every fatal variant names the offending column or parameter and carries
/// a short remediation hint, so a failed call can be fixed without digging
/// through the input tables.
#[derive(Debug, Error)]
pub enum CreelError {
    /// A column the estimator needs is not present in the frame.
    #[error("missing column '{column}': {hint}")]
    MissingColumn { column: String, hint: String },

    /// A column exists but holds the wrong kind of values.
    #[error("column '{column}' is {found}, expected {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    /// An estimator or design parameter is out of range or inconsistent.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: &'static str, message: String },

    /// No rows or no columns to work with.
    #[error("empty data: {0}")]
    EmptyFrame(String),

    /// No interview/count stratum matched the sampling calendar.
    #[error("stratum mismatch on [{strata}]: {detail}")]
    StratumMismatch { strata: String, detail: String },

    /// Replicate-weight sets that should line up do not.
    #[error("replicate mismatch: {0}")]
    ReplicateMismatch(String),

    /// Error from the CSV library.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CreelError {
    /// Shorthand for a missing-column error with a remediation hint.
    pub(crate) fn missing_column(column: &str, hint: &str) -> Self {
        CreelError::MissingColumn {
            column: column.to_string(),
            hint: hint.to_string(),
        }
    }

    /// Shorthand for an invalid-parameter error.
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        CreelError::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}

/// Result type alias for creel estimation operations.
pub type Result<T> = std::result::Result<T, CreelError>;
