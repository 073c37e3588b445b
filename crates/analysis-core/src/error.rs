use thiserror::Error;

/// Failure returned by indicator consumers, stop calculators and sizing.
///
/// Degenerate numeric input inside an indicator is never an error; it shows up
/// as a NaN element. These variants only surface where a missing value makes a
/// decision impossible.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Undefined value: {0}")]
    Undefined(String),
}
