//! Error types for core value decoding

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while decoding persisted core values
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// Logic code outside of the known combinator set
    #[error("invalid logic type: {0}")]
    InvalidLogic(i64),

    /// Duration modifier code outside of the known modes
    #[error("invalid duration modifier type: {0}")]
    InvalidDurationMode(i64),

    /// Duration unit code outside of seconds/minutes/hours
    #[error("invalid duration unit: {0}")]
    InvalidDurationUnit(i64),

    /// Duration value that is negative or not a finite number
    #[error("invalid duration value: {0}")]
    InvalidDurationValue(f64),
}
