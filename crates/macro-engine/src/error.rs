//! Engine error types

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by explicit engine operations
///
/// Configuration problems found while loading are recovered and logged
/// instead; these errors cover API misuse, malformed documents and I/O.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Macro not found: {0}")]
    NotFound(String),

    #[error("Macro already exists: {0}")]
    DuplicateName(String),

    #[error("Macro is not a group: {0}")]
    NotAGroup(String),

    #[error("Invalid group operation: {0}")]
    InvalidGroup(String),

    #[error("Invalid macro document: {0}")]
    InvalidDocument(String),

    #[error("Invalid pause save behavior: {0}")]
    InvalidPauseSaveBehavior(i64),

    #[error("Segment index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}
