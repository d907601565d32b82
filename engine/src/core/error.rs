//! Keyscout Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // =========================================================================
    // Frame Index Errors
    // =========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index build failed: {0}")]
    IndexError(String),

    // =========================================================================
    // Vector Store Errors
    // =========================================================================
    #[error("Vector store unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Returns true when the error must abort the whole search request.
    ///
    /// `NotFound` and `MalformedRecord` only affect a single lookup or record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::NotFound(_) | CoreError::MalformedRecord(_))
    }
}
