//! Error types for gridbench
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::llm::LlmError;

/// All error types that can occur in gridbench
#[derive(Debug, Error)]
pub enum GridbenchError {
    /// No model is both selected and credentialed
    #[error("No models available: {0}")]
    NoModelsAvailable(String),

    /// Record not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed puzzle data
    #[error("Invalid puzzle: {0}")]
    InvalidPuzzle(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Provider call error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for gridbench operations
pub type Result<T> = std::result::Result<T, GridbenchError>;
