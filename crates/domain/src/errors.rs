//! Domain-level errors

use thiserror::Error;

/// Errors that can occur in the domain layer
#[derive(Debug, Error)]
pub enum DomainError {
    /// Model key is empty, too long or contains unsupported characters
    #[error("Invalid model key: {0}")]
    InvalidModelKey(String),

    /// Validation failed
    #[error("Validation failed: {0}")]
    ValidationError(String),
}
