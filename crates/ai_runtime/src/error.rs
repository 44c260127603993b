//! Runtime errors

use domain::DomainError;
use thiserror::Error;

/// Errors that can occur while managing engines and sessions
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The selected model key has no entry in the provided model files
    #[error("No model file configured for key '{key}'")]
    ModelNotConfigured { key: String },

    /// Building an engine instance failed
    #[error("Engine construction failed: {0}")]
    EngineConstruction(String),

    /// Building a session from an engine failed
    #[error("Session construction failed: {0}")]
    SessionConstruction(String),

    /// The platform hardware-validation capability failed
    #[error("Hardware validation failed: {0}")]
    HardwareValidation(String),

    /// A hardware probe failed
    #[error("Hardware probe failed: {0}")]
    Probe(String),

    /// No engine is currently available
    #[error("Engine is not ready")]
    NotReady,

    /// The session pool has been shut down
    #[error("Session pool is closed")]
    PoolClosed,

    /// The lifecycle manager has been destroyed
    #[error("Runtime has been destroyed")]
    Destroyed,

    /// Reading or writing the model preference failed
    #[error("Preference store error: {0}")]
    Preference(String),

    /// The session was already closed by its owner
    #[error("Session already closed")]
    SessionClosed,

    /// Running inference on a session failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Failed to connect to the engine daemon
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Response parsing failed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Timeout talking to the engine daemon
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl RuntimeError {
    /// Whether the error leaves the runtime without a usable engine
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::ModelNotConfigured { .. }
                | Self::EngineConstruction(_)
                | Self::Destroyed
        )
    }

    pub fn model_not_configured(key: impl Into<String>) -> Self {
        Self::ModelNotConfigured { key: key.into() }
    }

    /// Map a transport error from the engine daemon, reporting the configured timeout
    pub fn from_request(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_ms)
        } else if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else {
            Self::Inference(err.to_string())
        }
    }
}

impl From<DomainError> for RuntimeError {
    fn from(err: DomainError) -> Self {
        Self::Configuration(err.to_string())
    }
}
