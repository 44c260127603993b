//! Infrastructure errors

use std::path::PathBuf;

use ai_runtime::RuntimeError;
use thiserror::Error;

/// Errors raised by platform adapters and configuration loading
#[derive(Debug, Error)]
pub enum InfrastructureError {
    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File system access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The tracing subscriber could not be installed
    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),
}

impl InfrastructureError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<InfrastructureError> for RuntimeError {
    fn from(err: InfrastructureError) -> Self {
        match err {
            InfrastructureError::Config(_) | InfrastructureError::InvalidConfig(_) => {
                Self::Configuration(err.to_string())
            },
            _ => Self::Preference(err.to_string()),
        }
    }
}
