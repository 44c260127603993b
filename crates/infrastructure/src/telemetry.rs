//! Tracing subscriber setup
//!
//! Console-only: plain or JSON lines on stderr through `tracing-subscriber`.
//! `RUST_LOG` takes precedence over the configured filter.

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::InfrastructureError;

/// Logging setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "ai_runtime=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "gemmunch=info,ai_runtime=info,infrastructure=info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Same settings with a different filter
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
}

/// Install the global tracing subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), InfrastructureError> {
    let (plain, json) = if config.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(plain)
        .with(json)
        .try_init()
        .map_err(|e| InfrastructureError::Telemetry(e.to_string()))?;

    info!(json = config.json, "Tracing initialized");
    Ok(())
}
