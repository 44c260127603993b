//! Infrastructure layer - Adapters for the host system
//!
//! Implements the runtime ports against the running device: hardware
//! description and GPU probing, an external hardware validator and a file
//! backed preference store. Also owns layered configuration loading and
//! tracing setup for the binary.

pub mod config;
pub mod error;
pub mod platform;
pub mod preferences;
pub mod telemetry;
pub mod validator;

pub use config::{AppConfig, ModelEntry, PlatformConfig, PreferencesConfig};
pub use error::InfrastructureError;
pub use platform::SystemHardwarePlatform;
pub use preferences::{FilePreferenceStore, InMemoryPreferenceStore};
pub use telemetry::{TelemetryConfig, init_tracing};
pub use validator::CommandHardwareValidator;
