//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `gemmunch.toml`, then `GEMMUNCH_` environment variables
//! (e.g. `GEMMUNCH_RUNTIME__POOL_CAPACITY=3`).

use std::path::{Path, PathBuf};

use ai_runtime::{OllamaConfig, RuntimeConfig};
use domain::{ModelFile, ModelFiles, ModelKey};
use serde::{Deserialize, Serialize};

use crate::error::InfrastructureError;
use crate::telemetry::TelemetryConfig;

/// One downloaded model file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub key: ModelKey,
    pub path: PathBuf,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Where the selected model is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesConfig {
    #[serde(default = "default_preferences_path")]
    pub path: PathBuf,
}

fn default_preferences_path() -> PathBuf {
    PathBuf::from("gemmunch-preferences.json")
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: default_preferences_path(),
        }
    }
}

/// Device description overrides and hardware probing inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Overrides the detected device model
    #[serde(default)]
    pub device_model: Option<String>,

    /// Overrides the detected chipset
    #[serde(default)]
    pub chipset: Option<String>,

    /// Device nodes whose presence means a usable GPU
    #[serde(default = "default_gpu_device_nodes")]
    pub gpu_device_nodes: Vec<PathBuf>,

    /// Device nodes whose presence means an NPU
    #[serde(default = "default_npu_device_nodes")]
    pub npu_device_nodes: Vec<PathBuf>,

    /// Vendor validation program and its leading arguments; the model path is appended
    #[serde(default)]
    pub validator_command: Vec<String>,

    /// Upper bound for one validation run in milliseconds
    #[serde(default = "default_validator_timeout_ms")]
    pub validator_timeout_ms: u64,
}

fn default_gpu_device_nodes() -> Vec<PathBuf> {
    ["/dev/kgsl-3d0", "/dev/mali0", "/dev/dri/renderD128"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_npu_device_nodes() -> Vec<PathBuf> {
    vec![PathBuf::from("/dev/hailo0")]
}

const fn default_validator_timeout_ms() -> u64 {
    30_000
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            device_model: None,
            chipset: None,
            gpu_device_nodes: default_gpu_device_nodes(),
            npu_device_nodes: default_npu_device_nodes(),
            validator_command: Vec::new(),
            validator_timeout_ms: default_validator_timeout_ms(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Downloaded model files
    #[serde(default)]
    pub models: Vec<ModelEntry>,

    #[serde(default)]
    pub preferences: PreferencesConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from `gemmunch.toml` in the working directory (if present) and the environment
    pub fn load() -> Result<Self, InfrastructureError> {
        Self::build(config::File::with_name("gemmunch").required(false))
    }

    /// Load from an explicit file, which must exist, and the environment
    pub fn load_from(path: &Path) -> Result<Self, InfrastructureError> {
        Self::build(config::File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, InfrastructureError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .set_default("ollama.base_url", "http://localhost:11434")?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("GEMMUNCH")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("runtime.npu_device_keywords")
                    .with_list_parse_key("platform.validator_command")
                    .try_parsing(true),
            )
            .build()?;

        let app: Self = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Check ranges and cross-field rules
    pub fn validate(&self) -> Result<(), InfrastructureError> {
        self.runtime
            .validate()
            .map_err(|e| InfrastructureError::InvalidConfig(e.to_string()))?;

        let mut seen = std::collections::BTreeSet::new();
        for entry in &self.models {
            if !seen.insert(entry.key.as_str()) {
                return Err(InfrastructureError::InvalidConfig(format!(
                    "model '{}' is configured twice",
                    entry.key
                )));
            }
        }
        Ok(())
    }

    /// Model files keyed by model key
    pub fn model_files(&self) -> ModelFiles {
        self.models
            .iter()
            .map(|entry| {
                (
                    entry.key.clone(),
                    ModelFile::new(entry.path.clone(), entry.size_bytes),
                )
            })
            .collect()
    }
}
