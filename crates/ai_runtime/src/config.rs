//! Configuration for the engine runtime

use std::time::Duration;

use domain::ModelKey;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Configuration for backend selection, pooling and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model used when the preference store has no selection
    #[serde(default = "default_model")]
    pub default_model: ModelKey,

    /// Number of pre-warmed sessions kept ready
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Upper bound for the GPU availability probe in milliseconds
    #[serde(default = "default_gpu_probe_timeout_ms")]
    pub gpu_probe_timeout_ms: u64,

    /// Device families (model or chipset keywords) known to carry an NPU
    #[serde(default = "default_npu_device_keywords")]
    pub npu_device_keywords: Vec<String>,

    /// Minimum unaccounted phase time shown as an overhead line in reports
    #[serde(default = "default_overhead_threshold_ms")]
    pub overhead_threshold_ms: u64,

    /// Generation parameters shared by all sessions of an engine
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_model() -> ModelKey {
    ModelKey::e4b()
}

const fn default_pool_capacity() -> usize {
    2
}

const fn default_gpu_probe_timeout_ms() -> u64 {
    5000
}

fn default_npu_device_keywords() -> Vec<String> {
    [
        "pixel 8",
        "pixel 9",
        "tensor",
        "s24",
        "s25",
        "snapdragon 8 gen",
        "dimensity 9",
        "hailo",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

const fn default_overhead_threshold_ms() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            pool_capacity: default_pool_capacity(),
            gpu_probe_timeout_ms: default_gpu_probe_timeout_ms(),
            npu_device_keywords: default_npu_device_keywords(),
            overhead_threshold_ms: default_overhead_threshold_ms(),
            session: SessionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Check ranges that serde defaults cannot enforce
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.pool_capacity == 0 {
            return Err(RuntimeError::Configuration(
                "pool_capacity must be at least 1".to_string(),
            ));
        }
        if self.gpu_probe_timeout_ms == 0 {
            return Err(RuntimeError::Configuration(
                "gpu_probe_timeout_ms must be positive".to_string(),
            ));
        }
        self.session.validate()
    }

    pub const fn gpu_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.gpu_probe_timeout_ms)
    }

    pub const fn overhead_threshold(&self) -> Duration {
        Duration::from_millis(self.overhead_threshold_ms)
    }
}

/// Fixed generation parameters for every session of one engine generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sampling temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top-k sampling
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Top-p (nucleus) sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Random seed for reproducible sampling
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Accept image input
    #[serde(default = "default_enable_vision")]
    pub enable_vision: bool,

    /// Accept audio input
    #[serde(default)]
    pub enable_audio: bool,

    /// Maximum tokens to generate per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_temperature() -> f32 {
    0.05
}

const fn default_top_k() -> u32 {
    64
}

const fn default_top_p() -> f32 {
    0.95
}

const fn default_seed() -> u64 {
    42
}

const fn default_enable_vision() -> bool {
    true
}

const fn default_max_tokens() -> u32 {
    1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            seed: default_seed(),
            enable_vision: default_enable_vision(),
            enable_audio: false,
            max_tokens: default_max_tokens(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RuntimeError::Configuration(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(RuntimeError::Configuration(format!(
                "top_p {} outside (0.0, 1.0]",
                self.top_p
            )));
        }
        if self.top_k == 0 {
            return Err(RuntimeError::Configuration(
                "top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for an Ollama-compatible accelerator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the daemon (e.g. hailo-ollama)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long the daemon keeps a loaded model resident (Ollama duration syntax)
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

const fn default_timeout_ms() -> u64 {
    120_000
}

fn default_keep_alive() -> String {
    "30m".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            keep_alive: default_keep_alive(),
        }
    }
}
