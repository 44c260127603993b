//! Port definitions for the engine runtime
//!
//! Defines the traits (ports) that platform and engine adapters implement.
//! The runtime only ever talks to these; how an engine is loaded or whether
//! a platform offers hardware validation is decided by the adapter.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Backend, HardwareProfile, ModelFile, ModelKey};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::RuntimeError;

/// Input for one inference call; contents are opaque to the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInput {
    /// Prompt text
    pub prompt: String,
    /// Encoded images (JPEG/PNG bytes)
    pub images: Vec<Vec<u8>>,
}

impl SessionInput {
    /// Text-only input
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }

    /// Attach an image
    #[must_use]
    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.images.push(image);
        self
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// A single-use execution context created from an engine
///
/// Owned by the session pool until handed out; the receiver is responsible
/// for calling [`InferenceSession::close`] after its one unit of work.
#[async_trait]
pub trait InferenceSession: Send + Debug {
    /// Identifier, unique per engine
    fn id(&self) -> u64;

    /// Run inference for one input
    async fn generate(&mut self, input: &SessionInput) -> Result<String, RuntimeError>;

    /// Release the session; idempotent
    fn close(&mut self);
}

/// Owned session handed across the pool boundary
pub type BoxedSession = Box<dyn InferenceSession>;

/// A loaded model instance bound to one backend and one model file
#[async_trait]
pub trait Engine: Send + Sync + Debug {
    /// Model file this engine was built from
    fn model_path(&self) -> &Path;

    /// Backend the engine runs on
    fn backend(&self) -> Backend;

    /// Create a new session with the given generation parameters
    async fn create_session(&self, config: &SessionConfig) -> Result<BoxedSession, RuntimeError>;

    /// Release the engine; idempotent
    async fn close(&self);
}

/// Builds engine instances
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Load the model file onto the given backend
    async fn load(&self, model: &ModelFile, backend: Backend)
    -> Result<Arc<dyn Engine>, RuntimeError>;
}

/// Acceleration configuration confirmed by a platform capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedAcceleration {
    pub backend: Backend,
    #[serde(default, alias = "benchmark_ms")]
    pub benchmark_duration_ms: u64,
}

/// Optional platform capability that validates acceleration for a model
#[async_trait]
pub trait HardwareValidator: Send + Sync {
    /// `Ok(None)` means the capability is not available on this platform
    async fn try_validate(
        &self,
        model_path: &Path,
    ) -> Result<Option<ValidatedAcceleration>, RuntimeError>;
}

/// Device description and GPU probing
#[async_trait]
pub trait HardwarePlatform: Send + Sync {
    /// Describe the device
    fn profile(&self) -> HardwareProfile;

    /// Check whether GPU execution is available (may be slow)
    async fn probe_gpu(&self) -> Result<bool, RuntimeError>;
}

/// Persisted model selection
#[cfg_attr(test, mockall::automock)]
pub trait PreferenceStore: Send + Sync {
    /// Currently selected model, if any was ever persisted
    fn selected_model(&self) -> Option<ModelKey>;

    /// Persist a new selection
    fn set_selected_model(&self, key: &ModelKey) -> Result<(), RuntimeError>;
}

/// External resource opened alongside the runtime and closed on destroy
#[cfg_attr(test, mockall::automock)]
pub trait ManagedResource: Send + Sync {
    fn name(&self) -> String;

    fn open(&self) -> Result<(), RuntimeError>;

    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_input_text() {
        let input = SessionInput::text("What food is this?");
        assert_eq!(input.prompt, "What food is this?");
        assert!(!input.has_images());
    }

    #[test]
    fn session_input_with_images() {
        let input = SessionInput::text("Identify")
            .with_image(vec![0xFF, 0xD8])
            .with_image(vec![0x89, 0x50]);
        assert_eq!(input.images.len(), 2);
        assert!(input.has_images());
    }

    #[test]
    fn validated_acceleration_deserializes_without_benchmark() {
        let parsed: ValidatedAcceleration = serde_json::from_str(r#"{"backend":"GPU"}"#).unwrap();
        assert_eq!(parsed.backend, Backend::Gpu);
        assert_eq!(parsed.benchmark_duration_ms, 0);
    }

    #[test]
    fn mock_preference_store() {
        let mut store = MockPreferenceStore::new();
        store
            .expect_selected_model()
            .returning(|| Some(ModelKey::e2b()));
        assert_eq!(store.selected_model(), Some(ModelKey::e2b()));
    }
}
