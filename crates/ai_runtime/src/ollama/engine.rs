//! Engine and loader backed by an Ollama-compatible daemon

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use domain::{Backend, ModelFile};
use tracing::{info, instrument, warn};

use super::client::{DaemonClient, KeepAlive, LoadOptions, LoadRequest, LoadResponse};
use super::session::OllamaSession;
use crate::config::{OllamaConfig, SessionConfig};
use crate::error::RuntimeError;
use crate::ports::{BoxedSession, Engine, EngineLoader};

/// Layers offloaded to the accelerator; Ollama caps this at the model's layer count
const ALL_LAYERS: u32 = 999;

const fn num_gpu(backend: Backend) -> u32 {
    match backend {
        Backend::Gpu => ALL_LAYERS,
        Backend::Cpu => 0,
    }
}

/// Loads models into a local Ollama-compatible daemon (Ollama, hailo-ollama)
#[derive(Debug)]
pub struct OllamaEngineLoader {
    client: Arc<DaemonClient>,
}

impl OllamaEngineLoader {
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the HTTP client cannot be built.
    pub fn new(config: OllamaConfig) -> Result<Self, RuntimeError> {
        let client = DaemonClient::new(config)?;
        info!(base_url = %client.config().base_url, "Initialized Ollama engine loader");
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// `true` if the daemon is reachable
    pub async fn health_check(&self) -> Result<bool, RuntimeError> {
        self.client.health_check().await
    }

    /// Models known to the daemon
    pub async fn list_models(&self) -> Result<Vec<String>, RuntimeError> {
        self.client.list_models().await
    }
}

/// Daemon model name for a model file: the file stem
fn model_name(model: &ModelFile) -> String {
    model
        .stem()
        .map_or_else(|| model.path().display().to_string(), str::to_string)
}

#[async_trait]
impl EngineLoader for OllamaEngineLoader {
    #[instrument(skip(self, model), fields(model = %model.path().display(), backend = %backend))]
    async fn load(
        &self,
        model: &ModelFile,
        backend: Backend,
    ) -> Result<Arc<dyn Engine>, RuntimeError> {
        let name = model_name(model);
        let request = LoadRequest {
            model: &name,
            keep_alive: KeepAlive::Duration(self.client.config().keep_alive.clone()),
            stream: false,
            options: Some(LoadOptions {
                num_gpu: num_gpu(backend),
            }),
        };

        let response: LoadResponse = self
            .client
            .post("generate", &request)
            .await
            .map_err(|e| RuntimeError::EngineConstruction(e.to_string()))?;
        if !response.done {
            warn!(model = %name, "Daemon did not confirm model load");
        }

        info!(model = %name, backend = %backend, "Model loaded into daemon");
        Ok(Arc::new(OllamaEngine {
            client: Arc::clone(&self.client),
            name,
            path: model.path().to_path_buf(),
            backend,
            next_session: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A model resident in the daemon
#[derive(Debug)]
pub struct OllamaEngine {
    client: Arc<DaemonClient>,
    name: String,
    path: PathBuf,
    backend: Backend,
    next_session: AtomicU64,
    closed: AtomicBool,
}

impl OllamaEngine {
    /// Model name as known to the daemon
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Engine for OllamaEngine {
    fn model_path(&self) -> &Path {
        &self.path
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    async fn create_session(&self, config: &SessionConfig) -> Result<BoxedSession, RuntimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::SessionConstruction(format!(
                "engine for {} is closed",
                self.name
            )));
        }
        Ok(Box::new(OllamaSession::new(
            self.next_session.fetch_add(1, Ordering::SeqCst),
            Arc::clone(&self.client),
            self.name.clone(),
            config,
            num_gpu(self.backend),
        )))
    }

    /// Unload the model from the daemon; failures are logged
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let request = LoadRequest {
            model: &self.name,
            keep_alive: KeepAlive::Seconds(0),
            stream: false,
            options: None,
        };
        match self.client.post::<_, LoadResponse>("generate", &request).await {
            Ok(_) => info!(model = %self.name, "Model unloaded from daemon"),
            Err(e) => warn!(model = %self.name, error = %e, "Failed to unload model"),
        }
    }
}
