//! HTTP plumbing and wire types for Ollama-compatible daemons

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{OllamaConfig, SessionConfig};
use crate::error::RuntimeError;

/// Shared connection to one daemon
#[derive(Debug)]
pub(crate) struct DaemonClient {
    http: Client,
    config: OllamaConfig,
}

impl DaemonClient {
    pub(crate) fn new(config: OllamaConfig) -> Result<Self, RuntimeError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RuntimeError::ConnectionFailed(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub(crate) fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Build the API URL for a given endpoint
    pub(crate) fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// POST a JSON body and decode the JSON answer
    pub(crate) async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R, RuntimeError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(endpoint, "Sending request to daemon");
        let response = self
            .http
            .post(self.api_url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| RuntimeError::from_request(&e, self.config.timeout_ms))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint, status = %status, body = %body, "Daemon request failed");
            return Err(RuntimeError::Inference(format!("Status {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))
    }

    /// `true` if the daemon answers its model listing
    pub(crate) async fn health_check(&self) -> Result<bool, RuntimeError> {
        let response = self
            .http
            .get(self.api_url("tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) if e.is_timeout() || e.is_connect() => Ok(false),
            Err(e) => Err(RuntimeError::ConnectionFailed(e.to_string())),
        }
    }

    pub(crate) async fn list_models(&self) -> Result<Vec<String>, RuntimeError> {
        let response = self
            .http
            .get(self.api_url("tags"))
            .send()
            .await
            .map_err(|e| RuntimeError::from_request(&e, self.config.timeout_ms))?;

        if !response.status().is_success() {
            return Err(RuntimeError::Inference(response.status().to_string()));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Ollama accepts either a duration string ("30m") or a number of seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub(crate) enum KeepAlive {
    Duration(String),
    Seconds(i64),
}

/// `/api/generate` without a prompt: loads or unloads a model
#[derive(Debug, Serialize)]
pub(crate) struct LoadRequest<'a> {
    pub model: &'a str,
    pub keep_alive: KeepAlive,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<LoadOptions>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoadOptions {
    pub num_gpu: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoadResponse {
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub keep_alive: KeepAlive,
    pub options: ChatOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Base64-encoded images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Sampling options derived from the generation's [`SessionConfig`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ChatOptions {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub seed: u64,
    pub num_predict: u32,
    pub num_gpu: u32,
}

impl ChatOptions {
    pub(crate) const fn from_session(config: &SessionConfig, num_gpu: u32) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            seed: config.seed,
            num_predict: config.max_tokens,
            num_gpu,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
