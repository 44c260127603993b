//! Chat session against a loaded daemon model

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use tracing::{debug, instrument};

use super::client::{ChatMessage, ChatOptions, ChatRequest, ChatResponse, DaemonClient, KeepAlive};
use crate::config::SessionConfig;
use crate::error::RuntimeError;
use crate::ports::{InferenceSession, SessionInput};

/// One conversation; keeps its own message history until closed
pub struct OllamaSession {
    id: u64,
    client: Arc<DaemonClient>,
    model: String,
    options: ChatOptions,
    enable_vision: bool,
    history: Vec<ChatMessage>,
    closed: bool,
}

impl fmt::Debug for OllamaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaSession")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("turns", &self.history.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl OllamaSession {
    pub(crate) fn new(
        id: u64,
        client: Arc<DaemonClient>,
        model: String,
        config: &SessionConfig,
        num_gpu: u32,
    ) -> Self {
        Self {
            id,
            client,
            model,
            options: ChatOptions::from_session(config, num_gpu),
            enable_vision: config.enable_vision,
            history: Vec::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl InferenceSession for OllamaSession {
    fn id(&self) -> u64 {
        self.id
    }

    #[instrument(skip(self, input), fields(session = self.id, model = %self.model, images = input.images.len()))]
    async fn generate(&mut self, input: &SessionInput) -> Result<String, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::SessionClosed);
        }
        if input.has_images() && !self.enable_vision {
            return Err(RuntimeError::Inference(
                "image input given but vision is disabled".to_string(),
            ));
        }

        self.history.push(ChatMessage {
            role: "user".to_string(),
            content: input.prompt.clone(),
            images: input
                .images
                .iter()
                .map(|image| base64::engine::general_purpose::STANDARD.encode(image))
                .collect(),
        });

        let request = ChatRequest {
            model: &self.model,
            messages: &self.history,
            stream: false,
            keep_alive: KeepAlive::Duration(self.client.config().keep_alive.clone()),
            options: self.options.clone(),
        };

        let response: ChatResponse = match self.client.post("chat", &request).await {
            Ok(response) => response,
            Err(e) => {
                self.history.pop();
                return Err(e);
            },
        };

        debug!(done = response.done, "Inference completed");
        let content = response.message.content.clone();
        self.history.push(response.message);
        Ok(content)
    }

    fn close(&mut self) {
        self.closed = true;
        self.history.clear();
    }
}
