//! Ollama-compatible engine adapter
//!
//! Treats a local Ollama-compatible daemon (standard Ollama, hailo-ollama)
//! as the inference engine: loading an engine pre-loads the model into the
//! daemon, sessions are chat conversations, closing the engine unloads it.

mod client;
mod engine;
mod session;

pub use engine::{OllamaEngine, OllamaEngineLoader};
pub use session::OllamaSession;
