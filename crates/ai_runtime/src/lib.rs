//! AI Runtime - engine lifecycle and session pooling for on-device inference
//!
//! Picks a hardware backend for a model, owns the single loaded engine and
//! keeps a small pool of pre-warmed sessions so callers never pay cold-start
//! latency. Platform specifics (engine loading, GPU probing, hardware
//! validation, preference persistence) come in through the traits in
//! [`ports`].

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod ollama;
pub mod pool;
pub mod ports;
pub mod selector;

#[cfg(test)]
mod testing;

pub use config::{OllamaConfig, RuntimeConfig, SessionConfig};
pub use error::RuntimeError;
pub use lifecycle::{EngineLifecycleManager, LifecycleState};
pub use metrics::{
    MetricsEvent, MetricsEventKind, MetricsTree, PHASE_INITIALIZATION, PHASE_MODEL_SWITCH,
    PHASE_PREWARMING, PhaseSnapshot, SubPhaseSnapshot,
};
pub use ollama::{OllamaEngine, OllamaEngineLoader, OllamaSession};
pub use pool::{PoolStats, SessionPool};
pub use ports::{
    BoxedSession, Engine, EngineLoader, HardwarePlatform, HardwareValidator, InferenceSession,
    ManagedResource, PreferenceStore, SessionInput, ValidatedAcceleration,
};
pub use selector::BackendSelector;
