//! Test doubles for engines, sessions and platform capabilities.
//!
//! Every fake counts what happened to it so tests can assert ownership
//! invariants (live engines, closed sessions) rather than log output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::{Backend, HardwareProfile, ModelFile, ModelKey};
use parking_lot::{Mutex, RwLock};

use crate::config::SessionConfig;
use crate::error::RuntimeError;
use crate::ports::{
    BoxedSession, Engine, EngineLoader, HardwarePlatform, HardwareValidator, InferenceSession,
    PreferenceStore, SessionInput, ValidatedAcceleration,
};

/// Counters shared by a loader and every engine/session it produced
#[derive(Debug, Default)]
pub struct Counters {
    pub engines_loaded: AtomicUsize,
    pub engines_live: AtomicUsize,
    pub max_engines_live: AtomicUsize,
    pub engines_closed: AtomicUsize,
    pub sessions_created: AtomicUsize,
    pub sessions_closed: AtomicUsize,
}

impl Counters {
    pub fn engines_live(&self) -> usize {
        self.engines_live.load(Ordering::SeqCst)
    }

    pub fn max_engines_live(&self) -> usize {
        self.max_engines_live.load(Ordering::SeqCst)
    }

    pub fn engines_loaded(&self) -> usize {
        self.engines_loaded.load(Ordering::SeqCst)
    }

    pub fn engines_closed(&self) -> usize {
        self.engines_closed.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct FakeSession {
    id: u64,
    closed: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl InferenceSession for FakeSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn generate(&mut self, input: &SessionInput) -> Result<String, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::SessionClosed);
        }
        Ok(format!("echo: {}", input.prompt))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub struct FakeEngine {
    path: PathBuf,
    backend: Backend,
    counters: Arc<Counters>,
    next_session: AtomicU64,
    closed: AtomicBool,
    session_delay: Duration,
    failing_sessions: Arc<AtomicUsize>,
}

#[async_trait]
impl Engine for FakeEngine {
    fn model_path(&self) -> &Path {
        &self.path
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    async fn create_session(&self, _config: &SessionConfig) -> Result<BoxedSession, RuntimeError> {
        if !self.session_delay.is_zero() {
            tokio::time::sleep(self.session_delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::SessionConstruction("engine closed".to_string()));
        }
        let should_fail = self
            .failing_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RuntimeError::SessionConstruction("scripted failure".to_string()));
        }

        self.counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            id: self.next_session.fetch_add(1, Ordering::SeqCst),
            closed: false,
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.engines_live.fetch_sub(1, Ordering::SeqCst);
            self.counters.engines_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Loader producing [`FakeEngine`]s
#[derive(Debug, Default)]
pub struct FakeLoader {
    pub counters: Arc<Counters>,
    pub fail_loads: AtomicBool,
    pub session_delay: Duration,
    /// Number of upcoming session constructions that fail
    pub failing_sessions: Arc<AtomicUsize>,
    pub loaded_backends: Mutex<Vec<(PathBuf, Backend)>>,
}

impl FakeLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_session_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            session_delay: delay,
            ..Default::default()
        })
    }

    pub fn last_backend(&self) -> Option<Backend> {
        self.loaded_backends.lock().last().map(|(_, b)| *b)
    }

    /// Build an engine directly, bypassing the lifecycle manager
    pub fn engine(&self, backend: Backend) -> Arc<FakeEngine> {
        self.counters.engines_loaded.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.engines_live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_engines_live.fetch_max(live, Ordering::SeqCst);
        Arc::new(FakeEngine {
            path: PathBuf::from("/models/fake.task"),
            backend,
            counters: Arc::clone(&self.counters),
            next_session: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            session_delay: self.session_delay,
            failing_sessions: Arc::clone(&self.failing_sessions),
        })
    }
}

#[async_trait]
impl EngineLoader for FakeLoader {
    async fn load(
        &self,
        model: &ModelFile,
        backend: Backend,
    ) -> Result<Arc<dyn Engine>, RuntimeError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(RuntimeError::EngineConstruction("scripted failure".to_string()));
        }
        self.loaded_backends
            .lock()
            .push((model.path().to_path_buf(), backend));
        let engine = self.engine(backend);
        Ok(engine)
    }
}

/// Scripted hardware platform
#[derive(Debug)]
pub struct FakePlatform {
    pub profile: HardwareProfile,
    pub gpu: Result<bool, String>,
    pub probe_delay: Duration,
    pub probes: AtomicUsize,
}

impl FakePlatform {
    fn build(device_model: &str, gpu: Result<bool, String>, probe_delay: Duration) -> Self {
        Self {
            profile: HardwareProfile {
                device_model: device_model.to_string(),
                chipset: "generic".to_string(),
                has_gpu: gpu.as_ref().is_ok_and(|available| *available),
                ..Default::default()
            },
            gpu,
            probe_delay,
            probes: AtomicUsize::new(0),
        }
    }

    pub fn new(device_model: &str, gpu: bool) -> Arc<Self> {
        Arc::new(Self::build(device_model, Ok(gpu), Duration::ZERO))
    }

    /// GPU is available but the probe takes `delay` to answer
    pub fn slow(device_model: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(device_model, Ok(true), delay))
    }

    pub fn failing(device_model: &str) -> Arc<Self> {
        Arc::new(Self::build(
            device_model,
            Err("driver crashed".to_string()),
            Duration::ZERO,
        ))
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardwarePlatform for FakePlatform {
    fn profile(&self) -> HardwareProfile {
        self.profile.clone()
    }

    async fn probe_gpu(&self) -> Result<bool, RuntimeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        self.gpu.clone().map_err(RuntimeError::Probe)
    }
}

/// Scripted hardware validation capability
#[derive(Debug)]
pub enum FakeValidator {
    Unavailable,
    Fails,
    Validates(Backend),
}

impl FakeValidator {
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl HardwareValidator for FakeValidator {
    async fn try_validate(
        &self,
        _model_path: &Path,
    ) -> Result<Option<ValidatedAcceleration>, RuntimeError> {
        match self {
            Self::Unavailable => Ok(None),
            Self::Fails => Err(RuntimeError::HardwareValidation(
                "benchmark crashed".to_string(),
            )),
            Self::Validates(backend) => Ok(Some(ValidatedAcceleration {
                backend: *backend,
                benchmark_duration_ms: 340,
            })),
        }
    }
}

/// Preference store kept in memory
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    selected: RwLock<Option<ModelKey>>,
}

impl MemoryPreferences {
    pub fn with(key: ModelKey) -> Arc<Self> {
        Arc::new(Self {
            selected: RwLock::new(Some(key)),
        })
    }
}

impl PreferenceStore for MemoryPreferences {
    fn selected_model(&self) -> Option<ModelKey> {
        self.selected.read().clone()
    }

    fn set_selected_model(&self, key: &ModelKey) -> Result<(), RuntimeError> {
        *self.selected.write() = Some(key.clone());
        Ok(())
    }
}

/// Poll `condition` until it holds, yielding to background tasks in between
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
