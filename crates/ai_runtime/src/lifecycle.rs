//! Engine lifecycle management
//!
//! Owns the single active engine generation (one engine plus its session
//! pool) and drives initialize, switch and destroy:
//!
//! ```text
//! Uninitialized ──initialize──▶ Initializing ──ok──▶ Ready ──switch_model──▶ Switching
//!                                    │ err                ▲                      │
//!                                    ▼                    └────────ok────────────┤
//!                                  Failed ◀──────────────────────err─────────────┘
//!
//! any state ──destroy──▶ Destroyed (terminal)
//! ```
//!
//! Transitions are serialized by an async mutex. `take` never waits on a
//! transition: it reads the active pool through an `ArcSwapOption`, which
//! is emptied before a generation is torn down.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use domain::{AccelerationDecision, ModelFile, ModelFiles, ModelKey};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::metrics::{MetricsTree, PHASE_INITIALIZATION, PHASE_MODEL_SWITCH};
use crate::pool::{PoolStats, SessionPool};
use crate::ports::{BoxedSession, Engine, EngineLoader, ManagedResource, PreferenceStore};
use crate::selector::BackendSelector;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Switching,
    /// Last initialize or switch failed; a fresh initialize is required
    Failed,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Switching => "switching",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Which backend selection tiers a build may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectionTier {
    ValidatedThenHeuristic,
    HeuristicOnly,
}

/// One engine with the sessions built from it
struct Generation {
    id: u64,
    model: ModelKey,
    engine: Arc<dyn Engine>,
    pool: Arc<SessionPool>,
}

/// Owner of the active engine and its session pool
pub struct EngineLifecycleManager {
    config: RuntimeConfig,
    loader: Arc<dyn EngineLoader>,
    selector: BackendSelector,
    preferences: Arc<dyn PreferenceStore>,
    metrics: Arc<MetricsTree>,
    current: tokio::sync::Mutex<Option<Generation>>,
    active_pool: ArcSwapOption<SessionPool>,
    ready_tx: watch::Sender<bool>,
    state: RwLock<LifecycleState>,
    last_error: RwLock<Option<String>>,
    decision: RwLock<Option<AccelerationDecision>>,
    model: RwLock<Option<ModelKey>>,
    generations: AtomicU64,
    teardown: Mutex<Vec<Arc<dyn ManagedResource>>>,
}

impl fmt::Debug for EngineLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLifecycleManager")
            .field("state", &*self.state.read())
            .field("ready", &self.is_ready())
            .field("model", &*self.model.read())
            .field("generation", &self.generation())
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl EngineLifecycleManager {
    /// Create a manager; no engine is built until [`initialize`](Self::initialize)
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Configuration` if the runtime configuration is invalid.
    pub fn new(
        config: RuntimeConfig,
        loader: Arc<dyn EngineLoader>,
        selector: BackendSelector,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let (ready_tx, _) = watch::channel(false);
        let metrics = Arc::new(MetricsTree::new(config.overhead_threshold()));

        Ok(Self {
            config,
            loader,
            selector,
            preferences,
            metrics,
            current: tokio::sync::Mutex::new(None),
            active_pool: ArcSwapOption::empty(),
            ready_tx,
            state: RwLock::new(LifecycleState::Uninitialized),
            last_error: RwLock::new(None),
            decision: RwLock::new(None),
            model: RwLock::new(None),
            generations: AtomicU64::new(0),
            teardown: Mutex::new(Vec::new()),
        })
    }

    // === Observation ===

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Stream of readiness changes; the current value is available immediately
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Wait until ready, giving up after `timeout`
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_ready();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        )
    }

    /// Wait until the active pool holds its full capacity, giving up after `timeout`
    pub async fn wait_until_prewarmed(&self, timeout: Duration) -> bool {
        let filled = async {
            loop {
                let full = self
                    .active_pool
                    .load()
                    .as_ref()
                    .is_some_and(|pool| pool.len() >= pool.capacity());
                if full {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, filled).await.is_ok()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Message of the last fatal failure, cleared by the next transition
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn current_decision(&self) -> Option<AccelerationDecision> {
        self.decision.read().clone()
    }

    pub fn current_model(&self) -> Option<ModelKey> {
        self.model.read().clone()
    }

    /// Number of engine generations built so far
    pub fn generation(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> Arc<MetricsTree> {
        Arc::clone(&self.metrics)
    }

    pub fn pool_len(&self) -> usize {
        self.active_pool.load().as_ref().map_or(0, |pool| pool.len())
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.active_pool.load().as_ref().map(|pool| pool.stats())
    }

    // === Sessions ===

    /// Borrow one session; the caller must close it after one unit of work
    ///
    /// # Errors
    ///
    /// `NotReady` while no engine generation is active.
    pub async fn take(&self) -> Result<BoxedSession, RuntimeError> {
        let pool = self.active_pool.load_full().ok_or(RuntimeError::NotReady)?;
        pool.take().await
    }

    /// Close every pooled session of the active generation
    pub fn clear_sessions(&self) -> usize {
        self.active_pool.load().as_ref().map_or(0, |pool| pool.clear())
    }

    /// Fill the active pool in the background
    pub fn prewarm(&self) {
        if let Some(pool) = self.active_pool.load_full() {
            pool.spawn_fill();
        }
    }

    // === Transitions ===

    /// Build the engine for the persisted model selection
    ///
    /// Falls back to the configured default model when nothing was persisted.
    /// An existing generation is torn down once the selected file resolves; a
    /// missing file leaves it alive but unserved. Ready is signalled once the
    /// engine exists; the pool fills in the background.
    ///
    /// # Errors
    ///
    /// `ModelNotConfigured` if the selected key has no file, `EngineConstruction`
    /// if the engine cannot be built, `Destroyed` after [`destroy`](Self::destroy).
    #[instrument(skip_all, fields(models = files.len()))]
    pub async fn initialize(&self, files: &ModelFiles) -> Result<AccelerationDecision, RuntimeError> {
        let mut current = self.current.lock().await;
        if self.state() == LifecycleState::Destroyed {
            return Err(RuntimeError::Destroyed);
        }

        self.metrics.reset();
        self.begin_transition(LifecycleState::Initializing);
        self.metrics.start_phase(PHASE_INITIALIZATION);

        let key = self
            .preferences
            .selected_model()
            .unwrap_or_else(|| self.config.default_model.clone());

        // A configuration error leaves the previous engine alive; only serving stops
        let file = match self.resolve(PHASE_INITIALIZATION, &key, files) {
            Ok(file) => file,
            Err(e) => {
                self.active_pool.store(None);
                return Err(self.fail(PHASE_INITIALIZATION, e));
            },
        };

        if let Some(previous) = current.take() {
            self.metrics.start_subphase(PHASE_INITIALIZATION, "PreviousEngineRelease");
            let closed = self.release(previous).await;
            self.metrics.end_subphase(
                PHASE_INITIALIZATION,
                "PreviousEngineRelease",
                Some(&format!("{closed} sessions closed")),
            );
        }

        match self
            .build(PHASE_INITIALIZATION, &key, &file, SelectionTier::ValidatedThenHeuristic)
            .await
        {
            Ok((generation, decision)) => {
                self.install(&mut current, generation, &decision);
                self.metrics.end_phase(PHASE_INITIALIZATION);
                Ok(decision)
            },
            Err(e) => Err(self.fail(PHASE_INITIALIZATION, e)),
        }
    }

    /// Tear down the active generation and rebuild it for `key`
    ///
    /// The old engine and every pooled session are closed before the new
    /// engine is constructed. Backend selection uses the heuristic tier only.
    /// A failure does not restore the previous model.
    ///
    /// # Errors
    ///
    /// `ModelNotConfigured` if `key` has no file, `EngineConstruction` if the
    /// engine cannot be built, `Destroyed` after [`destroy`](Self::destroy).
    #[instrument(skip(self, files), fields(model = %key))]
    pub async fn switch_model(
        &self,
        key: ModelKey,
        files: &ModelFiles,
    ) -> Result<AccelerationDecision, RuntimeError> {
        let mut current = self.current.lock().await;
        if self.state() == LifecycleState::Destroyed {
            return Err(RuntimeError::Destroyed);
        }

        self.begin_transition(LifecycleState::Switching);
        self.metrics.start_phase(PHASE_MODEL_SWITCH);

        if let Some(previous) = current.take() {
            let previous_model = previous.model.clone();
            self.metrics.start_subphase(PHASE_MODEL_SWITCH, "SessionDrain");
            let closed = self.release(previous).await;
            self.metrics.end_subphase(
                PHASE_MODEL_SWITCH,
                "SessionDrain",
                Some(&format!("{closed} sessions closed, {previous_model} engine closed")),
            );
        }

        self.metrics.start_subphase(PHASE_MODEL_SWITCH, "PreferencePersist");
        let persisted = match self.preferences.set_selected_model(&key) {
            Ok(()) => "saved",
            Err(e) => {
                warn!(error = %e, "Failed to persist model selection, continuing switch");
                "failed"
            },
        };
        self.metrics
            .end_subphase(PHASE_MODEL_SWITCH, "PreferencePersist", Some(persisted));

        let file = match self.resolve(PHASE_MODEL_SWITCH, &key, files) {
            Ok(file) => file,
            Err(e) => return Err(self.fail(PHASE_MODEL_SWITCH, e)),
        };

        match self
            .build(PHASE_MODEL_SWITCH, &key, &file, SelectionTier::HeuristicOnly)
            .await
        {
            Ok((generation, decision)) => {
                self.install(&mut current, generation, &decision);
                self.metrics.end_phase(PHASE_MODEL_SWITCH);
                Ok(decision)
            },
            Err(e) => Err(self.fail(PHASE_MODEL_SWITCH, e)),
        }
    }

    /// Release the engine, every pooled session and all co-teardown resources
    ///
    /// Idempotent and safe without a prior initialize. The manager cannot be
    /// initialized again afterwards.
    #[instrument(skip(self))]
    pub async fn destroy(&self) {
        let mut current = self.current.lock().await;
        if self.state() == LifecycleState::Destroyed {
            return;
        }

        self.ready_tx.send_replace(false);
        if let Some(generation) = current.take() {
            self.release(generation).await;
        }

        let resources = std::mem::take(&mut *self.teardown.lock());
        for resource in resources {
            resource.close();
            info!(resource = %resource.name(), "Closed co-teardown resource");
        }

        *self.decision.write() = None;
        *self.state.write() = LifecycleState::Destroyed;
        info!("Engine lifecycle destroyed");
    }

    /// Open `resource` now and close it on [`destroy`](Self::destroy)
    ///
    /// # Errors
    ///
    /// `Destroyed` after destroy, or the resource's own open error.
    pub fn register_teardown(&self, resource: Arc<dyn ManagedResource>) -> Result<(), RuntimeError> {
        let mut registry = self.teardown.lock();
        if self.state() == LifecycleState::Destroyed {
            return Err(RuntimeError::Destroyed);
        }
        resource.open()?;
        info!(resource = %resource.name(), "Registered co-teardown resource");
        registry.push(resource);
        Ok(())
    }

    // === Internals ===

    fn begin_transition(&self, state: LifecycleState) {
        self.ready_tx.send_replace(false);
        *self.state.write() = state;
        *self.last_error.write() = None;
    }

    /// Select a backend for `file` and load the engine
    async fn build(
        &self,
        phase: &str,
        key: &ModelKey,
        file: &ModelFile,
        tier: SelectionTier,
    ) -> Result<(Generation, AccelerationDecision), RuntimeError> {
        self.metrics.start_subphase(phase, "BackendSelection");
        let decision = match tier {
            SelectionTier::ValidatedThenHeuristic => self.selector.select(file.path()).await,
            SelectionTier::HeuristicOnly => self.selector.heuristic(file.path()).await,
        };
        self.metrics.end_subphase(
            phase,
            "BackendSelection",
            Some(&format!("{} {}", decision.source(), decision.backend())),
        );

        self.metrics.start_subphase(phase, "EngineCreation");
        let engine = match self.loader.load(file, decision.backend()).await {
            Ok(engine) => engine,
            Err(e) => {
                self.metrics.end_subphase(phase, "EngineCreation", Some("failed"));
                return Err(e);
            },
        };
        self.metrics
            .end_subphase(phase, "EngineCreation", Some(&decision.backend().to_string()));

        let id = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = SessionPool::new(
            Arc::clone(&engine),
            self.config.session.clone(),
            self.config.pool_capacity,
        )
        .with_metrics(Arc::clone(&self.metrics))
        .with_generation(id);

        Ok((
            Generation {
                id,
                model: key.clone(),
                engine,
                pool: Arc::new(pool),
            },
            decision,
        ))
    }

    fn resolve(
        &self,
        phase: &str,
        key: &ModelKey,
        files: &ModelFiles,
    ) -> Result<ModelFile, RuntimeError> {
        self.metrics.start_subphase(phase, "ConfigResolution");
        let file = files.get(key).cloned();
        self.metrics.end_subphase(
            phase,
            "ConfigResolution",
            Some(if file.is_some() { key.as_str() } else { "missing" }),
        );
        file.ok_or_else(|| {
            error!(
                model = %key,
                available = ?files.keys().map(ModelKey::as_str).collect::<Vec<_>>(),
                "Selected model has no configured file"
            );
            RuntimeError::model_not_configured(key.as_str())
        })
    }

    /// Publish a freshly built generation and start filling its pool
    ///
    /// Ready flips only after the engine exists; the pool may still be empty.
    fn install(
        &self,
        current: &mut Option<Generation>,
        generation: Generation,
        decision: &AccelerationDecision,
    ) {
        info!(
            generation = generation.id,
            model = %generation.model,
            backend = %decision.backend(),
            confidence = decision.confidence(),
            source = %decision.source(),
            "Engine ready"
        );

        let pool = Arc::clone(&generation.pool);
        self.active_pool.store(Some(Arc::clone(&pool)));
        *self.model.write() = Some(generation.model.clone());
        *self.decision.write() = Some(decision.clone());
        *current = Some(generation);
        *self.state.write() = LifecycleState::Ready;
        self.ready_tx.send_replace(true);

        pool.spawn_fill();
    }

    /// Close every pooled session, stop background work, then close the engine
    async fn release(&self, generation: Generation) -> usize {
        self.active_pool.store(None);
        let closed = generation.pool.shutdown().await;
        generation.engine.close().await;
        info!(
            generation = generation.id,
            model = %generation.model,
            sessions_closed = closed,
            "Engine generation released"
        );
        closed
    }

    fn fail(&self, phase: &str, err: RuntimeError) -> RuntimeError {
        self.metrics.end_phase(phase);
        self.ready_tx.send_replace(false);
        *self.state.write() = LifecycleState::Failed;
        *self.decision.write() = None;
        *self.model.write() = None;
        *self.last_error.write() = Some(err.to_string());
        error!(
            phase,
            error = %err,
            report = %self.metrics.report(),
            "Engine lifecycle transition failed"
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::OnceLock;

    use domain::{Backend, DecisionSource, ModelFile};

    use super::*;
    use crate::metrics::PHASE_PREWARMING;
    use crate::ports::{
        HardwareValidator, MockManagedResource, MockPreferenceStore, SessionInput,
    };
    use crate::testing::{FakeLoader, FakePlatform, FakeValidator, MemoryPreferences, eventually};

    fn files() -> ModelFiles {
        ModelFiles::default()
            .with(
                ModelKey::e4b(),
                ModelFile::new("/models/gemma-3n-E4B-it-int4.task", 4_405_655_031),
            )
            .with(
                ModelKey::e2b(),
                ModelFile::new("/models/gemma-3n-E2B-it-int4.task", 3_136_226_711),
            )
    }

    fn manager_with(
        loader: &Arc<FakeLoader>,
        platform: Arc<FakePlatform>,
        validator: Option<FakeValidator>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> EngineLifecycleManager {
        let config = RuntimeConfig::default();
        let selector = BackendSelector::new(
            platform,
            validator.map(|v| v.shared() as Arc<dyn HardwareValidator>),
            &config,
        )
        .unwrap();
        EngineLifecycleManager::new(
            config,
            Arc::clone(loader) as Arc<dyn EngineLoader>,
            selector,
            preferences,
        )
        .unwrap()
    }

    fn manager(loader: &Arc<FakeLoader>) -> EngineLifecycleManager {
        manager_with(
            loader,
            FakePlatform::new("Pixel 9 Pro", true),
            Some(FakeValidator::Validates(Backend::Gpu)),
            MemoryPreferences::with(ModelKey::e4b()),
        )
    }

    fn subphase_detail(manager: &EngineLifecycleManager, phase: &str, name: &str) -> Option<String> {
        manager
            .metrics()
            .snapshot()
            .into_iter()
            .filter(|p| p.name == phase)
            .flat_map(|p| p.subphases)
            .rev()
            .find(|s| s.name == name)
            .and_then(|s| s.detail)
    }

    // === Scenarios ===

    #[tokio::test]
    async fn validated_initialization_becomes_ready() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        let decision = manager.initialize(&files()).await.unwrap();

        assert_eq!(decision.source(), DecisionSource::Validated);
        assert!((decision.confidence() - 0.95).abs() < f32::EPSILON);
        assert!(manager.is_ready());
        assert_eq!(manager.state(), LifecycleState::Ready);
        assert_eq!(manager.current_model(), Some(ModelKey::e4b()));
        assert_eq!(loader.last_backend(), Some(Backend::Gpu));

        let init = manager
            .metrics()
            .snapshot()
            .into_iter()
            .find(|p| p.name == PHASE_INITIALIZATION)
            .unwrap();
        assert!(init.finished);
        assert_eq!(
            subphase_detail(&manager, PHASE_INITIALIZATION, "BackendSelection").as_deref(),
            Some("validated GPU")
        );

        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);
        assert_eq!(manager.pool_len(), 2);
    }

    #[tokio::test]
    async fn failing_validation_uses_heuristic_on_npu_device() {
        let loader = FakeLoader::new();
        let manager = manager_with(
            &loader,
            FakePlatform::new("Pixel 9 Pro", true),
            Some(FakeValidator::Fails),
            MemoryPreferences::with(ModelKey::e4b()),
        );

        let decision = manager.initialize(&files()).await.unwrap();

        assert_eq!(decision.backend(), Backend::Gpu);
        assert!((decision.confidence() - 0.95).abs() < f32::EPSILON);
        assert_eq!(decision.source(), DecisionSource::Heuristic);
        assert!(manager.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gpu_probe_falls_back_to_cpu() {
        let loader = FakeLoader::new();
        let manager = manager_with(
            &loader,
            FakePlatform::slow("Pixel 9 Pro", Duration::from_secs(30)),
            None,
            MemoryPreferences::with(ModelKey::e4b()),
        );

        let decision = manager.initialize(&files()).await.unwrap();

        assert_eq!(decision.backend(), Backend::Cpu);
        assert!((decision.confidence() - 0.70).abs() < f32::EPSILON);
        assert_eq!(decision.source(), DecisionSource::Heuristic);
        assert_eq!(loader.last_backend(), Some(Backend::Cpu));
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn switch_drains_pool_and_rebuilds_heuristically() {
        let loader = FakeLoader::new();
        let ready_seen: Arc<Mutex<Vec<bool>>> = Arc::default();
        let ready_rx: Arc<OnceLock<watch::Receiver<bool>>> = Arc::default();

        let mut preferences = MockPreferenceStore::new();
        preferences
            .expect_selected_model()
            .returning(|| Some(ModelKey::e4b()));
        {
            let ready_seen = Arc::clone(&ready_seen);
            let ready_rx = Arc::clone(&ready_rx);
            preferences
                .expect_set_selected_model()
                .withf(|key| key.as_str() == ModelKey::E2B)
                .times(1)
                .returning(move |_| {
                    if let Some(rx) = ready_rx.get() {
                        ready_seen.lock().push(*rx.borrow());
                    }
                    Ok(())
                });
        }

        let manager = manager_with(
            &loader,
            FakePlatform::new("Moto G Power", true),
            Some(FakeValidator::Validates(Backend::Gpu)),
            Arc::new(preferences),
        );
        ready_rx.set(manager.subscribe_ready()).unwrap();

        manager.initialize(&files()).await.unwrap();
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);
        let created_before = loader.counters.sessions_created();
        assert_eq!(created_before, 2);

        let decision = manager.switch_model(ModelKey::e2b(), &files()).await.unwrap();

        assert_eq!(*ready_seen.lock(), vec![false]);
        assert_eq!(loader.counters.sessions_closed(), 2);
        assert_eq!(loader.counters.engines_closed(), 1);
        assert_eq!(loader.counters.max_engines_live(), 1);
        assert_eq!(decision.source(), DecisionSource::Heuristic);
        assert!((decision.confidence() - 0.85).abs() < f32::EPSILON);
        assert_eq!(
            loader.loaded_backends.lock().last().map(|(path, _)| path.clone()),
            Some(PathBuf::from("/models/gemma-3n-E2B-it-int4.task"))
        );
        assert!(manager.is_ready());
        assert_eq!(manager.current_model(), Some(ModelKey::e2b()));
        assert_eq!(manager.generation(), 2);

        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);
        assert_eq!(manager.pool_len(), 2);
    }

    #[tokio::test]
    async fn missing_selected_model_fails_without_touching_engines() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        let result = manager.initialize(&ModelFiles::default()).await;

        assert!(matches!(result, Err(RuntimeError::ModelNotConfigured { ref key }) if key == "E4B"));
        assert!(result.unwrap_err().is_fatal());
        assert!(!manager.is_ready());
        assert_eq!(manager.state(), LifecycleState::Failed);
        assert!(manager.last_error().is_some());
        assert_eq!(loader.counters.engines_loaded(), 0);
        assert_eq!(loader.counters.sessions_created(), 0);
        assert!(matches!(manager.take().await, Err(RuntimeError::NotReady)));
    }

    #[tokio::test]
    async fn reinitialize_with_missing_model_keeps_previous_engine() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        manager.initialize(&files()).await.unwrap();

        let err = manager.initialize(&ModelFiles::default()).await.unwrap_err();

        assert!(matches!(err, RuntimeError::ModelNotConfigured { ref key } if key == "E4B"));
        assert_eq!(loader.counters.engines_closed(), 0);
        assert_eq!(loader.counters.engines_live(), 1);
        assert_eq!(loader.counters.engines_loaded(), 1);
        assert_eq!(manager.state(), LifecycleState::Failed);
        assert!(!manager.is_ready());
        assert!(matches!(manager.take().await, Err(RuntimeError::NotReady)));

        // The kept engine is released by the next transition
        manager.initialize(&files()).await.unwrap();
        assert_eq!(loader.counters.engines_closed(), 1);
        assert_eq!(loader.counters.max_engines_live(), 1);
        assert!(manager.is_ready());
    }

    // === Failure handling ===

    #[tokio::test]
    async fn engine_failure_leaves_manager_retryable() {
        let loader = FakeLoader::new();
        loader.fail_loads.store(true, Ordering::SeqCst);
        let manager = manager(&loader);

        let err = manager.initialize(&files()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::EngineConstruction(_)));
        assert!(!manager.is_ready());
        assert_eq!(manager.state(), LifecycleState::Failed);
        assert_eq!(
            subphase_detail(&manager, PHASE_INITIALIZATION, "EngineCreation").as_deref(),
            Some("failed")
        );

        loader.fail_loads.store(false, Ordering::SeqCst);
        manager.initialize(&files()).await.unwrap();
        assert!(manager.is_ready());
        assert!(manager.last_error().is_none());
    }

    #[tokio::test]
    async fn failed_switch_requires_fresh_initialize() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        manager.initialize(&files()).await.unwrap();

        let only_e4b = ModelFiles::default().with(
            ModelKey::e4b(),
            ModelFile::new("/models/gemma-3n-E4B-it-int4.task", 1),
        );
        let err = manager
            .switch_model(ModelKey::e2b(), &only_e4b)
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::ModelNotConfigured { .. }));
        assert!(!manager.is_ready());
        assert_eq!(manager.state(), LifecycleState::Failed);
        assert_eq!(loader.counters.engines_live(), 0);
        assert!(matches!(manager.take().await, Err(RuntimeError::NotReady)));

        // The new key was persisted before resolution
        manager.initialize(&files()).await.unwrap();
        assert_eq!(manager.current_model(), Some(ModelKey::e2b()));
    }

    #[tokio::test]
    async fn preference_write_failure_does_not_abort_switch() {
        let loader = FakeLoader::new();
        let mut preferences = MockPreferenceStore::new();
        preferences.expect_selected_model().returning(|| None);
        preferences
            .expect_set_selected_model()
            .returning(|_| Err(RuntimeError::Preference("read-only".to_string())));

        let manager = manager_with(
            &loader,
            FakePlatform::new("Moto G", false),
            None,
            Arc::new(preferences),
        );
        manager.initialize(&files()).await.unwrap();
        assert_eq!(manager.current_model(), Some(ModelKey::e4b()));

        manager.switch_model(ModelKey::e2b(), &files()).await.unwrap();
        assert!(manager.is_ready());
        assert_eq!(
            subphase_detail(&manager, PHASE_MODEL_SWITCH, "PreferencePersist").as_deref(),
            Some("failed")
        );
    }

    // === Ownership ===

    #[tokio::test]
    async fn at_most_one_engine_across_transitions() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        manager.initialize(&files()).await.unwrap();
        manager.switch_model(ModelKey::e2b(), &files()).await.unwrap();
        manager.switch_model(ModelKey::e4b(), &files()).await.unwrap();
        manager.initialize(&files()).await.unwrap();

        assert_eq!(loader.counters.engines_loaded(), 4);
        assert_eq!(loader.counters.max_engines_live(), 1);
        assert_eq!(loader.counters.engines_live(), 1);
        assert_eq!(manager.generation(), 4);
    }

    #[tokio::test]
    async fn caller_owned_sessions_survive_switch() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        manager.initialize(&files()).await.unwrap();
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);

        let mut borrowed = manager.take().await.unwrap();
        assert!(eventually(|| manager.pool_len() == 2).await);

        manager.switch_model(ModelKey::e2b(), &files()).await.unwrap();
        assert_eq!(loader.counters.sessions_closed(), 2);

        borrowed.close();
        assert_eq!(loader.counters.sessions_closed(), 3);
    }

    #[tokio::test]
    async fn take_serves_sessions_once_ready() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        assert!(matches!(manager.take().await, Err(RuntimeError::NotReady)));

        manager.initialize(&files()).await.unwrap();
        let mut session = manager.take().await.unwrap();
        let output = session
            .generate(&SessionInput::text("What food is this?"))
            .await
            .unwrap();
        session.close();

        assert_eq!(output, "echo: What food is this?");
    }

    #[tokio::test]
    async fn clear_sessions_then_prewarm_refills() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        manager.initialize(&files()).await.unwrap();
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);

        assert_eq!(manager.clear_sessions(), 2);
        assert_eq!(manager.pool_len(), 0);

        manager.prewarm();
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);
        assert!(manager.pool_stats().is_some_and(|s| s.slow_path == 0));
    }

    // === Destroy ===

    #[tokio::test]
    async fn destroy_without_initialize_is_safe_and_idempotent() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        manager.destroy().await;
        manager.destroy().await;

        assert_eq!(manager.state(), LifecycleState::Destroyed);
        assert!(!manager.is_ready());
    }

    #[tokio::test]
    async fn destroy_closes_everything_once() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        manager.initialize(&files()).await.unwrap();
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);

        manager.destroy().await;
        manager.destroy().await;

        assert_eq!(loader.counters.engines_live(), 0);
        assert_eq!(loader.counters.engines_closed(), 1);
        assert_eq!(
            loader.counters.sessions_created(),
            loader.counters.sessions_closed()
        );
        assert!(matches!(manager.take().await, Err(RuntimeError::NotReady)));
        assert!(matches!(
            manager.initialize(&files()).await,
            Err(RuntimeError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn destroy_closes_registered_resources_exactly_once() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        let mut resource = MockManagedResource::new();
        resource
            .expect_name()
            .return_const("nutrition-lookup".to_string());
        resource.expect_open().times(1).returning(|| Ok(()));
        resource.expect_close().times(1).return_const(());

        manager.register_teardown(Arc::new(resource)).unwrap();
        manager.initialize(&files()).await.unwrap();

        manager.destroy().await;
        manager.destroy().await;
    }

    #[tokio::test]
    async fn registration_after_destroy_is_rejected() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);
        manager.destroy().await;

        let mut resource = MockManagedResource::new();
        resource.expect_open().never();
        resource.expect_close().never();

        assert!(matches!(
            manager.register_teardown(Arc::new(resource)),
            Err(RuntimeError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn failed_open_is_not_registered() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        let mut resource = MockManagedResource::new();
        resource
            .expect_open()
            .returning(|| Err(RuntimeError::Configuration("no database".to_string())));
        resource.expect_close().never();

        assert!(manager.register_teardown(Arc::new(resource)).is_err());
        manager.destroy().await;
    }

    // === Readiness and metrics ===

    #[tokio::test]
    async fn wait_until_ready_observes_background_initialize() {
        let loader = FakeLoader::new();
        let manager = Arc::new(manager(&loader));

        let init = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.initialize(&files()).await })
        };

        assert!(manager.wait_until_ready(Duration::from_secs(1)).await);
        init.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_ready_times_out() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        assert!(!manager.wait_until_ready(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn default_model_used_without_persisted_selection() {
        let loader = FakeLoader::new();
        let manager = manager_with(
            &loader,
            FakePlatform::new("Moto G", true),
            None,
            Arc::new(MemoryPreferences::default()),
        );

        manager.initialize(&files()).await.unwrap();
        assert_eq!(manager.current_model(), Some(ModelKey::e4b()));
    }

    #[tokio::test]
    async fn initialize_starts_a_fresh_metrics_run() {
        let loader = FakeLoader::new();
        let manager = manager(&loader);

        manager.initialize(&files()).await.unwrap();
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);
        manager.initialize(&files()).await.unwrap();

        let phases = manager.metrics().snapshot();
        assert_eq!(phases[0].name, PHASE_INITIALIZATION);
        assert_eq!(
            phases
                .iter()
                .filter(|p| p.name == PHASE_INITIALIZATION)
                .count(),
            1
        );
        assert!(
            phases[0]
                .subphases
                .iter()
                .any(|s| s.name == "PreviousEngineRelease")
        );
        assert!(manager.wait_until_prewarmed(Duration::from_secs(1)).await);
        assert!(
            manager
                .metrics()
                .snapshot()
                .iter()
                .any(|p| p.name == PHASE_PREWARMING && p.finished)
        );
    }

    #[test]
    fn lifecycle_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::Uninitialized).unwrap(),
            "\"uninitialized\""
        );
        assert_eq!(LifecycleState::Switching.to_string(), "switching");
    }
}
