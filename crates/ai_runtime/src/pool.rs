//! Bounded pool of pre-warmed inference sessions
//!
//! One pool belongs to one engine generation. All mutations of the backing
//! queue and the fill flag happen under a single lock; session construction
//! always runs outside it. Background work (fills and replacements) is owned
//! by the pool's `JoinSet`, so `shutdown` can abort it as a group.
//!
//! Every `clear`/`shutdown` bumps an epoch. Background constructions that
//! finish under a stale epoch close their session instead of inserting it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::error::RuntimeError;
use crate::metrics::{MetricsTree, PHASE_PREWARMING};
use crate::ports::{BoxedSession, Engine};

/// Counters describing how the pool has been used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// `take` served from the pool
    pub hits: u64,
    /// `take` on an empty pool, constructed on the caller's path
    pub slow_path: u64,
    /// Background constructions inserted into the pool
    pub replacements: u64,
    /// Background constructions closed because the pool was full or stale
    pub discarded: u64,
    /// Session constructions that failed
    pub construction_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    slow_path: AtomicU64,
    replacements: AtomicU64,
    discarded: AtomicU64,
    construction_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct PoolState {
    sessions: VecDeque<BoxedSession>,
    filling: bool,
    epoch: u64,
    closed: bool,
}

/// Outcome of offering a freshly built session to the pool
enum Offer {
    Inserted,
    Rejected(BoxedSession),
}

/// Session cache for one engine generation
pub struct SessionPool {
    engine: Arc<dyn Engine>,
    config: SessionConfig,
    capacity: usize,
    generation: u64,
    state: Mutex<PoolState>,
    tasks: Mutex<JoinSet<()>>,
    counters: Counters,
    metrics: Option<Arc<MetricsTree>>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionPool")
            .field("generation", &self.generation)
            .field("capacity", &self.capacity)
            .field("len", &state.sessions.len())
            .field("filling", &state.filling)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    pub fn new(engine: Arc<dyn Engine>, config: SessionConfig, capacity: usize) -> Self {
        Self {
            engine,
            config,
            capacity,
            generation: 0,
            state: Mutex::new(PoolState {
                sessions: VecDeque::with_capacity(capacity),
                filling: false,
                epoch: 0,
                closed: false,
            }),
            tasks: Mutex::new(JoinSet::new()),
            counters: Counters::default(),
            metrics: None,
        }
    }

    /// Record fills as `SessionPrewarming` phases
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsTree>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Tag log records with the engine generation this pool belongs to
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_filling(&self) -> bool {
        self.state.lock().filling
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            slow_path: self.counters.slow_path.load(Ordering::Relaxed),
            replacements: self.counters.replacements.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            construction_failures: self.counters.construction_failures.load(Ordering::Relaxed),
        }
    }

    /// Hand out one session; ownership and close responsibility pass to the caller
    ///
    /// A pooled session is replaced in the background. An empty pool builds
    /// the session on the caller's path and schedules a fill.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after `shutdown`, or the construction error if the
    /// slow path itself fails.
    #[instrument(skip(self), fields(generation = self.generation))]
    pub async fn take(self: &Arc<Self>) -> Result<BoxedSession, RuntimeError> {
        let pooled = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(RuntimeError::PoolClosed);
            }
            state.sessions.pop_front()
        };

        if let Some(session) = pooled {
            Counters::bump(&self.counters.hits);
            debug!(session = session.id(), pool_len = self.len(), "Session taken from pool");
            self.spawn_replacement();
            return Ok(session);
        }

        Counters::bump(&self.counters.slow_path);
        warn!("Session pool empty, constructing session on caller path");
        self.spawn_fill();

        self.engine.create_session(&self.config).await.inspect_err(|e| {
            Counters::bump(&self.counters.construction_failures);
            warn!(error = %e, "Slow-path session construction failed");
        })
    }

    /// Construct sessions one at a time until the pool holds `target`
    ///
    /// `target` is capped at the capacity. A failed slot is skipped. A call
    /// made while another fill is in flight returns immediately.
    #[instrument(skip(self), fields(generation = self.generation))]
    pub async fn fill(&self, target: usize) {
        let target = target.min(self.capacity);
        let epoch = {
            let mut state = self.state.lock();
            if state.closed || state.filling {
                debug!(filling = state.filling, "Fill skipped");
                return;
            }
            state.filling = true;
            if let Some(metrics) = &self.metrics {
                metrics.start_phase(PHASE_PREWARMING);
            }
            state.epoch
        };

        for slot in 1..=target {
            let needed = {
                let state = self.state.lock();
                state.epoch == epoch && state.sessions.len() < target
            };
            if !needed {
                break;
            }

            let subphase = format!("Session{slot}");
            self.record(epoch, |metrics| metrics.start_subphase(PHASE_PREWARMING, &subphase));

            let detail = match self.engine.create_session(&self.config).await {
                Ok(session) => match self.offer(session, epoch) {
                    Offer::Inserted => "ready",
                    Offer::Rejected(mut extra) => {
                        extra.close();
                        Counters::bump(&self.counters.discarded);
                        "discarded"
                    },
                },
                Err(e) => {
                    Counters::bump(&self.counters.construction_failures);
                    warn!(slot, error = %e, "Session construction failed, skipping slot");
                    "failed"
                },
            };

            self.record(epoch, |metrics| {
                metrics.end_subphase(PHASE_PREWARMING, &subphase, Some(detail));
            });
        }

        let len = {
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.filling = false;
                if let Some(metrics) = &self.metrics {
                    metrics.end_phase(PHASE_PREWARMING);
                }
            }
            state.sessions.len()
        };
        info!(pool_len = len, target, "Session pool fill finished");
    }

    /// Run [`SessionPool::fill`] to capacity in the background
    pub fn spawn_fill(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let pool = Arc::clone(self);
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            pool.fill(pool.capacity).await;
        });
    }

    /// Close and evict every pooled session, abandoning in-flight constructions
    ///
    /// Returns the number of sessions closed. The pool stays usable.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        self.abandon_fill(&mut state);
        let closed = Self::close_all(&mut state.sessions);
        drop(state);

        info!(generation = self.generation, closed, "Session pool cleared");
        closed
    }

    /// Close the pool for good: evict every session and abort background work
    ///
    /// When this returns no task of this pool can construct another session.
    pub async fn shutdown(&self) -> usize {
        let closed = {
            let mut state = self.state.lock();
            state.closed = true;
            self.abandon_fill(&mut state);
            Self::close_all(&mut state.sessions)
        };

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        debug!(generation = self.generation, closed, "Session pool shut down");
        closed
    }

    fn spawn_replacement(self: &Arc<Self>) {
        let epoch = self.state.lock().epoch;
        let pool = Arc::clone(self);
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            match pool.engine.create_session(&pool.config).await {
                Ok(session) => match pool.offer(session, epoch) {
                    Offer::Inserted => Counters::bump(&pool.counters.replacements),
                    Offer::Rejected(mut extra) => {
                        debug!(session = extra.id(), "Replacement not needed, closing it");
                        extra.close();
                        Counters::bump(&pool.counters.discarded);
                    },
                },
                Err(e) => {
                    Counters::bump(&pool.counters.construction_failures);
                    warn!(error = %e, "Replacement session construction failed");
                },
            }
        });
    }

    /// Bump the epoch; an in-flight fill's phase ends here since that fill
    /// records nothing more
    fn abandon_fill(&self, state: &mut PoolState) {
        state.epoch += 1;
        let was_filling = std::mem::replace(&mut state.filling, false);
        if let (true, Some(metrics)) = (was_filling, &self.metrics) {
            metrics.end_phase(PHASE_PREWARMING);
        }
    }

    /// Record into the metrics tree while `epoch` is still current
    ///
    /// Holds the state lock so a concurrent `clear` cannot interleave.
    fn record(&self, epoch: u64, record: impl FnOnce(&MetricsTree)) {
        if let Some(metrics) = &self.metrics {
            let state = self.state.lock();
            if state.epoch == epoch {
                record(metrics);
            }
        }
    }

    fn offer(&self, session: BoxedSession, epoch: u64) -> Offer {
        let mut state = self.state.lock();
        if state.closed || state.epoch != epoch || state.sessions.len() >= self.capacity {
            return Offer::Rejected(session);
        }
        state.sessions.push_back(session);
        Offer::Inserted
    }

    fn close_all(sessions: &mut VecDeque<BoxedSession>) -> usize {
        let count = sessions.len();
        for mut session in sessions.drain(..) {
            session.close();
        }
        count
    }
}
