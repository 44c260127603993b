//! Phase/subphase timing recorder
//!
//! Records a two-level tree of timed phases for one run (from one
//! `initialize` to the next). Every start/end is appended to an ordered
//! event log and broadcast to live subscribers, so a diagnostics view can
//! render elapsed time while phases are still running.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

/// Phase covering backend selection and engine construction
pub const PHASE_INITIALIZATION: &str = "AIInitialization";
/// Phase covering background pool fills
pub const PHASE_PREWARMING: &str = "SessionPrewarming";
/// Phase covering teardown and rebuild on model switch
pub const PHASE_MODEL_SWITCH: &str = "ModelSwitch";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kind of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsEventKind {
    PhaseStart,
    PhaseEnd,
    SubPhaseStart,
    SubPhaseEnd,
}

/// One entry of the live update stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsEvent {
    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the recorder (re)started
    pub elapsed_ms: u64,
    pub kind: MetricsEventKind,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subphase: Option<String>,
    /// Node duration, set on end events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
struct SubPhase {
    name: String,
    start: Instant,
    end: Option<Instant>,
    detail: Option<String>,
}

#[derive(Debug)]
struct Phase {
    name: String,
    start: Instant,
    end: Option<Instant>,
    subphases: Vec<SubPhase>,
}

/// Read-only view of a subphase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubPhaseSnapshot {
    pub name: String,
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    pub finished: bool,
    pub detail: Option<String>,
}

/// Read-only view of a phase; unfinished durations are measured against now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSnapshot {
    pub name: String,
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    pub finished: bool,
    pub subphases: Vec<SubPhaseSnapshot>,
}

#[derive(Debug)]
struct Run {
    started: Instant,
    phases: Vec<Phase>,
    events: Vec<MetricsEvent>,
}

impl Run {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            phases: Vec::new(),
            events: Vec::new(),
        }
    }

    fn offset(&self, at: Instant) -> u64 {
        millis(at.saturating_duration_since(self.started))
    }

    fn open_phase_mut(&mut self, name: &str) -> Option<&mut Phase> {
        self.phases
            .iter_mut()
            .rev()
            .find(|p| p.name == name && p.end.is_none())
    }
}

/// Timing recorder shared by the lifecycle manager and the session pool
pub struct MetricsTree {
    run: Mutex<Run>,
    events_tx: broadcast::Sender<MetricsEvent>,
    overhead_threshold: Duration,
}

impl std::fmt::Debug for MetricsTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let run = self.run.lock();
        f.debug_struct("MetricsTree")
            .field("phases", &run.phases.len())
            .field("events", &run.events.len())
            .field("overhead_threshold", &self.overhead_threshold)
            .finish_non_exhaustive()
    }
}

impl Default for MetricsTree {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl MetricsTree {
    /// Create a recorder; overhead lines at or below `overhead_threshold` are hidden
    pub fn new(overhead_threshold: Duration) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            run: Mutex::new(Run::new()),
            events_tx,
            overhead_threshold,
        }
    }

    /// Start a new run, discarding every phase and event of the previous one
    pub fn reset(&self) {
        *self.run.lock() = Run::new();
    }

    /// Receive every event recorded from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.events_tx.subscribe()
    }

    pub fn start_phase(&self, name: &str) {
        let now = Instant::now();
        let mut run = self.run.lock();
        run.phases.push(Phase {
            name: name.to_string(),
            start: now,
            end: None,
            subphases: Vec::new(),
        });
        self.record(&mut run, now, MetricsEventKind::PhaseStart, name, None, None, None);
    }

    /// End the most recent open phase with this name, closing its open subphases first
    pub fn end_phase(&self, name: &str) {
        let now = Instant::now();
        let mut run = self.run.lock();

        let Some(phase) = run.open_phase_mut(name) else {
            debug!(phase = name, "end_phase without matching open phase");
            return;
        };
        phase.end = Some(now);
        let phase_duration = millis(now.saturating_duration_since(phase.start));
        let dangling: Vec<(String, u64)> = phase
            .subphases
            .iter_mut()
            .filter(|s| s.end.is_none())
            .map(|s| {
                s.end = Some(now);
                (s.name.clone(), millis(now.saturating_duration_since(s.start)))
            })
            .collect();

        for (subphase, duration) in dangling {
            self.record(
                &mut run,
                now,
                MetricsEventKind::SubPhaseEnd,
                name,
                Some(subphase),
                Some(duration),
                None,
            );
        }
        self.record(
            &mut run,
            now,
            MetricsEventKind::PhaseEnd,
            name,
            None,
            Some(phase_duration),
            None,
        );
    }

    pub fn start_subphase(&self, phase: &str, name: &str) {
        let now = Instant::now();
        let mut run = self.run.lock();

        let Some(open) = run.open_phase_mut(phase) else {
            debug!(phase, subphase = name, "start_subphase without open phase");
            return;
        };
        open.subphases.push(SubPhase {
            name: name.to_string(),
            start: now,
            end: None,
            detail: None,
        });
        self.record(
            &mut run,
            now,
            MetricsEventKind::SubPhaseStart,
            phase,
            Some(name.to_string()),
            None,
            None,
        );
    }

    pub fn end_subphase(&self, phase: &str, name: &str, detail: Option<&str>) {
        let now = Instant::now();
        let mut run = self.run.lock();

        let Some(sub) = run.open_phase_mut(phase).and_then(|p| {
            p.subphases
                .iter_mut()
                .rev()
                .find(|s| s.name == name && s.end.is_none())
        }) else {
            debug!(phase, subphase = name, "end_subphase without matching open subphase");
            return;
        };
        sub.end = Some(now);
        sub.detail = detail.map(str::to_string);
        let duration = millis(now.saturating_duration_since(sub.start));

        self.record(
            &mut run,
            now,
            MetricsEventKind::SubPhaseEnd,
            phase,
            Some(name.to_string()),
            Some(duration),
            detail.map(str::to_string),
        );
    }

    /// Latest end time among all nodes minus the run start; elapsed time if nothing ended yet
    pub fn total_duration(&self) -> Duration {
        let run = self.run.lock();
        let latest_end = run
            .phases
            .iter()
            .flat_map(|p| p.end.into_iter().chain(p.subphases.iter().filter_map(|s| s.end)))
            .max();

        latest_end.map_or_else(
            || run.started.elapsed(),
            |end| end.saturating_duration_since(run.started),
        )
    }

    /// Every event of the current run, in recording order
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.run.lock().events.clone()
    }

    /// Phases of the current run in start order
    pub fn snapshot(&self) -> Vec<PhaseSnapshot> {
        let now = Instant::now();
        let run = self.run.lock();
        run.phases
            .iter()
            .map(|p| PhaseSnapshot {
                name: p.name.clone(),
                start_offset_ms: run.offset(p.start),
                duration_ms: millis(p.end.unwrap_or(now).saturating_duration_since(p.start)),
                finished: p.end.is_some(),
                subphases: p
                    .subphases
                    .iter()
                    .map(|s| SubPhaseSnapshot {
                        name: s.name.clone(),
                        start_offset_ms: run.offset(s.start),
                        duration_ms: millis(
                            s.end.unwrap_or(now).saturating_duration_since(s.start),
                        ),
                        finished: s.end.is_some(),
                        detail: s.detail.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Human-readable dump of the current run
    pub fn report(&self) -> String {
        let phases = self.snapshot();
        let threshold = millis(self.overhead_threshold);
        let mut out = String::new();

        let _ = writeln!(
            out,
            "=== Metrics report (total {}ms) ===",
            millis(self.total_duration())
        );
        for phase in &phases {
            let _ = writeln!(
                out,
                "{}: {}ms{}",
                phase.name,
                phase.duration_ms,
                running_marker(phase.finished)
            );
            for sub in &phase.subphases {
                let detail = sub
                    .detail
                    .as_deref()
                    .map(|d| format!(" [{d}]"))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  - {}: {}ms{}{}",
                    sub.name,
                    sub.duration_ms,
                    detail,
                    running_marker(sub.finished)
                );
            }
            let accounted: u64 = phase.subphases.iter().map(|s| s.duration_ms).sum();
            let overhead = phase.duration_ms.saturating_sub(accounted);
            if overhead > threshold {
                let _ = writeln!(out, "  - overhead: {overhead}ms");
            }
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        run: &mut Run,
        at: Instant,
        kind: MetricsEventKind,
        phase: &str,
        subphase: Option<String>,
        duration_ms: Option<u64>,
        detail: Option<String>,
    ) {
        let event = MetricsEvent {
            timestamp: Utc::now(),
            elapsed_ms: run.offset(at),
            kind,
            phase: phase.to_string(),
            subphase,
            duration_ms,
            detail,
        };
        run.events.push(event.clone());
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

const fn running_marker(finished: bool) -> &'static str {
    if finished { "" } else { " (running)" }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
