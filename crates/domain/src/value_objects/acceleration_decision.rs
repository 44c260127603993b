//! The outcome of backend selection
//!
//! # Examples
//!
//! ```
//! use domain::{AccelerationDecision, Backend, DecisionSource, HardwareProfile};
//!
//! let decision = AccelerationDecision::new(
//!     Backend::Gpu,
//!     0.85,
//!     DecisionSource::Heuristic,
//!     12,
//!     HardwareProfile::default(),
//! );
//! assert_eq!(decision.backend(), Backend::Gpu);
//! assert!(!decision.is_validated());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Backend, DecisionSource, HardwareProfile};

/// Backend choice for one model, with the confidence behind it
///
/// Immutable once produced: fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerationDecision {
    backend: Backend,
    confidence: f32,
    source: DecisionSource,
    benchmark_duration_ms: u64,
    hardware_profile: HardwareProfile,
}

impl AccelerationDecision {
    /// Create a decision; confidence is clamped into `[0, 1]` and NaN becomes 0
    pub fn new(
        backend: Backend,
        confidence: f32,
        source: DecisionSource,
        benchmark_duration_ms: u64,
        hardware_profile: HardwareProfile,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            backend,
            confidence,
            source,
            benchmark_duration_ms,
            hardware_profile,
        }
    }

    pub const fn backend(&self) -> Backend {
        self.backend
    }

    pub const fn confidence(&self) -> f32 {
        self.confidence
    }

    pub const fn source(&self) -> DecisionSource {
        self.source
    }

    /// Time spent reaching the decision (validation benchmark or probing)
    pub const fn benchmark_duration_ms(&self) -> u64 {
        self.benchmark_duration_ms
    }

    pub const fn hardware_profile(&self) -> &HardwareProfile {
        &self.hardware_profile
    }

    pub fn is_validated(&self) -> bool {
        self.source == DecisionSource::Validated
    }
}

impl fmt::Display for AccelerationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (confidence {:.2}, {}, {}ms)",
            self.backend, self.confidence, self.source, self.benchmark_duration_ms
        )
    }
}
