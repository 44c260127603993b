//! Hardware backend selection
//!
//! Chooses the backend for a model file in two tiers:
//!
//! ```text
//! select(model)
//!     │
//!     ▼
//! ┌───────────────────────┐   None / error   ┌──────────────────────────┐
//! │ platform validation   │ ───────────────▶ │ heuristic                │
//! │ (optional capability) │                  │ bounded GPU probe        │
//! └───────────────────────┘                  │ + NPU device fingerprint │
//!     │ Some                                 └──────────────────────────┘
//!     ▼                                          │
//! {backend, 0.95, Validated}          {GPU 0.95 | GPU 0.85 | CPU 0.70, Heuristic}
//! ```
//!
//! Neither tier ever surfaces an error to the caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aho_corasick::AhoCorasick;
use domain::{AccelerationDecision, Backend, DecisionSource, HardwareProfile};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::ports::{HardwarePlatform, HardwareValidator};

/// Confidence of a platform-validated decision
pub const VALIDATED_CONFIDENCE: f32 = 0.95;
/// GPU available on an NPU-class device
pub const GPU_NPU_CLASS_CONFIDENCE: f32 = 0.95;
/// GPU available on any other device
pub const GPU_CONFIDENCE: f32 = 0.85;
/// No usable GPU
pub const CPU_CONFIDENCE: f32 = 0.70;

/// Picks a backend for a model with graceful fallback
pub struct BackendSelector {
    platform: Arc<dyn HardwarePlatform>,
    validator: Option<Arc<dyn HardwareValidator>>,
    npu_matcher: Option<AhoCorasick>,
    probe_timeout: Duration,
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("validator", &self.validator.is_some())
            .field("npu_keywords", &self.npu_matcher.as_ref().map(AhoCorasick::patterns_len))
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl BackendSelector {
    /// Create a selector from the runtime configuration
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Configuration` if the NPU keyword matcher cannot be built.
    pub fn new(
        platform: Arc<dyn HardwarePlatform>,
        validator: Option<Arc<dyn HardwareValidator>>,
        config: &RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let keywords: Vec<&str> = config
            .npu_device_keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
            .collect();

        let npu_matcher = if keywords.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(&keywords)
                    .map_err(|e| RuntimeError::Configuration(format!("NPU keywords: {e}")))?,
            )
        };

        Ok(Self {
            platform,
            validator,
            npu_matcher,
            probe_timeout: config.gpu_probe_timeout(),
        })
    }

    /// Validated tier first, heuristic tier otherwise
    #[instrument(skip(self), fields(model = %model_path.display()))]
    pub async fn select(&self, model_path: &Path) -> AccelerationDecision {
        if let Some(decision) = self.try_validated(model_path).await {
            return decision;
        }
        self.heuristic(model_path).await
    }

    /// Ask the platform validation capability, if any
    ///
    /// Absence of the capability and any failure both yield `None`.
    pub async fn try_validated(&self, model_path: &Path) -> Option<AccelerationDecision> {
        let Some(validator) = self.validator.as_ref() else {
            debug!("No hardware validation capability registered");
            return None;
        };

        match validator.try_validate(model_path).await {
            Ok(Some(validated)) => {
                let decision = AccelerationDecision::new(
                    validated.backend,
                    VALIDATED_CONFIDENCE,
                    DecisionSource::Validated,
                    validated.benchmark_duration_ms,
                    self.platform.profile(),
                );
                info!(
                    backend = %decision.backend(),
                    benchmark_ms = decision.benchmark_duration_ms(),
                    "Hardware validation succeeded"
                );
                Some(decision)
            },
            Ok(None) => {
                debug!("Hardware validation unavailable on this platform");
                None
            },
            Err(e) => {
                warn!(error = %e, "Hardware validation failed, falling back to heuristic");
                None
            },
        }
    }

    /// GPU probe combined with device fingerprinting; always succeeds
    pub async fn heuristic(&self, model_path: &Path) -> AccelerationDecision {
        let started = Instant::now();
        let gpu_available = self.probe_gpu().await;
        let profile = self.platform.profile();
        let npu_class = self.is_npu_class(&profile);

        let (backend, confidence) = match (gpu_available, npu_class) {
            (true, true) => (Backend::Gpu, GPU_NPU_CLASS_CONFIDENCE),
            (true, false) => (Backend::Gpu, GPU_CONFIDENCE),
            (false, _) => (Backend::Cpu, CPU_CONFIDENCE),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            model = %model_path.display(),
            gpu_available,
            npu_class,
            backend = %backend,
            confidence,
            "Heuristic backend selection"
        );

        AccelerationDecision::new(
            backend,
            confidence,
            DecisionSource::Heuristic,
            elapsed_ms,
            profile,
        )
    }

    /// Whether the device belongs to a known NPU-capable family
    pub fn is_npu_class(&self, profile: &HardwareProfile) -> bool {
        self.npu_matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(&profile.fingerprint()))
    }

    /// GPU probe bounded by the configured timeout; errors and timeouts mean `false`
    async fn probe_gpu(&self) -> bool {
        match timeout(self.probe_timeout, self.platform.probe_gpu()).await {
            Ok(Ok(available)) => available,
            Ok(Err(e)) => {
                warn!(error = %e, "GPU probe failed, assuming no GPU");
                false
            },
            Err(_) => {
                warn!(
                    timeout_ms = self.probe_timeout.as_millis(),
                    "GPU probe timed out, assuming no GPU"
                );
                false
            },
        }
    }
}
