//! Hardware backends and how a backend was chosen

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hardware execution target for an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Backend {
    /// Accelerated execution on the GPU
    Gpu,
    /// General-purpose CPU execution
    Cpu,
}

impl Backend {
    /// Whether this backend uses an accelerator
    pub const fn is_accelerated(self) -> bool {
        matches!(self, Self::Gpu)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "GPU"),
            Self::Cpu => write!(f, "CPU"),
        }
    }
}

/// Which tier produced an acceleration decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    /// Confirmed by a platform hardware-validation capability
    Validated,
    /// Inferred from GPU probing and device fingerprinting
    Heuristic,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated => write!(f, "validated"),
            Self::Heuristic => write!(f, "heuristic"),
        }
    }
}
