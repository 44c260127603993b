//! Descriptive hardware profile of the device

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the runtime knows about the device it runs on
///
/// Purely descriptive: it is logged and attached to acceleration decisions,
/// the selector only reads the device model and chipset for fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub device_model: String,
    pub chipset: String,
    pub cpu_cores: usize,
    pub has_gpu: bool,
    pub has_npu: bool,
    pub has_nnapi: bool,
    pub os_version: String,
}

impl HardwareProfile {
    /// Text used for keyword fingerprinting (device model and chipset)
    pub fn fingerprint(&self) -> String {
        format!("{} {}", self.device_model, self.chipset)
    }
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self {
            device_model: "unknown".to_string(),
            chipset: "unknown".to_string(),
            cpu_cores: 1,
            has_gpu: false,
            has_npu: false,
            has_nnapi: false,
            os_version: "unknown".to_string(),
        }
    }
}

impl fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}), {} cores, gpu={}, npu={}, nnapi={}, os={}",
            self.device_model,
            self.chipset,
            self.cpu_cores,
            self.has_gpu,
            self.has_npu,
            self.has_nnapi,
            self.os_version
        )
    }
}
