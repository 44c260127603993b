//! System hardware platform
//!
//! Describes the device from `/proc` and device nodes, with config overrides
//! taking precedence. The profile is read once at construction; only the GPU
//! probe touches the file system afterwards.

use std::path::{Path, PathBuf};

use ai_runtime::{HardwarePlatform, RuntimeError};
use async_trait::async_trait;
use domain::HardwareProfile;
use tracing::{debug, instrument};

use crate::config::PlatformConfig;

/// Hardware platform backed by the running system
#[derive(Debug, Clone)]
pub struct SystemHardwarePlatform {
    profile: HardwareProfile,
    gpu_device_nodes: Vec<PathBuf>,
}

impl SystemHardwarePlatform {
    /// Inspect the running system
    pub fn new(config: &PlatformConfig) -> Self {
        Self::with_root(config, Path::new("/"))
    }

    /// Inspect a system image mounted at `root`; device nodes from the config
    /// are resolved against it as well
    pub fn with_root(config: &PlatformConfig, root: &Path) -> Self {
        let rooted = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));

        let cpuinfo = read_trimmed(&rooted(Path::new("/proc/cpuinfo")));
        let facts = cpuinfo.as_deref().map(parse_cpuinfo).unwrap_or_default();

        let device_model = config
            .device_model
            .clone()
            .or_else(|| read_trimmed(&rooted(Path::new("/proc/device-tree/model"))))
            .or(facts.model)
            .unwrap_or_else(|| "unknown".to_string());

        let chipset = config
            .chipset
            .clone()
            .or(facts.hardware)
            .unwrap_or_else(|| "unknown".to_string());

        let cpu_cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);

        let os_version = read_trimmed(&rooted(Path::new("/proc/sys/kernel/osrelease")))
            .map_or_else(|| std::env::consts::OS.to_string(), |release| {
                format!("{} {release}", std::env::consts::OS)
            });

        let gpu_device_nodes: Vec<PathBuf> =
            config.gpu_device_nodes.iter().map(|p| rooted(p.as_path())).collect();
        let has_gpu = gpu_device_nodes.iter().any(|p| p.exists());
        let has_npu = config.npu_device_nodes.iter().any(|p| rooted(p.as_path()).exists());

        let profile = HardwareProfile {
            device_model,
            chipset,
            cpu_cores,
            has_gpu,
            has_npu,
            has_nnapi: cfg!(target_os = "android"),
            os_version,
        };
        debug!(profile = %profile, "Hardware profile detected");

        Self {
            profile,
            gpu_device_nodes,
        }
    }
}

#[async_trait]
impl HardwarePlatform for SystemHardwarePlatform {
    fn profile(&self) -> HardwareProfile {
        self.profile.clone()
    }

    #[instrument(skip(self))]
    async fn probe_gpu(&self) -> Result<bool, RuntimeError> {
        for node in &self.gpu_device_nodes {
            match tokio::fs::try_exists(node).await {
                Ok(true) => {
                    debug!(node = %node.display(), "GPU device node present");
                    return Ok(true);
                },
                Ok(false) => {},
                Err(e) => {
                    return Err(RuntimeError::Probe(format!(
                        "cannot inspect {}: {e}",
                        node.display()
                    )));
                },
            }
        }
        Ok(false)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
        .filter(|s| !s.is_empty())
}

/// Facts extracted from `/proc/cpuinfo`
#[derive(Debug, Default, PartialEq, Eq)]
struct CpuInfo {
    /// SoC name (`Hardware` line on ARM kernels)
    hardware: Option<String>,
    /// Board or CPU name (`Model` on Raspberry Pi, `model name` on x86)
    model: Option<String>,
}

fn parse_cpuinfo(text: &str) -> CpuInfo {
    let mut info = CpuInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "Hardware" if info.hardware.is_none() => info.hardware = Some(value.to_string()),
            "Model" => info.model = Some(value.to_string()),
            "model name" if info.model.is_none() => info.model = Some(value.to_string()),
            _ => {},
        }
    }
    info
}
