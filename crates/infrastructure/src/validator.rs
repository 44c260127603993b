//! Command-line hardware validator
//!
//! Runs a vendor-supplied validation program with the model path appended to
//! its arguments. The program prints one JSON object on stdout, for example
//! `{"backend":"GPU","benchmark_ms":412}`. An empty answer means the program
//! could not decide for this device.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use ai_runtime::{HardwareValidator, RuntimeError, ValidatedAcceleration};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::PlatformConfig;

/// Hardware validator backed by an external program
#[derive(Debug, Clone)]
pub struct CommandHardwareValidator {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandHardwareValidator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(
            config.validator_command.clone(),
            Duration::from_millis(config.validator_timeout_ms),
        )
    }

    /// Whether a program is configured at all
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

#[async_trait]
impl HardwareValidator for CommandHardwareValidator {
    #[instrument(skip(self), fields(model = %model_path.display()))]
    async fn try_validate(
        &self,
        model_path: &Path,
    ) -> Result<Option<ValidatedAcceleration>, RuntimeError> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(None);
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(model_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program, "Running hardware validator");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(RuntimeError::HardwareValidation(format!(
                    "validator did not finish within {}ms",
                    self.timeout.as_millis()
                )));
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(program = %program, "Hardware validator not installed");
                return Ok(None);
            },
            Ok(Err(e)) => {
                return Err(RuntimeError::HardwareValidation(format!(
                    "failed to run {program}: {e}"
                )));
            },
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::HardwareValidation(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let answer = stdout.trim();
        if answer.is_empty() {
            debug!("Validator gave no answer");
            return Ok(None);
        }

        serde_json::from_str(answer).map(Some).map_err(|e| {
            RuntimeError::HardwareValidation(format!("unreadable validator output: {e}"))
        })
    }
}
