//! Accelerator detection
//!
//! The worker asks once, at startup, whether a GPU is usable and keeps the
//! answer for the life of the process.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Serialize;

use crate::config::DeviceConfig;
use crate::separation::process::run_with_timeout;

/// Device string passed to the separation tool when a GPU is present
pub const GPU_DEVICE: &str = "cuda";
/// Device string passed to the separation tool otherwise
pub const CPU_DEVICE: &str = "cpu";

/// What the accelerator provider reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceleratorStatus {
    pub gpu_available: bool,
    /// Human-readable GPU name, when one was reported
    pub device_name: Option<String>,
}

impl AcceleratorStatus {
    pub fn cpu() -> Self {
        Self {
            gpu_available: false,
            device_name: None,
        }
    }

    pub fn gpu(name: Option<String>) -> Self {
        Self {
            gpu_available: true,
            device_name: name,
        }
    }

    /// Device string for the separation tool
    pub fn device(&self) -> &'static str {
        if self.gpu_available {
            GPU_DEVICE
        } else {
            CPU_DEVICE
        }
    }
}

/// Source of the "GPU available" signal
pub trait AcceleratorProbe {
    fn probe(&self) -> AcceleratorStatus;
}

/// Queries `nvidia-smi` for the first GPU's name
pub struct NvidiaSmiProbe {
    program: PathBuf,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("nvidia-smi"),
            timeout: Duration::from_secs(10),
        }
    }

    /// Use a different executable (tests, non-standard installs)
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::new()
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceleratorProbe for NvidiaSmiProbe {
    fn probe(&self) -> AcceleratorStatus {
        let mut command = Command::new(&self.program);
        command.args(["--query-gpu=name", "--format=csv,noheader"]);

        match run_with_timeout(command, self.timeout) {
            Ok(output) if output.status.success() => {
                match first_gpu_name(&output.stdout) {
                    Some(name) => AcceleratorStatus::gpu(Some(name)),
                    None => {
                        log::debug!("{:?} listed no GPUs", self.program);
                        AcceleratorStatus::cpu()
                    }
                }
            }
            Ok(output) => {
                log::debug!("{:?} failed: {}", self.program, output.diagnostics());
                AcceleratorStatus::cpu()
            }
            Err(e) => {
                log::debug!("GPU probe unavailable: {}", e);
                AcceleratorStatus::cpu()
            }
        }
    }
}

/// First non-empty line of `nvidia-smi --query-gpu=name` output
fn first_gpu_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Probe that always reports the same status
pub struct FixedProbe(pub AcceleratorStatus);

impl AcceleratorProbe for FixedProbe {
    fn probe(&self) -> AcceleratorStatus {
        self.0.clone()
    }
}

/// The device chosen for this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSelection {
    /// Device string handed to the separation tool
    pub device: String,
    pub status: AcceleratorStatus,
}

impl DeviceSelection {
    /// Resolve the device once, honouring a configured override
    pub fn detect(config: &DeviceConfig, probe: &dyn AcceleratorProbe) -> Self {
        let selection = match config.force.as_deref().map(str::trim) {
            Some(forced) if !forced.is_empty() => {
                log::info!("Device forced by configuration: {}", forced);
                let status = if forced.starts_with(GPU_DEVICE) {
                    AcceleratorStatus::gpu(None)
                } else {
                    AcceleratorStatus::cpu()
                };
                Self {
                    device: forced.to_string(),
                    status,
                }
            }
            _ => {
                let status = probe.probe();
                Self {
                    device: status.device().to_string(),
                    status,
                }
            }
        };

        log::info!("Worker using device: {}", selection.device);
        if let Some(name) = &selection.status.device_name {
            log::info!("GPU: {}", name);
        }
        selection
    }
}
