//! Worker configuration
//!
//! Configuration is stored as YAML. Default location: `~/.config/demix/config.yaml`,
//! overridable with `DEMIX_CONFIG`. A handful of environment variables take
//! precedence over the file so container images can be tuned without
//! rebuilding a config:
//!
//! | Variable             | Overrides                  |
//! |----------------------|----------------------------|
//! | `DEMIX_SCRATCH_ROOT` | `scratch.root`             |
//! | `DEMIX_SEPARATOR`    | `separation.program`       |
//! | `DEMIX_DEVICE`       | `device.force`             |
//! | `DEMIX_TIMEOUT_SECS` | `separation.timeout_secs`  |

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{default_config_path, default_scratch_root, SCRATCH_DIR_NAME};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::separation::{OutputFormat, SeparationConfig, WarmupConfig};

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "DEMIX_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Scratch space settings
    pub scratch: ScratchConfig,
    /// External separation tool invocation
    pub separation: SeparationConfig,
    /// Startup model warm-up
    pub warmup: WarmupConfig,
    /// Accelerator selection
    pub device: DeviceConfig,
}

/// Scratch space configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Process-wide root under which every job gets its own workspace
    pub root: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: default_scratch_root(),
        }
    }
}

/// Device configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Skip probing and use this device string verbatim (e.g. "cpu", "cuda:1")
    pub force: Option<String>,
}

impl WorkerConfig {
    /// Load the config from `path` (or `DEMIX_CONFIG`, or the default path),
    /// then apply environment overrides and validation
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        let mut config: Self = load_config(&path);
        config.apply_env_overrides();
        config.validate();
        config
    }

    /// Clamp out-of-range values
    pub fn validate(&mut self) {
        self.separation.validate();
        self.warmup.validate();
    }

    /// Apply `DEMIX_*` environment variables on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("DEMIX_SCRATCH_ROOT") {
            self.scratch.root = PathBuf::from(root);
        }
        if let Some(program) = lookup("DEMIX_SEPARATOR") {
            self.separation.program = PathBuf::from(program);
        }
        if let Some(device) = lookup("DEMIX_DEVICE") {
            self.device.force = Some(device);
        }
        if let Some(secs) = lookup("DEMIX_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(secs) => self.separation.timeout_secs = secs,
                Err(e) => log::warn!("Ignoring DEMIX_TIMEOUT_SECS={:?}: {}", secs, e),
            }
        }
    }
}
