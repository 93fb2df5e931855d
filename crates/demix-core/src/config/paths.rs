//! Standard locations for the worker's config file and scratch root

use std::path::PathBuf;

/// Directory name used under the system temp dir for per-job scratch space
pub const SCRATCH_DIR_NAME: &str = "vocal_removal";

/// Get the default scratch root
///
/// Returns: `<system temp>/vocal_removal`
pub fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join(SCRATCH_DIR_NAME)
}

/// Get the default config file path
///
/// Returns: `~/.config/demix/config.yaml` (platform config dir)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("demix")
        .join("config.yaml")
}
