//! Startup model warm-up
//!
//! Loading a separation model the first time fetches weights and compiles
//! kernels, which would otherwise land on the first job's latency. The warmer
//! runs a configurable command once per profile when the worker starts.
//! Every failure is a warning: a cold model is slower, not broken.

use std::process::Command;

use super::config::WarmupConfig;
use super::process::run_with_timeout;

/// Outcome of warming the configured profiles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupReport {
    /// Profiles that loaded successfully
    pub loaded: Vec<String>,
    /// Profiles that failed, with the reason
    pub failed: Vec<(String, String)>,
}

/// Pre-loads separation models
pub struct ModelWarmer {
    config: WarmupConfig,
}

impl ModelWarmer {
    pub fn new(config: WarmupConfig) -> Self {
        Self { config }
    }

    /// Warm every configured profile on `device`
    pub fn warm(&self, device: &str) -> WarmupReport {
        let mut report = WarmupReport::default();
        if !self.config.enabled || self.config.profiles.is_empty() {
            log::info!("Model warm-up disabled");
            return report;
        }

        log::info!("Pre-loading separation models: {:?}", self.config.profiles);
        for profile in &self.config.profiles {
            match self.warm_one(profile, device) {
                Ok(()) => {
                    log::info!("Pre-loaded model: {}", profile);
                    report.loaded.push(profile.clone());
                }
                Err(reason) => {
                    log::warn!("Could not pre-load {}: {}", profile, reason);
                    report.failed.push((profile.clone(), reason));
                }
            }
        }
        report
    }

    fn warm_one(&self, profile: &str, device: &str) -> std::result::Result<(), String> {
        let mut command = Command::new(&self.config.program);
        command.args(render_args(&self.config.args, profile, device));

        let output =
            run_with_timeout(command, self.config.timeout()).map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!("{}: {}", output.status, output.diagnostics()))
        }
    }
}

/// Substitute `{profile}` and `{device}` in an argument template
pub fn render_args(template: &[String], profile: &str, device: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{profile}", profile).replace("{device}", device))
        .collect()
}
