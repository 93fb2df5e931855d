//! Separation backend trait and the Demucs command-line implementation
//!
//! The job processor only talks to [`SeparationBackend`], so the external tool
//! can be replaced (or faked in tests) without touching the pipeline.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::config::SeparationConfig;
use super::discovery;
use super::process::run_with_timeout;
use crate::error::{JobError, Result};
use crate::workspace::Workspace;

/// Fixed quality knobs: one shift, moderate overlap, a single worker job.
/// These bound per-job latency and are not configurable per request.
pub const SHIFTS: &str = "1";
pub const OVERLAP: &str = "0.25";
pub const JOBS: &str = "1";

/// Located output of one separation run
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationResult {
    /// The non-vocal stem inside the job's workspace
    pub artifact: PathBuf,
    /// Device string the tool was run with
    pub device: String,
}

/// Trait for vocal-removal backends
pub trait SeparationBackend: Send + Sync {
    /// Strip vocals from `input_path`, writing into `workspace`
    ///
    /// Returns the path of the accompaniment stem. The artifact lives inside
    /// the workspace and disappears when it is released.
    fn separate(
        &self,
        workspace: &Workspace,
        input_path: &Path,
        profile: &str,
        device: &str,
    ) -> Result<SeparationResult>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Runs the Demucs CLI (`python -m demucs ...`) as a blocking subprocess
pub struct DemucsBackend {
    config: SeparationConfig,
}

impl DemucsBackend {
    pub fn new(config: SeparationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// Full argument list after the program name
    pub fn arguments(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profile: &str,
        device: &str,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.config.program_args.iter().map(OsString::from).collect();

        if let Some(flag) = self.config.output_format.flag() {
            args.push(flag.into());
        }
        args.push("--two-stems=vocals".into());
        args.push("-n".into());
        args.push(profile.into());
        args.push("-o".into());
        args.push(output_dir.into());
        args.push("--device".into());
        args.push(device.into());
        args.push("--shifts".into());
        args.push(SHIFTS.into());
        args.push("--overlap".into());
        args.push(OVERLAP.into());
        args.push("--jobs".into());
        args.push(JOBS.into());
        args.push(input_path.into());
        args
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut command = Command::new(&self.config.program);
        command.args(args);
        command
    }
}

impl SeparationBackend for DemucsBackend {
    fn separate(
        &self,
        workspace: &Workspace,
        input_path: &Path,
        profile: &str,
        device: &str,
    ) -> Result<SeparationResult> {
        log::info!("Starting vocal removal with profile {} on {}", profile, device);

        let output_dir = workspace.create_dir("separated")?;
        let args = self.arguments(input_path, &output_dir, profile, device);

        log::info!(
            "Running separator: {} {}",
            self.config.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = run_with_timeout(self.command(&args), self.config.timeout())?;

        if !output.status.success() {
            log::error!("Separator failed ({}): {}", output.status, output.stderr.trim());
            log::error!("Separator stdout: {}", output.stdout.trim());
            return Err(JobError::ExternalTool {
                status: output.status.to_string(),
                diagnostics: output.diagnostics(),
            });
        }

        log::info!("Separator finished successfully");

        let input_stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match discovery::find_artifact(&output_dir, profile, &input_stem) {
            Some(artifact) => {
                log::info!("Found vocals-removed file: {:?}", artifact);
                Ok(SeparationResult {
                    artifact,
                    device: device.to_string(),
                })
            }
            None => {
                log::error!(
                    "Separator exited cleanly but wrote no {}* under {:?} (expected {:?}); \
                     the tool's output layout may have changed",
                    discovery::ARTIFACT_PREFIX,
                    output_dir,
                    discovery::expected_dir(&output_dir, profile, &input_stem)
                );
                Err(JobError::OutputNotFound { output_dir })
            }
        }
    }

    fn name(&self) -> &'static str {
        "demucs-cli"
    }
}
