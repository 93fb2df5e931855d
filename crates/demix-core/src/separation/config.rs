//! Separation configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard bounds for the separation timeout
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// How the external separation tool is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Executable to run (`python` for `python -m demucs`, or a `demucs` entry point)
    pub program: PathBuf,

    /// Arguments placed before the separation flags
    pub program_args: Vec<String>,

    /// Encoding of the stems the tool writes
    pub output_format: OutputFormat,

    /// Wall-clock budget for one separation run
    pub timeout_secs: u64,

    /// Profile used when a job doesn't name one
    pub default_profile: String,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python"),
            program_args: vec!["-m".to_string(), "demucs".to_string()],
            output_format: OutputFormat::Mp3,
            timeout_secs: 300,
            default_profile: String::from("htdemucs_ft"),
        }
    }
}

impl SeparationConfig {
    /// Validate configuration values
    pub fn validate(&mut self) {
        self.timeout_secs = self.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        if self.default_profile.trim().is_empty() {
            self.default_profile = Self::default().default_profile;
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Stem encoding requested from the separation tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// MP3 (smallest payloads, the worker default)
    #[default]
    Mp3,
    /// Uncompressed WAV (the tool's own default, no flag needed)
    Wav,
    /// Lossless FLAC
    Flac,
}

impl OutputFormat {
    /// Command-line flag selecting this format, if any
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            Self::Mp3 => Some("--mp3"),
            Self::Wav => None,
            Self::Flac => Some("--flac"),
        }
    }

    /// File extension the tool produces
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Flac => "flac",
        }
    }
}

/// Startup model warm-up
///
/// Each listed profile is loaded once by running `program args...` with
/// `{profile}` and `{device}` substituted, so the first real job doesn't pay
/// for fetching weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Run warm-up at startup at all
    pub enabled: bool,

    /// Profiles to warm, in order
    pub profiles: Vec<String>,

    /// Executable for the warm-up command
    pub program: PathBuf,

    /// Argument template; `{profile}` and `{device}` are substituted
    pub args: Vec<String>,

    /// Budget per profile
    pub timeout_secs: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profiles: vec!["htdemucs_ft".to_string(), "htdemucs".to_string()],
            program: PathBuf::from("python"),
            args: vec![
                "-c".to_string(),
                "from demucs.pretrained import get_model; get_model('{profile}').to('{device}')"
                    .to_string(),
            ],
            timeout_secs: 600,
        }
    }
}

impl WarmupConfig {
    pub fn validate(&mut self) {
        self.timeout_secs = self.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self.profiles.retain(|p| !p.trim().is_empty());
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}
