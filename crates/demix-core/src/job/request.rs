//! Job request parsing
//!
//! The intake runtime delivers a JSON job of the form
//!
//! ```json
//! {
//!     "input": {
//!         "audio_data": "<base64>",
//!         "filename": "audio.mp3",
//!         "method": "htdemucs_ft",
//!         "model_settings": {}
//!     }
//! }
//! ```
//!
//! Only `audio_data` is required.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{JobError, Result};

/// Filename assumed when the job doesn't carry a usable one
pub const DEFAULT_FILENAME: &str = "audio.mp3";

/// Error text for a job without a payload
pub const NO_AUDIO_DATA: &str = "No audio data provided";

/// Wire shape of `job.input`
#[derive(Debug, Default, Deserialize)]
struct JobInput {
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    model_settings: Option<Map<String, Value>>,
}

/// Validated, immutable job parameters
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// Base64 audio
    pub audio_payload: String,
    /// Bare file name, used only for naming and the extension
    pub source_filename: String,
    /// Model configuration passed to the separation tool
    pub separation_profile: String,
    /// Passed through untouched; nothing reads it yet
    pub profile_options: Map<String, Value>,
}

impl JobRequest {
    /// Parse a raw job, filling defaults
    pub fn from_job(job: &Value, default_profile: &str) -> Result<Self> {
        let input = match job.get("input") {
            None | Some(Value::Null) => JobInput::default(),
            Some(value @ Value::Object(_)) => JobInput::deserialize(value)
                .map_err(|e| JobError::InvalidInput(format!("Invalid job input: {}", e)))?,
            Some(_) => {
                return Err(JobError::InvalidInput(
                    "Job input must be an object".to_string(),
                ))
            }
        };

        let audio_payload = match input.audio_data {
            Some(data) if !data.trim().is_empty() => data,
            _ => return Err(JobError::InvalidInput(NO_AUDIO_DATA.to_string())),
        };

        let separation_profile = match input.method {
            Some(method) if !method.trim().is_empty() => method.trim().to_string(),
            _ => default_profile.to_string(),
        };
        validate_profile(&separation_profile)?;

        Ok(Self {
            audio_payload,
            source_filename: sanitize_filename(input.filename.as_deref()),
            separation_profile,
            profile_options: input.model_settings.unwrap_or_default(),
        })
    }

    /// Name reported for the result: `<source stem>_no_vocals.<artifact ext>`
    pub fn output_filename(&self, artifact: &Path) -> String {
        let stem = Path::new(&self.source_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let extension = artifact
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wav".to_string());
        format!("{}_no_vocals.{}", stem, extension)
    }
}

/// Reduce a client-supplied name to its last path component
fn sanitize_filename(name: Option<&str>) -> String {
    let base = name
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    match base {
        "" | "." | ".." => DEFAULT_FILENAME.to_string(),
        _ => base.to_string(),
    }
}

/// Profiles become a directory level in the tool's output, so they must be a
/// single plain path component. A leading `-` would be parsed as a tool flag.
fn validate_profile(profile: &str) -> Result<()> {
    let bad = profile == "."
        || profile == ".."
        || profile.starts_with('-')
        || profile.contains(['/', '\\'])
        || profile.chars().any(char::is_control);
    if bad {
        return Err(JobError::InvalidInput(format!(
            "Invalid separation profile: {:?}",
            profile
        )));
    }
    Ok(())
}
