//! Payload codec: base64 text <-> files in a job workspace

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{JobError, Result};
use crate::workspace::{timestamp_token, Workspace};

/// Decode `payload` and write it to a new input file inside `workspace`
///
/// The file is named `input_<timestamp>_<filename>`. `filename` must already
/// be a bare file name (see [`crate::job::JobRequest`]).
pub fn decode(workspace: &Workspace, payload: &str, filename: &str) -> Result<PathBuf> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(JobError::InvalidInput("No audio data provided".to_string()));
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| JobError::InvalidInput(format!("Invalid base64 audio data: {}", e)))?;

    let path = workspace.file_path(&format!("input_{}_{}", timestamp_token(), filename));
    fs::write(&path, &bytes).map_err(|e| JobError::workspace(&path, e))?;

    log::info!("Decoded audio file: {:?} ({} bytes)", path, bytes.len());
    Ok(path)
}

/// Read `path` and return its contents as base64 text
pub fn encode(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| JobError::NotFound {
        path: path.to_path_buf(),
        source,
    })?;
    let encoded = STANDARD.encode(bytes);

    log::info!("Encoded result file: {} characters", encoded.len());
    Ok(encoded)
}
