//! Job error types
//!
//! Every pipeline stage returns one of these. They are only turned into a
//! failure response at the job boundary (see [`crate::job::Processor::handle`]).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can terminate a vocal-removal job
#[derive(Error, Debug)]
pub enum JobError {
    /// Missing or malformed request fields. No external process is started.
    #[error("{0}")]
    InvalidInput(String),

    /// The separation tool exited with a non-zero status
    #[error("Separation tool failed ({status}): {diagnostics}")]
    ExternalTool { status: String, diagnostics: String },

    /// An external program could not be started at all
    #[error("Failed to launch {program:?}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external program exceeded its wall-clock budget and was killed
    #[error("{} timed out after {}s", .program.display(), .limit.as_secs())]
    Timeout { program: PathBuf, limit: Duration },

    /// The tool exited cleanly but left no `no_vocals.*` artifact behind
    #[error("Could not find separation output under {}", .output_dir.display())]
    OutputNotFound { output_dir: PathBuf },

    /// A file expected at encode time is missing or unreadable
    #[error("Output file not readable: {}", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scratch space could not be allocated or written
    #[error("Workspace error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    /// Stable, machine-readable category name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ExternalTool { .. } | Self::Launch { .. } => "external_tool",
            Self::Timeout { .. } => "timeout",
            Self::OutputNotFound { .. } => "output_not_found",
            Self::NotFound { .. } => "not_found",
            Self::Workspace { .. } => "workspace",
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
