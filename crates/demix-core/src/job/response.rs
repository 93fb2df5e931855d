//! Job response shapes
//!
//! Exactly one of [`SuccessResponse`] / [`FailureResponse`] is produced per
//! job. Both carry `success`, `processing_time` and `timestamp`, so callers
//! can branch on the single boolean.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    /// Base64 accompaniment stem
    pub processed_audio: String,
    /// Seconds from job receipt to response
    pub processing_time: f64,
    pub profile_used: String,
    pub device_used: String,
    pub output_filename: String,
    pub timestamp: String,
    pub serverless: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub processing_time: f64,
    pub timestamp: String,
    pub serverless: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResponse {
    Success(SuccessResponse),
    Failure(FailureResponse),
}

impl JobResponse {
    pub fn success(
        processed_audio: String,
        processing_time: f64,
        profile_used: String,
        device_used: String,
        output_filename: String,
    ) -> Self {
        Self::Success(SuccessResponse {
            success: true,
            processed_audio,
            processing_time,
            profile_used,
            device_used,
            output_filename,
            timestamp: now_iso(),
            serverless: true,
        })
    }

    pub fn failure(error: &JobError, processing_time: f64) -> Self {
        Self::Failure(FailureResponse {
            success: false,
            error: error.to_string(),
            error_kind: Some(error.kind().to_string()),
            processing_time,
            timestamp: now_iso(),
            serverless: true,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Error text of a failed job
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(&failure.error),
        }
    }

    pub fn processing_time(&self) -> f64 {
        match self {
            Self::Success(success) => success.processing_time,
            Self::Failure(failure) => failure.processing_time,
        }
    }

    /// Plain JSON mapping for the intake runtime
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            // Only reachable if a field stops being serializable
            log::error!("Failed to serialize job response: {}", e);
            serde_json::json!({"success": false, "error": e.to_string(), "serverless": true})
        })
    }
}

/// Local time, ISO-8601 with microseconds
fn now_iso() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
