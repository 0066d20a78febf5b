//! Wire types for the inference API.
//!
//! `POST /run` takes `{"input": {...}}` where the numeric tuning fields are
//! strings (the deployed worker parses them itself) and `seed` is a number.
//! `GET /status/{id}` answers `{"id", "status", "output"?}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::selection::SelectedImage;

/// Opaque job identifier returned by `POST /run`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job status as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    /// Anything else; treated as still running.
    Other(String),
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "IN_QUEUE" => JobStatus::InQueue,
            "IN_PROGRESS" => JobStatus::InProgress,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" => JobStatus::Cancelled,
            "TIMED_OUT" => JobStatus::TimedOut,
            _ => JobStatus::Other(raw),
        }
    }
}

impl JobStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }

    /// Terminal without a result.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failure()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::InQueue => "IN_QUEUE",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Other(raw) => raw,
        };
        f.write_str(s)
    }
}

/// Response to `POST /run`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunResponse {
    pub id: JobHandle,
    pub status: JobStatus,
}

/// Response to `GET /status/{id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: Option<JobHandle>,
    pub status: JobStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// Generation parameters with the seed already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub low_threshold: u32,
    pub high_threshold: u32,
    pub guidance_scale: f32,
    pub seed: u64,
    pub num_images: Option<u32>,
}

/// One immutable generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRequest {
    image: String,
    params: GenerationParams,
}

impl SubmissionRequest {
    pub fn new(image: &SelectedImage, params: GenerationParams) -> Self {
        Self {
            image: image.to_transfer_string(),
            params,
        }
    }

    /// Base64 image payload.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.params.seed
    }

    /// JSON body for `POST /run`.
    pub fn body(&self) -> RunBody<'_> {
        let p = &self.params;
        RunBody {
            input: RunInput {
                prompt: &p.prompt,
                nprompt: &p.negative_prompt,
                width: p.width.to_string(),
                height: p.height.to_string(),
                num_inference_steps: p.num_inference_steps.to_string(),
                low_threshold: p.low_threshold.to_string(),
                high_threshold: p.high_threshold.to_string(),
                guidance_scale: p.guidance_scale.to_string(),
                seed: p.seed,
                image: &self.image,
                num_images: p.num_images.map(|n| n.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunBody<'a> {
    pub input: RunInput<'a>,
}

#[derive(Debug, Serialize)]
pub struct RunInput<'a> {
    pub prompt: &'a str,
    pub nprompt: &'a str,
    pub width: String,
    pub height: String,
    pub num_inference_steps: String,
    pub low_threshold: String,
    pub high_threshold: String,
    pub guidance_scale: String,
    pub seed: u64,
    pub image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_images: Option<String>,
}
