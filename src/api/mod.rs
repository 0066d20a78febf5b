//! Inference API: wire types, the HTTP client and result decoding.

pub mod client;
pub mod output;
pub mod types;

use async_trait::async_trait;

use crate::error::AvatarResult;

pub use client::HttpApi;
pub use output::{ResultImage, decode_output};
pub use types::{
    GenerationParams, JobHandle, JobStatus, RunResponse, StatusResponse, SubmissionRequest,
};

/// The two calls a generation session makes against the service.
///
/// [`HttpApi`] is the production implementation; tests substitute a scripted
/// one.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// `POST /run`: start a job.
    async fn submit(&self, request: &SubmissionRequest) -> AvatarResult<RunResponse>;

    /// `GET /status/{id}`: fetch the job's current status.
    async fn status(&self, job: &JobHandle) -> AvatarResult<StatusResponse>;
}
