//! Shared helpers for the integration tests: a scripted in-memory API and
//! synthetic test images.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use avatar_forge::api::{
    GenerationApi, JobHandle, JobStatus, RunResponse, StatusResponse, SubmissionRequest,
};
use avatar_forge::config::GeneratorConfig;
use avatar_forge::error::{AvatarError, AvatarResult, OP_STATUS, OP_SUBMIT};
use avatar_forge::processing::ImagePipeline;
use avatar_forge::{GenerationSession, SelectedImage};
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{Value, json};

/// One scripted answer to `GET /status/{id}`.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(JobStatus),
    Output(JobStatus, Value),
    HttpError(u16),
}

#[derive(Default)]
struct MockState {
    submitted: Vec<SubmissionRequest>,
    status_calls: Vec<JobHandle>,
    scripts: HashMap<String, VecDeque<Reply>>,
    submit_error: Option<u16>,
}

/// In-memory [`GenerationApi`]. Jobs are named `job-1`, `job-2`, ... in
/// submission order; unscripted polls answer `IN_PROGRESS`.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for `job`.
    pub fn script(&self, job: &str, replies: impl IntoIterator<Item = Reply>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry(job.to_string())
            .or_default()
            .extend(replies);
    }

    /// Make every `POST /run` answer with this HTTP status.
    pub fn fail_submit(&self, status: u16) {
        self.state.lock().unwrap().submit_error = Some(status);
    }

    pub fn submitted(&self) -> Vec<SubmissionRequest> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    pub fn status_calls(&self) -> Vec<JobHandle> {
        self.state.lock().unwrap().status_calls.clone()
    }

    pub fn status_count(&self) -> usize {
        self.state.lock().unwrap().status_calls.len()
    }
}

#[async_trait]
impl GenerationApi for MockApi {
    async fn submit(&self, request: &SubmissionRequest) -> AvatarResult<RunResponse> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.submit_error {
            return Err(AvatarError::api(OP_SUBMIT, code, "scripted failure"));
        }
        state.submitted.push(request.clone());
        Ok(RunResponse {
            id: JobHandle::new(format!("job-{}", state.submitted.len())),
            status: JobStatus::InQueue,
        })
    }

    async fn status(&self, job: &JobHandle) -> AvatarResult<StatusResponse> {
        let mut state = self.state.lock().unwrap();
        state.status_calls.push(job.clone());
        let reply = state
            .scripts
            .get_mut(job.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Status(JobStatus::InProgress));

        let (status, output) = match reply {
            Reply::Status(status) => (status, None),
            Reply::Output(status, output) => (status, Some(output)),
            Reply::HttpError(code) => {
                return Err(AvatarError::api(OP_STATUS, code, "scripted failure"));
            }
        };
        Ok(StatusResponse {
            id: Some(job.clone()),
            status,
            output,
            error: None,
        })
    }
}

/// Configuration pointing at a placeholder endpoint.
pub fn test_config() -> GeneratorConfig {
    GeneratorConfig::new("http://mock.invalid/v2/avatar", "test-key")
}

/// Session over `api` with an empty pipeline.
pub fn session_with(api: Arc<MockApi>, config: GeneratorConfig) -> GenerationSession {
    GenerationSession::builder()
        .with_config(config)
        .with_api(api)
        .with_pipeline(ImagePipeline::new())
        .with_rng_seed(7)
        .build()
        .unwrap()
}

/// Pixel (x, y) = (x mod 256, y mod 256, 128).
pub fn coord_image(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    }))
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    encode(&coord_image(w, h), ImageFormat::Png)
}

pub fn selected_png(w: u32, h: u32) -> SelectedImage {
    SelectedImage::new(png_bytes(w, h), "image/png").with_name("photo.png")
}

/// A completed-job output in the string-encoded form.
pub fn completed_output(w: u32, h: u32) -> Value {
    let b64 = general_purpose::STANDARD.encode(png_bytes(w, h));
    Value::String(json!({ "image": b64 }).to_string())
}

pub fn completed(w: u32, h: u32) -> Reply {
    Reply::Output(JobStatus::Completed, completed_output(w, h))
}

/// Upper bound on any single test; the clock is paused so this is virtual time.
pub const TEST_DEADLINE: Duration = Duration::from_secs(600);
