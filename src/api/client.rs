use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::GenerationApi;
use super::types::{JobHandle, RunResponse, StatusResponse, SubmissionRequest};
use crate::config::ApiConfig;
use crate::error::{AvatarError, AvatarResult, OP_STATUS, OP_SUBMIT};

/// Longest response body excerpt kept in an error.
const BODY_EXCERPT: usize = 512;

/// reqwest-backed client for `POST /run` and `GET /status/{id}`.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
    api_key: String,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> AvatarResult<Self> {
        let base = Url::parse(config.trimmed_base_url()).map_err(|e| {
            AvatarError::config("api.base_url", config.base_url.clone(), e.to_string())
        })?;
        if base.cannot_be_a_base() {
            return Err(AvatarError::config(
                "api.base_url",
                config.base_url.clone(),
                "URL cannot have path segments appended",
            ));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AvatarError::external("reqwest", e))?;

        Ok(Self {
            client,
            base,
            api_key: config.api_key.clone(),
        })
    }

    /// `{base}/run`
    pub fn run_url(&self) -> Url {
        self.endpoint(&["run"])
    }

    /// `{base}/status/{id}`
    pub fn status_url(&self, job: &JobHandle) -> Url {
        self.endpoint(&["status", job.as_str()])
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked in `new`: the base can take path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl GenerationApi for HttpApi {
    async fn submit(&self, request: &SubmissionRequest) -> AvatarResult<RunResponse> {
        let url = self.run_url();
        debug!(url = %url, seed = request.seed(), "POST run");

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .json(&request.body())
            .send()
            .await
            .map_err(|e| AvatarError::transport(OP_SUBMIT, Some(url.to_string()), e))?;

        read_json(OP_SUBMIT, &url, response).await
    }

    async fn status(&self, job: &JobHandle) -> AvatarResult<StatusResponse> {
        let url = self.status_url(job);
        debug!(url = %url, "GET status");

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AvatarError::transport(OP_STATUS, Some(url.to_string()), e))?;

        read_json(OP_STATUS, &url, response).await
    }
}

async fn read_json<T: DeserializeOwned>(
    operation: &str,
    url: &Url,
    response: Response,
) -> AvatarResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AvatarError::transport(operation, Some(url.to_string()), e))?;

    if !status.is_success() {
        return Err(AvatarError::api(operation, status.as_u16(), excerpt(&body)));
    }

    serde_json::from_str(&body).map_err(|e| {
        AvatarError::transport(operation, Some(url.to_string()), e)
            .with_context(format!("unexpected response body: {}", excerpt(&body)))
    })
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
