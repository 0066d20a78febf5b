//! # Generation Session
//!
//! Drives one avatar generation at a time through
//! `Idle → Submitting → Polling → Completed | Failed`.
//!
//! ## Architecture
//!
//! 1. **GenerationSession**: owns the selection, the API client and the
//!    processing pipeline; `submit` runs the pipeline, posts the job and
//!    spawns the poll task
//! 2. **GenerationSessionBuilder**: fluent configuration, lets tests swap the
//!    API and pipeline
//! 3. **Poll task**: ticks every `poll_interval` (first tick one full
//!    interval after submission) until the job reaches a terminal state
//!
//! State is published on a `tokio::sync::watch` channel as a [`Snapshot`]
//! tagged with a generation number. Each submission bumps the generation and
//! cancels the previous poll task; a poll task only publishes while its
//! generation is current, so a superseded job can never overwrite state.
//! Discrete transitions are also broadcast as [`SessionEvent`]s.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    GenerationApi, HttpApi, JobHandle, JobStatus, ResultImage, SubmissionRequest, decode_output,
};
use crate::config::GeneratorConfig;
use crate::error::{AvatarError, AvatarResult, OP_STATUS};
use crate::processing::ImagePipeline;
use crate::seed::Seed;
use crate::selection::{ImageSelection, PreviewHandle, SelectedImage};

const EVENT_CAPACITY: usize = 64;

/// What went wrong, in displayable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// The one message shown to the user.
    pub message: String,
    /// Error category, see [`AvatarError::category`].
    pub category: &'static str,
    /// Full error text for logs.
    pub detail: String,
}

impl From<&AvatarError> for Failure {
    fn from(error: &AvatarError) -> Self {
        Self {
            message: error.user_message(),
            category: error.category(),
            detail: error.to_string(),
        }
    }
}

/// Where the current submission stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JobState {
    #[default]
    Idle,
    /// Preprocessing and `POST /run` in flight.
    Submitting { seed: u64 },
    /// Job accepted; `polls` status requests made so far.
    Polling {
        job: JobHandle,
        seed: u64,
        polls: u32,
    },
    Completed {
        job: JobHandle,
        seed: u64,
        result: Arc<ResultImage>,
    },
    Failed {
        job: Option<JobHandle>,
        seed: Option<u64>,
        failure: Failure,
    },
}

impl JobState {
    /// Busy indicator: true while submitting or polling.
    pub fn is_loading(&self) -> bool {
        matches!(self, JobState::Submitting { .. } | JobState::Polling { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }

    pub fn job(&self) -> Option<&JobHandle> {
        match self {
            JobState::Polling { job, .. } | JobState::Completed { job, .. } => Some(job),
            JobState::Failed { job, .. } => job.as_ref(),
            _ => None,
        }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            JobState::Idle => None,
            JobState::Submitting { seed }
            | JobState::Polling { seed, .. }
            | JobState::Completed { seed, .. } => Some(*seed),
            JobState::Failed { seed, .. } => *seed,
        }
    }

    pub fn result(&self) -> Option<&Arc<ResultImage>> {
        match self {
            JobState::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            JobState::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// State plus the submission generation that produced it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub state: JobState,
}

/// Discrete transitions, tagged with their generation.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Submitting { generation: u64, seed: u64 },
    Submitted { generation: u64, job: JobHandle, seed: u64 },
    Polled { generation: u64, job: JobHandle, status: JobStatus, polls: u32 },
    Completed { generation: u64, job: JobHandle },
    Failed { generation: u64, failure: Failure },
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    job: JobHandle,
}

/// Everything a poll task needs; moved into the spawned future.
struct PollContext {
    api: Arc<dyn GenerationApi>,
    job: JobHandle,
    seed: u64,
    generation: u64,
    interval: Duration,
    max_polls: Option<u32>,
    state_tx: Arc<watch::Sender<Snapshot>>,
    events: broadcast::Sender<SessionEvent>,
    token: CancellationToken,
}

impl PollContext {
    fn publish(&self, state: JobState) -> bool {
        publish(&self.state_tx, self.generation, state)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, error: AvatarError) {
        warn!(job = %self.job, error = %error, "Generation failed");
        let failure = Failure::from(&error);
        if self.publish(JobState::Failed {
            job: Some(self.job.clone()),
            seed: Some(self.seed),
            failure: failure.clone(),
        }) {
            self.emit(SessionEvent::Failed {
                generation: self.generation,
                failure,
            });
        }
    }
}

/// Replace the state if `generation` is still current.
fn publish(tx: &watch::Sender<Snapshot>, generation: u64, state: JobState) -> bool {
    tx.send_if_modified(move |snapshot| {
        if snapshot.generation != generation {
            return false;
        }
        snapshot.state = state;
        true
    })
}

/// One user's generation workflow.
pub struct GenerationSession {
    api: Arc<dyn GenerationApi>,
    config: GeneratorConfig,
    pipeline: ImagePipeline,
    selection: ImageSelection,
    rng: StdRng,
    generation: u64,
    last_seed: Option<u64>,
    state_tx: Arc<watch::Sender<Snapshot>>,
    events: broadcast::Sender<SessionEvent>,
    poll: Option<PollTask>,
}

impl GenerationSession {
    pub fn builder() -> GenerationSessionBuilder {
        GenerationSessionBuilder::new()
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Select an image from memory. Releases the previous preview.
    pub fn select_image(&mut self, image: SelectedImage) -> AvatarResult<&PreviewHandle> {
        self.selection.select(image)
    }

    /// Select an image file.
    pub fn select_path(&mut self, path: impl AsRef<Path>) -> AvatarResult<&PreviewHandle> {
        let image = SelectedImage::from_path(path)?;
        self.selection.select(image)
    }

    pub fn selection(&self) -> &ImageSelection {
        &self.selection
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state_tx.borrow().state.clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state_tx.subscribe()
    }

    /// Stream of discrete transitions.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state_tx.borrow().state.is_loading()
    }

    /// Job handle of the latest accepted submission.
    pub fn current_job(&self) -> Option<JobHandle> {
        self.state_tx.borrow().state.job().cloned()
    }

    /// Seed resolved for the latest submission.
    pub fn last_seed(&self) -> Option<u64> {
        self.last_seed
    }

    pub fn result(&self) -> Option<Arc<ResultImage>> {
        self.state_tx.borrow().state.result().cloned()
    }

    /// Start a new submission, superseding any in flight.
    ///
    /// Returns once the job is accepted and polling has started; use
    /// [`wait_for_terminal`](Self::wait_for_terminal) for the outcome. On
    /// error the state is already `Failed`.
    pub async fn submit(&mut self) -> AvatarResult<JobHandle> {
        self.cancel_poll();
        let generation = self.generation;

        let Some(image) = self.selection.image().cloned() else {
            return Err(self.fail(None, None, AvatarError::no_image_selected()));
        };

        let seed = match Seed::from_raw(self.config.generation.seed) {
            Ok(seed) => seed.resolve(&mut self.rng),
            Err(e) => return Err(self.fail(None, None, e)),
        };
        self.last_seed = Some(seed);
        self.publish(JobState::Submitting { seed });
        self.emit(SessionEvent::Submitting { generation, seed });
        info!(generation, seed, bytes = image.len(), mime = image.mime(), "Submitting image");

        let processed = match self.pipeline.run(image).await {
            Ok(processed) => processed,
            Err(e) => return Err(self.fail(None, Some(seed), e)),
        };
        if let Err(e) = self.selection.replace_preview(&processed) {
            warn!(error = %e, "Could not refresh preview");
        }

        let request = SubmissionRequest::new(&processed, self.config.to_generation_params(seed));
        let response = match self.api.submit(&request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(None, Some(seed), e)),
        };
        let job = response.id;
        if response.status.is_failure() {
            let error = AvatarError::processing("run", format!("job rejected with status {}", response.status));
            return Err(self.fail(Some(job), Some(seed), error));
        }

        info!(generation, job = %job, seed, status = %response.status, "Job accepted");
        self.publish(JobState::Polling {
            job: job.clone(),
            seed,
            polls: 0,
        });
        self.emit(SessionEvent::Submitted {
            generation,
            job: job.clone(),
            seed,
        });
        self.spawn_poll(job.clone(), seed);
        Ok(job)
    }

    /// Wait until the current submission is terminal and return that state.
    /// Returns immediately when idle.
    pub async fn wait_for_terminal(&self) -> JobState {
        let generation = self.generation;
        let mut rx = self.state_tx.subscribe();
        let snapshot = rx
            .wait_for(|s| s.generation != generation || !s.state.is_loading())
            .await
            .map(|s| s.state.clone());
        snapshot.unwrap_or_else(|_| self.state())
    }

    /// Cancel polling, wait for the task to stop and release the preview.
    /// The session returns to `Idle` under a fresh generation.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.poll.take() {
            debug!(job = %task.job, "Stopping poll task");
            task.token.cancel();
            let _ = task.handle.await;
        }
        self.cancel_poll();
        if let Err(e) = self.selection.clear() {
            warn!(error = %e, "Could not release preview");
        }
    }

    fn publish(&self, state: JobState) -> bool {
        publish(&self.state_tx, self.generation, state)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, job: Option<JobHandle>, seed: Option<u64>, error: AvatarError) -> AvatarError {
        warn!(generation = self.generation, error = %error, "Submission failed");
        let failure = Failure::from(&error);
        self.publish(JobState::Failed {
            job,
            seed,
            failure: failure.clone(),
        });
        self.emit(SessionEvent::Failed {
            generation: self.generation,
            failure,
        });
        error
    }

    /// Stop any poll task and publish `Idle` under a fresh generation, so
    /// late results from the old task are discarded and waiters wake up.
    fn cancel_poll(&mut self) {
        if let Some(task) = self.poll.take() {
            debug!(job = %task.job, "Cancelling superseded poll task");
            task.token.cancel();
            task.handle.abort();
        }
        self.generation += 1;
        self.state_tx.send_replace(Snapshot {
            generation: self.generation,
            state: JobState::Idle,
        });
    }

    fn spawn_poll(&mut self, job: JobHandle, seed: u64) {
        let token = CancellationToken::new();
        let ctx = PollContext {
            api: Arc::clone(&self.api),
            job: job.clone(),
            seed,
            generation: self.generation,
            interval: self.config.api.poll_interval,
            max_polls: self.config.api.max_polls,
            state_tx: Arc::clone(&self.state_tx),
            events: self.events.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(poll_job(ctx));
        self.poll = Some(PollTask { token, handle, job });
    }
}

impl Drop for GenerationSession {
    fn drop(&mut self) {
        self.cancel_poll();
    }
}

impl std::fmt::Debug for GenerationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSession")
            .field("generation", &self.generation)
            .field("state", &self.state())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

async fn poll_job(ctx: PollContext) {
    let mut ticker = interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u32 = 0;

    loop {
        tokio::select! {
            _ = ctx.token.cancelled() => {
                debug!(job = %ctx.job, "Poll task cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let response = tokio::select! {
            _ = ctx.token.cancelled() => return,
            response = ctx.api.status(&ctx.job) => response,
        };
        polls += 1;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                ctx.fail(e.with_operation(OP_STATUS));
                return;
            }
        };
        debug!(job = %ctx.job, status = %response.status, polls, "Polled status");
        ctx.emit(SessionEvent::Polled {
            generation: ctx.generation,
            job: ctx.job.clone(),
            status: response.status.clone(),
            polls,
        });

        if response.status.is_completed() {
            match response.output.as_ref().map(decode_output).transpose() {
                Ok(Some(Some(result))) => {
                    info!(job = %ctx.job, bytes = result.bytes().len(), format = ?result.format(), "Generation completed");
                    if ctx.publish(JobState::Completed {
                        job: ctx.job.clone(),
                        seed: ctx.seed,
                        result: Arc::new(result),
                    }) {
                        ctx.emit(SessionEvent::Completed {
                            generation: ctx.generation,
                            job: ctx.job.clone(),
                        });
                    }
                    return;
                }
                Ok(_) => debug!(job = %ctx.job, "Completed without an image yet"),
                Err(e) => {
                    ctx.fail(e);
                    return;
                }
            }
        } else if response.status.is_failure() {
            let mut error = AvatarError::processing(
                "remote job",
                format!("job {} ended with status {}", ctx.job, response.status),
            );
            if let Some(detail) = response.error.as_ref() {
                error = error.with_context(detail.to_string());
            }
            ctx.fail(error);
            return;
        }

        if ctx.max_polls.is_some_and(|max| polls >= max) {
            let waited = ctx.interval.saturating_mul(polls);
            ctx.fail(AvatarError::timeout(OP_STATUS, waited.as_millis() as u64));
            return;
        }

        if !ctx.publish(JobState::Polling {
            job: ctx.job.clone(),
            seed: ctx.seed,
            polls,
        }) {
            return;
        }
    }
}

/// Builder for [`GenerationSession`].
#[derive(Default)]
pub struct GenerationSessionBuilder {
    config: Option<GeneratorConfig>,
    api: Option<Arc<dyn GenerationApi>>,
    pipeline: Option<ImagePipeline>,
    rng_seed: Option<u64>,
}

impl GenerationSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this API instead of the HTTP client built from the config.
    pub fn with_api(mut self, api: Arc<dyn GenerationApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Use this pipeline instead of [`ImagePipeline::standard`].
    pub fn with_pipeline(mut self, pipeline: ImagePipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Deterministic random-seed draws.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> AvatarResult<GenerationSession> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|reason| AvatarError::config("config", "", reason))?;

        let api = match self.api {
            Some(api) => api,
            None => Arc::new(HttpApi::new(&config.api)?),
        };
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| ImagePipeline::standard(&config));
        let rng = self
            .rng_seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let (state_tx, _) = watch::channel(Snapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(GenerationSession {
            api,
            config,
            pipeline,
            selection: ImageSelection::new(),
            rng,
            generation: 0,
            last_seed: None,
            state_tx: Arc::new(state_tx),
            events,
            poll: None,
        })
    }
}
