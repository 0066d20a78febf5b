//! # Avatar Forge
//!
//! Turns a user photo into a generated avatar through a remote inference API.
//!
//! ## Architecture
//!
//! - `selection`: the chosen image and its temporary preview
//! - `processing`: HEIC normalization, center crop and size compression
//! - `api`: wire types, the HTTP client and result decoding
//! - `seed`: the `-1` = random seed policy
//! - `session`: the submit/poll state machine
//! - `config`: API and generation settings
//! - `error`: error taxonomy and user-facing messages
//!
//! ## Example
//!
//! ```rust,no_run
//! use avatar_forge::{config::GeneratorConfig, generate_avatar};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GeneratorConfig::from_env()?;
//! let outcome = generate_avatar(config, "me.heic").await?;
//! outcome.result.save(format!("avatar.{}", outcome.result.extension()))?;
//! println!("seed {}", outcome.seed);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod processing;
pub mod seed;
pub mod selection;
pub mod session;

pub use api::{GenerationApi, HttpApi, JobHandle, JobStatus, ResultImage};
pub use error::{AvatarError, AvatarResult, HasRecoverySuggestion};
pub use seed::{RANDOM_SEED, Seed};
pub use selection::SelectedImage;
pub use session::{GenerationSession, JobState, SessionEvent, Snapshot};

/// A finished generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub job: JobHandle,
    pub seed: u64,
    pub result: Arc<ResultImage>,
}

/// Run one submission for the image at `path` and wait for the result.
pub async fn generate_avatar(
    config: config::GeneratorConfig,
    path: impl AsRef<Path>,
) -> AvatarResult<GenerationOutcome> {
    let mut session = GenerationSession::builder().with_config(config).build()?;
    let outcome = run_session(&mut session, path.as_ref()).await;
    session.shutdown().await;
    outcome
}

/// Select `path` on an existing session, submit and wait.
pub async fn run_session(
    session: &mut GenerationSession,
    path: &Path,
) -> AvatarResult<GenerationOutcome> {
    session.select_path(path)?;
    session.submit().await?;

    match session.wait_for_terminal().await {
        JobState::Completed { job, seed, result } => Ok(GenerationOutcome { job, seed, result }),
        JobState::Failed { failure, job, .. } => {
            let mut error = AvatarError::generation(failure.message, failure.detail)
                .with_metadata("category", failure.category);
            if let Some(job) = job {
                error = error.with_metadata("job", job.to_string());
            }
            Err(error)
        }
        other => Err(AvatarError::processing(
            "generation",
            format!("session stopped in state {:?}", other),
        )),
    }
}
