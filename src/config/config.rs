//! # Generator Configuration
//!
//! Configuration structures and validation for avatar generation. This is the
//! common interface between the CLI and the library: the CLI fills a
//! [`GeneratorConfig`], validates it, and hands it to a session.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Range | Description |
//! |-----------|------|-------|-------------|
//! | `api.base_url` | `String` | `http(s)://…` | Inference API root, no trailing slash |
//! | `api.api_key` | `String` | non-empty | Bearer token |
//! | `api.poll_interval` | `Duration` | > 0 | Status poll period (5 s) |
//! | `api.max_polls` | `Option<u32>` | ≥ 1 | Give up after this many ticks |
//! | `generation.width/height` | `u32` | 64-2048 | Requested output size |
//! | `generation.num_inference_steps` | `u32` | 1-150 | Diffusion steps |
//! | `generation.guidance_scale` | `f32` | > 0 | Prompt adherence |
//! | `generation.low/high_threshold` | `u32` | 0-255, low < high | Edge detector thresholds |
//! | `generation.seed` | `i64` | -1 or ≥ 0 | -1 draws a random seed per submission |
//! | `compression.*` | | | Upload size bounds, see [`CompressionConfig`] |
//!
//! The base URL and token normally come from the environment
//! ([`ENV_API_BASE_URL`], [`ENV_API_KEY`]).
//!
//! ## Examples
//!
//! ```rust
//! use avatar_forge::config::GeneratorConfig;
//!
//! let mut config = GeneratorConfig::default();
//! config.api.base_url = "https://api.example.com/v2/avatar".to_string();
//! config.api.api_key = "secret".to_string();
//! assert!(config.validate().is_ok());
//!
//! let params = config.to_generation_params(42);
//! assert_eq!(params.seed, 42);
//! ```

use std::time::Duration;

use avatar_scale::presets::CompressionPreset;

use crate::api::types::GenerationParams;
use crate::error::{AvatarError, AvatarResult};
use crate::seed::RANDOM_SEED;

/// Environment variable holding the API root URL.
pub const ENV_API_BASE_URL: &str = "AVATAR_API_BASE_URL";
/// Environment variable holding the bearer token.
pub const ENV_API_KEY: &str = "AVATAR_API_KEY";

const DEFAULT_PROMPT: &str = "(RAW PHOTO), (black domino mask:2), (superhero:2), (laser eyes:5), good looking, (blue, purple, red neon background colors:0.8), (high detailed skin:1.2), (8k uhd, dslr, soft lighting, high quality, film grain, Fujifilm XT3:2)";

const DEFAULT_NEGATIVE_PROMPT: &str = "face mask, covered nose, whole face mask, ugly mask, ((background colors on subject)), ((bad lighting, dim lighting)), ((nsfw)), ((covered nose)), ((face paint)), weird eyes, ugly, windows, canvas frame, cartoon, 3d, ((disfigured)), ((bad art)), ((deformed)),((extra limbs)),((close up)),((b&w, black and white)), weird colors, blurry, (((duplicate))), ((morbid)), ((mutilated)), [out of frame], extra fingers, mutated hands, ((poorly drawn hands)), ((poorly drawn face)), (((mutation))), (((deformed))), blurry, ((bad anatomy)), (((bad proportions))), ((extra limbs)), cloned face, (((disfigured))), out of frame, extra limbs, (bad anatomy), gross proportions, (malformed limbs), ((missing arms)), ((missing legs)), (((extra arms))), (((extra legs))), mutated hands, (fused fingers), (too many fingers), (((long neck))), Photoshop, video game, tiling, poorly drawn hands, poorly drawn feet, poorly drawn face, out of frame, mutation, mutated, extra limbs, extra legs, extra arms, disfigured, deformed, cross-eye, body out of frame, blurry, bad art, bad anatomy, 3d render";

/// Connection settings for the inference API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API root; `/run` and `/status/{id}` are appended.
    pub base_url: String,

    /// Bearer token sent with every request.
    pub api_key: String,

    /// Time between status polls. The first poll happens one full interval
    /// after submission.
    pub poll_interval: Duration,

    /// Optional bound on the number of status polls.
    pub max_polls: Option<u32>,

    /// Per-request timeout for both endpoints.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            poll_interval: Duration::from_secs(5),
            max_polls: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Base URL without trailing slashes.
    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Prompt and sampler parameters sent with each submission.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub low_threshold: u32,
    pub high_threshold: u32,
    pub guidance_scale: f32,
    /// `-1` means "draw a fresh random seed on every submission".
    pub seed: i64,
    pub num_images: Option<u32>,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            width: 512,
            height: 512,
            num_inference_steps: 30,
            low_threshold: 100,
            high_threshold: 200,
            guidance_scale: 10.0,
            seed: RANDOM_SEED,
            num_images: None,
        }
    }
}

/// Bounds and tuning for the upload size compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Encoded upload must not exceed this many bytes (best effort).
    pub max_bytes: usize,
    /// Longest edge of the upload in pixels.
    pub max_edge: u32,
    /// JPEG quality of the first attempt.
    pub initial_quality: u8,
    /// Lowest JPEG quality tried before shrinking dimensions.
    pub min_quality: u8,
    /// Number of shrink rounds after the quality floor is hit.
    pub max_rounds: u32,
}

impl CompressionConfig {
    /// Bounds taken from a named preset, default tuning.
    pub fn from_preset(preset: CompressionPreset) -> Self {
        Self {
            max_bytes: preset.max_bytes(),
            max_edge: preset.max_edge(),
            ..Self::default()
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        let preset = CompressionPreset::default();
        Self {
            max_bytes: preset.max_bytes(),
            max_edge: preset.max_edge(),
            initial_quality: 90,
            min_quality: 40,
            max_rounds: 4,
        }
    }
}

/// External HEIC/HEIF converter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Program to run; called as `<program> [args…] <input> <output.jpg>`.
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "heif-convert".to_string(),
            args: vec!["-q".to_string(), "92".to_string()],
        }
    }
}

/// Full configuration for a generation session.
#[derive(Debug, Clone, Default)]
pub struct GeneratorConfig {
    pub api: ApiConfig,
    pub generation: GenerationDefaults,
    pub compression: CompressionConfig,
    pub converter: ConverterConfig,
}

impl GeneratorConfig {
    /// Creates a configuration for the given endpoint with default
    /// generation, compression and converter settings.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.into(),
                api_key: api_key.into(),
                ..ApiConfig::default()
            },
            ..Self::default()
        }
    }

    /// Read the endpoint and token from [`ENV_API_BASE_URL`] and [`ENV_API_KEY`].
    pub fn from_env() -> AvatarResult<Self> {
        let base_url = std::env::var(ENV_API_BASE_URL)
            .map_err(|_| AvatarError::config(ENV_API_BASE_URL, "", "environment variable not set"))?;
        let api_key = std::env::var(ENV_API_KEY)
            .map_err(|_| AvatarError::config(ENV_API_KEY, "", "environment variable not set"))?;
        Ok(Self::new(base_url, api_key))
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.api.trimmed_base_url();
        if url.is_empty() {
            return Err(format!("API base URL must be set (use {})", ENV_API_BASE_URL));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("API base URL must start with http:// or https:// (got {})", url));
        }
        if self.api.api_key.trim().is_empty() {
            return Err(format!("API key must be set (use {})", ENV_API_KEY));
        }
        if self.api.poll_interval.is_zero() {
            return Err("Poll interval must be greater than 0".to_string());
        }
        if self.api.max_polls == Some(0) {
            return Err("Max polls must be at least 1 when set".to_string());
        }

        let g = &self.generation;
        if !(64..=2048).contains(&g.width) || !(64..=2048).contains(&g.height) {
            return Err("Width and height must be between 64 and 2048".to_string());
        }
        if !(1..=150).contains(&g.num_inference_steps) {
            return Err("Inference steps must be between 1 and 150".to_string());
        }
        if !(g.guidance_scale > 0.0 && g.guidance_scale.is_finite()) {
            return Err("Guidance scale must be a positive number".to_string());
        }
        if g.low_threshold >= g.high_threshold || g.high_threshold > 255 {
            return Err("Edge thresholds must satisfy low < high <= 255".to_string());
        }
        if g.seed < RANDOM_SEED {
            return Err(format!("Seed must be -1 (random) or non-negative (got {})", g.seed));
        }
        if g.num_images == Some(0) {
            return Err("Image count must be at least 1 when set".to_string());
        }

        let c = &self.compression;
        if c.max_bytes == 0 || c.max_edge == 0 {
            return Err("Compression bounds must be greater than 0".to_string());
        }
        if !(1..=100).contains(&c.initial_quality) || c.min_quality == 0 || c.min_quality > c.initial_quality {
            return Err("Compression quality must satisfy 1 <= min <= initial <= 100".to_string());
        }
        if self.converter.program.trim().is_empty() {
            return Err("HEIC converter program must be set".to_string());
        }
        Ok(())
    }

    /// Build the request parameters for one submission with an already
    /// resolved seed.
    pub fn to_generation_params(&self, seed: u64) -> GenerationParams {
        let g = &self.generation;
        GenerationParams {
            prompt: g.prompt.clone(),
            negative_prompt: g.negative_prompt.clone(),
            width: g.width,
            height: g.height,
            num_inference_steps: g.num_inference_steps,
            low_threshold: g.low_threshold,
            high_threshold: g.high_threshold,
            guidance_scale: g.guidance_scale,
            seed,
            num_images: g.num_images,
        }
    }
}
