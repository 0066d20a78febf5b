use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use avatar_forge::config::{CompressionConfig, ENV_API_BASE_URL, ENV_API_KEY, GeneratorConfig};
use avatar_forge::{AvatarError, GenerationSession, RANDOM_SEED, logging, run_session};
use avatar_scale::presets::CompressionPreset;
use clap::Parser;

/// Turn a photo into a generated avatar.
#[derive(Parser, Debug)]
#[command(name = "avatar")]
#[command(version, about)]
#[command(long_about = "Crop, compress and upload a photo (JPEG, PNG or HEIC) to the avatar
inference API, poll until the job finishes and save the generated image.")]
struct Args {
    /// Input photo
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Where to write the result (default: avatar.<ext> in the current directory)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Inference API root URL
    #[arg(long, env = ENV_API_BASE_URL)]
    api_url: String,

    /// Bearer token for the API
    #[arg(long, env = ENV_API_KEY, hide_env_values = true)]
    api_key: String,

    /// Seed; -1 picks a fresh random seed
    #[arg(long, default_value_t = RANDOM_SEED, allow_negative_numbers = true)]
    seed: i64,

    /// Override the prompt
    #[arg(long)]
    prompt: Option<String>,

    /// Override the negative prompt
    #[arg(long)]
    negative_prompt: Option<String>,

    /// Diffusion steps
    #[arg(long)]
    steps: Option<u32>,

    /// Guidance scale
    #[arg(long)]
    guidance: Option<f32>,

    /// Output width and height in pixels
    #[arg(long)]
    size: Option<u32>,

    /// Number of images to request
    #[arg(long)]
    num_images: Option<u32>,

    /// Upload size preset
    #[arg(long, value_enum, default_value_t = CompressionPreset::Medium,
          help = "Upload size preset: small (512 KiB, 512 px), medium (1 MiB, 1024 px), large (2 MiB, 1920 px)")]
    preset: CompressionPreset,

    /// Time between status polls
    #[arg(long, default_value = "5s", help = "Time between status polls: 500ms, 5s, 1m")]
    poll_interval: String,

    /// Give up after this many status polls
    #[arg(long)]
    max_polls: Option<u32>,

    /// Program used to convert HEIC/HEIF photos to JPEG
    #[arg(long, value_name = "PROGRAM")]
    heic_converter: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    if let Err(err) = run(args).await {
        tracing::error!("{err:#}");
        match err.downcast_ref::<AvatarError>() {
            Some(avatar) => eprintln!("{}", avatar.user_message()),
            None => eprintln!("{err}"),
        }
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;

    let mut session = GenerationSession::builder().with_config(config).build()?;
    let outcome = run_session(&mut session, &args.input).await;
    session.shutdown().await;
    let outcome = outcome?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("avatar.{}", outcome.result.extension())));
    outcome
        .result
        .save(&output)
        .with_context(|| format!("Failed to save result to {}", output.display()))?;

    for (i, extra) in outcome.result.extra().iter().enumerate() {
        let path = numbered(&output, i + 2);
        std::fs::write(&path, extra)
            .with_context(|| format!("Failed to save result to {}", path.display()))?;
    }

    println!("Saved {} (job {}, seed {})", output.display(), outcome.job, outcome.seed);
    Ok(())
}

fn build_config(args: &Args) -> Result<GeneratorConfig> {
    let mut config = GeneratorConfig::new(args.api_url.clone(), args.api_key.clone());
    config.api.poll_interval = parse_duration(&args.poll_interval)?;
    config.api.max_polls = args.max_polls;

    let generation = &mut config.generation;
    generation.seed = args.seed;
    if let Some(prompt) = &args.prompt {
        generation.prompt = prompt.clone();
    }
    if let Some(negative) = &args.negative_prompt {
        generation.negative_prompt = negative.clone();
    }
    if let Some(steps) = args.steps {
        generation.num_inference_steps = steps;
    }
    if let Some(guidance) = args.guidance {
        generation.guidance_scale = guidance;
    }
    if let Some(size) = args.size {
        generation.width = size;
        generation.height = size;
    }
    generation.num_images = args.num_images;

    config.compression = CompressionConfig::from_preset(args.preset);
    if let Some(program) = &args.heic_converter {
        config.converter.program = program.clone();
    }
    Ok(config)
}

/// `avatar.png` -> `avatar-2.png`
fn numbered(path: &std::path::Path, n: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("avatar");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{n}.{ext}"),
        None => format!("{stem}-{n}"),
    };
    path.with_file_name(name)
}

/// Parse duration string like "500ms", "5s", "2m", "1h"; bare numbers are seconds
fn parse_duration(duration: &str) -> Result<Duration> {
    let duration = duration.trim();
    if let Ok(seconds) = duration.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    if let Some(ms) = duration.strip_suffix("ms") {
        let ms: u64 = ms
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid number in duration: {}", ms))?;
        return Ok(Duration::from_millis(ms));
    }

    let len = duration.len();
    if len < 2 {
        return Err(anyhow::anyhow!("Invalid duration format: {}", duration));
    }

    let (num_str, unit) = duration.split_at(len - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid number in duration: {}", num_str))?;

    match unit {
        "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 3600)),
        _ => Err(anyhow::anyhow!(
            "Invalid duration unit: {}. Use 'ms', 's', 'm' or 'h'",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn args_map_onto_config() {
        let args = Args::try_parse_from([
            "avatar",
            "me.png",
            "--api-url",
            "https://api.example.com/v2/x/",
            "--api-key",
            "k",
            "--seed",
            "-1",
            "--size",
            "768",
            "--preset",
            "small",
            "--poll-interval",
            "2s",
        ])
        .unwrap();
        let config = build_config(&args).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.seed, RANDOM_SEED);
        assert_eq!(config.generation.width, 768);
        assert_eq!(config.compression.max_edge, 512);
        assert_eq!(config.api.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn extra_outputs_are_numbered() {
        assert_eq!(numbered(std::path::Path::new("out/a.png"), 2), PathBuf::from("out/a-2.png"));
    }
}
