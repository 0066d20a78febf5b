//! HEIC/HEIF normalization.
//!
//! HEIC photos are converted to JPEG by an external program before anything
//! else touches them; every other accepted type passes through unchanged.
//! Conversion failures abort the submission and are not retried.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use super::pipeline::ImageStage;
use crate::config::ConverterConfig;
use crate::error::{AvatarError, AvatarResult};
use crate::selection::{MIME_JPEG, SelectedImage, is_heic_mime, sniff_mime};

/// Longest stderr excerpt kept in a conversion error.
const STDERR_EXCERPT: usize = 400;

/// Turns HEIC/HEIF bytes into JPEG bytes. Called on a blocking thread.
pub trait HeicConverter: Send + Sync {
    /// Name used in errors and logs.
    fn name(&self) -> &str;

    fn convert(&self, heic: &[u8]) -> AvatarResult<Vec<u8>>;
}

/// Runs `<program> [args…] <input.heic> <output.jpg>` in a scratch directory.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn run(&self, input: &Path, output: &Path) -> AvatarResult<()> {
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                let reason = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("program not found: {}", e)
                } else {
                    format!("failed to start: {}", e)
                };
                AvatarError::conversion(&self.program, reason)
                    .with_recovery_suggestion("Install libheif's heif-convert or pass --heic-converter")
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(AvatarError::conversion(
                &self.program,
                format!("exited with {}: {}", result.status, stderr),
            ));
        }
        Ok(())
    }
}

impl HeicConverter for CommandConverter {
    fn name(&self) -> &str {
        &self.program
    }

    fn convert(&self, heic: &[u8]) -> AvatarResult<Vec<u8>> {
        let dir = tempfile::tempdir().map_err(|e| AvatarError::io("create conversion dir", e))?;
        let input = dir.path().join("input.heic");
        let output = dir.path().join("output.jpg");
        std::fs::write(&input, heic).map_err(|e| AvatarError::io_at("write conversion input", &input, e))?;

        self.run(&input, &output)?;

        let jpeg = std::fs::read(&output).map_err(|e| {
            AvatarError::conversion(&self.program, format!("no output produced: {}", e))
        })?;
        if jpeg.is_empty() {
            return Err(AvatarError::conversion(&self.program, "produced an empty file"));
        }
        Ok(jpeg)
    }
}

/// Pipeline stage that converts HEIC/HEIF input and passes everything else through.
#[derive(Clone)]
pub struct HeicNormalizer {
    converter: Arc<dyn HeicConverter>,
}

impl HeicNormalizer {
    pub fn new(converter: impl HeicConverter + 'static) -> Self {
        Self {
            converter: Arc::new(converter),
        }
    }
}

#[async_trait]
impl ImageStage for HeicNormalizer {
    fn name(&self) -> &'static str {
        "heic-normalize"
    }

    async fn apply(&self, image: SelectedImage) -> AvatarResult<SelectedImage> {
        if !image.is_heic() {
            debug!(mime = image.mime(), "not HEIC, skipping conversion");
            return Ok(image);
        }

        let converter = Arc::clone(&self.converter);
        let tool = converter.name().to_string();
        let name = image.renamed_for("jpg");
        let input_len = image.len();

        let converted = spawn_blocking(move || converter.convert(image.bytes()))
            .await
            .map_err(|e| AvatarError::conversion(&tool, format!("conversion task failed: {}", e)))??;

        // Trust the bytes over the program's claims.
        let mime = match sniff_mime(&converted) {
            Some(m) if !is_heic_mime(m) => m,
            _ => {
                return Err(AvatarError::conversion(
                    &tool,
                    "output is not a decodable JPEG/PNG image",
                ));
            }
        };
        if mime != MIME_JPEG {
            debug!(mime, "converter produced a non-JPEG rendition");
        }

        info!(tool = %tool, bytes_in = input_len, bytes_out = converted.len(), "Converted HEIC image");
        let mut out = SelectedImage::new(converted, mime);
        if let Some(name) = name {
            out = out.with_name(name);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::encode_png;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        encode_png(&image::DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn jpeg_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    struct FakeConverter(Vec<u8>);

    impl HeicConverter for FakeConverter {
        fn name(&self) -> &str {
            "fake"
        }

        fn convert(&self, _heic: &[u8]) -> AvatarResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenConverter;

    impl HeicConverter for BrokenConverter {
        fn name(&self) -> &str {
            "broken"
        }

        fn convert(&self, _heic: &[u8]) -> AvatarResult<Vec<u8>> {
            Err(AvatarError::conversion("broken", "exit status 1"))
        }
    }

    fn heic() -> SelectedImage {
        SelectedImage::new(b"\0\0\0\x18ftypheic....".to_vec(), "image/heic").with_name("IMG_0001.HEIC")
    }

    #[tokio::test]
    async fn heic_is_converted_to_jpeg() {
        let stage = HeicNormalizer::new(FakeConverter(jpeg_bytes()));
        let out = stage.apply(heic()).await.unwrap();
        assert_eq!(out.mime(), MIME_JPEG);
        assert_eq!(out.name(), Some("IMG_0001.jpg"));
    }

    #[tokio::test]
    async fn non_heic_passes_through() {
        let stage = HeicNormalizer::new(BrokenConverter);
        let png = SelectedImage::new(png_bytes(), "image/png");
        let out = stage.apply(png.clone()).await.unwrap();
        assert_eq!(out, png);
    }

    #[tokio::test]
    async fn converter_failure_aborts() {
        let stage = HeicNormalizer::new(BrokenConverter);
        let err = stage.apply(heic()).await.unwrap_err();
        assert_eq!(err.category(), "conversion");
    }

    #[tokio::test]
    async fn undecodable_output_is_rejected() {
        let stage = HeicNormalizer::new(FakeConverter(b"not an image".to_vec()));
        let err = stage.apply(heic()).await.unwrap_err();
        assert_eq!(err.category(), "conversion");
    }

    #[test]
    fn missing_program_is_a_conversion_error() {
        let converter = CommandConverter::new("definitely-not-a-real-heic-tool", vec![]);
        let err = converter.convert(b"heic").unwrap_err();
        assert_eq!(err.category(), "conversion");
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn command_receives_input_and_output_paths() {
        // `cp <input> <output>` stands in for a real converter.
        let converter = CommandConverter::new("cp", vec![]);
        let png = png_bytes();
        assert_eq!(converter.convert(&png).unwrap(), png);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_reported() {
        let converter = CommandConverter::new("false", vec![]);
        let err = converter.convert(b"heic").unwrap_err();
        assert_eq!(err.category(), "conversion");
        assert!(err.to_string().contains("exited with"));
    }
}
