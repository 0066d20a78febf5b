//! Best-effort upload size compression.
//!
//! Keeps the upload under a byte budget and an edge limit by lowering JPEG
//! quality and, when that is not enough, shrinking the image. Never fails:
//! any error falls back to the input unchanged.

use std::io::Cursor;

use async_trait::async_trait;
use avatar_scale::cpu::scale_rgba_to_vec;
use avatar_scale::presets::{Size, build_plan};
use fast_image_resize::Resizer;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, RgbaImage};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use super::decode_oriented;
use super::pipeline::ImageStage;
use crate::config::CompressionConfig;
use crate::error::{AvatarError, AvatarResult};
use crate::selection::{MIME_JPEG, SelectedImage};

const QUALITY_STEP: u8 = 10;

/// One encoded attempt.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub size: Size,
    pub quality: u8,
}

/// Pipeline stage bounding upload size.
#[derive(Debug, Clone, Copy)]
pub struct SizeCompressor {
    config: CompressionConfig,
}

impl SizeCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// True when `bytes` is already within both bounds.
    pub fn fits(&self, bytes: &[u8]) -> bool {
        if bytes.len() > self.config.max_bytes {
            return false;
        }
        match peek_dimensions(bytes) {
            Some((w, h)) => w.max(h) <= self.config.max_edge,
            None => false,
        }
    }

    /// Smallest encoding found by the quality/shrink search.
    pub fn compress(&self, bytes: &[u8]) -> AvatarResult<Encoded> {
        let c = &self.config;
        let decoded = decode_oriented(bytes)?;
        let source = decoded.to_rgba8();
        let source_size = Size {
            w: source.width(),
            h: source.height(),
        };
        if source_size.w == 0 || source_size.h == 0 {
            return Err(AvatarError::processing("compress", "image has no pixels"));
        }

        let mut resizer = Resizer::new();
        let mut edge = c.max_edge.min(source_size.long_side());
        let mut best: Option<Encoded> = None;

        for round in 0..=c.max_rounds {
            let scaled = scale_to_edge(&mut resizer, &source, source_size, edge)?;
            let mut quality = c.initial_quality;
            loop {
                let bytes = encode_jpeg(&scaled, quality)?;
                debug!(round, edge, quality, bytes = bytes.len(), "compression attempt");
                let fits = bytes.len() <= c.max_bytes;
                let attempt = Encoded {
                    bytes,
                    size: Size {
                        w: scaled.width(),
                        h: scaled.height(),
                    },
                    quality,
                };
                if best.as_ref().is_none_or(|b| attempt.bytes.len() < b.bytes.len()) {
                    best = Some(attempt);
                }
                if fits {
                    return best.ok_or_else(|| AvatarError::processing("compress", "no attempt recorded"));
                }
                if quality <= c.min_quality {
                    break;
                }
                quality = quality.saturating_sub(QUALITY_STEP).max(c.min_quality);
            }

            let next = edge - edge / 4;
            if next == edge || next == 0 {
                break;
            }
            edge = next;
        }

        best.ok_or_else(|| AvatarError::processing("compress", "no attempt recorded"))
    }
}

#[async_trait]
impl ImageStage for SizeCompressor {
    fn name(&self) -> &'static str {
        "compress"
    }

    async fn apply(&self, image: SelectedImage) -> AvatarResult<SelectedImage> {
        if self.fits(image.bytes()) {
            debug!(bytes = image.len(), "already within bounds");
            return Ok(image);
        }

        let compressor = *self;
        let outcome = spawn_blocking(move || {
            let result = compressor.compress(image.bytes());
            (image, result)
        })
        .await;

        let (original, result) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                return Err(AvatarError::processing(
                    "compress",
                    format!("compression task failed: {}", e),
                ));
            }
        };

        match result {
            Ok(encoded) => {
                if encoded.bytes.len() > self.config.max_bytes {
                    warn!(
                        bytes = encoded.bytes.len(),
                        max_bytes = self.config.max_bytes,
                        "could not reach size budget, sending smallest attempt"
                    );
                }
                info!(
                    bytes_in = original.len(),
                    bytes_out = encoded.bytes.len(),
                    width = encoded.size.w,
                    height = encoded.size.h,
                    quality = encoded.quality,
                    "Compressed upload"
                );
                let mut out = SelectedImage::new(encoded.bytes, MIME_JPEG);
                if let Some(name) = original.renamed_for("jpg") {
                    out = out.with_name(name);
                }
                Ok(out)
            }
            Err(e) => {
                warn!(error = %e, "compression failed, sending original");
                Ok(original)
            }
        }
    }
}

fn peek_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn scale_to_edge(
    resizer: &mut Resizer,
    source: &RgbaImage,
    source_size: Size,
    edge: u32,
) -> AvatarResult<DynamicImage> {
    let plan = build_plan(source_size, edge);
    if plan.is_identity() {
        return Ok(DynamicImage::ImageRgba8(source.clone()));
    }
    let pixels = scale_rgba_to_vec(resizer, source.as_raw(), &plan)?;
    let scaled = RgbaImage::from_raw(plan.out.w, plan.out.h, pixels)
        .ok_or_else(|| AvatarError::processing("compress", "scaled buffer does not match its dimensions"))?;
    Ok(DynamicImage::ImageRgba8(scaled))
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> AvatarResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}
