//! Center-crop to a square.

use async_trait::async_trait;
use avatar_scale::crop::center_crop_rgba;
use avatar_scale::presets::Size;
use image::metadata::Orientation;
use image::{DynamicImage, RgbaImage};
use tokio::task::spawn_blocking;
use tracing::debug;

use super::pipeline::ImageStage;
use super::{decode_with_orientation, encode_png};
use crate::error::{AvatarError, AvatarResult};
use crate::selection::{MIME_PNG, SelectedImage};

/// Largest centered square of `image`. Side is `min(width, height)`; the
/// offset along the longer axis is `(long - short) / 2`, rounded down.
pub fn center_crop_image(image: &DynamicImage) -> AvatarResult<DynamicImage> {
    let rgba = image.to_rgba8();
    let size = Size {
        w: rgba.width(),
        h: rgba.height(),
    };
    let (rect, pixels) = center_crop_rgba(rgba.as_raw(), size)?;
    let square = RgbaImage::from_raw(rect.side, rect.side, pixels).ok_or_else(|| {
        AvatarError::processing("center crop", "cropped buffer does not match its dimensions")
    })?;
    Ok(DynamicImage::ImageRgba8(square))
}

/// Pipeline stage: upright square inputs pass through byte-for-byte. Anything
/// else is rotated per EXIF, cropped if needed and re-encoded as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct CenterCrop;

#[async_trait]
impl ImageStage for CenterCrop {
    fn name(&self) -> &'static str {
        "center-crop"
    }

    async fn apply(&self, image: SelectedImage) -> AvatarResult<SelectedImage> {
        spawn_blocking(move || crop_selected(image))
            .await
            .map_err(|e| AvatarError::processing("center crop", format!("crop task failed: {}", e)))?
    }
}

fn crop_selected(image: SelectedImage) -> AvatarResult<SelectedImage> {
    let (decoded, orientation) = decode_with_orientation(image.bytes())
        .map_err(|e| e.with_context("decoding image for center crop"))?;
    let (w, h) = (decoded.width(), decoded.height());
    if w == 0 || h == 0 {
        return Err(AvatarError::processing("center crop", "image has no pixels"));
    }
    let upright = orientation == Orientation::NoTransforms;
    if w == h && upright {
        debug!(side = w, "already square");
        return Ok(image);
    }

    // Re-encoding drops the EXIF tag, so rotated pixels must be baked in
    // even when no crop is needed.
    let square = if w == h {
        debug!(side = w, ?orientation, "baking in EXIF orientation");
        decoded
    } else {
        let square = center_crop_image(&decoded)?;
        debug!(from_w = w, from_h = h, side = square.width(), "center cropped");
        square
    };
    let mut out = SelectedImage::new(encode_png(&square)?, MIME_PNG);
    if let Some(name) = image.renamed_for("png") {
        out = out.with_name(name);
    }
    Ok(out)
}
