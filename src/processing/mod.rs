//! # Processing Module
//!
//! Pre-upload image stages. A submission runs the selected image through an
//! [`ImagePipeline`]: HEIC normalization, center crop, then size compression.

pub mod compress;
pub mod crop;
pub mod normalize;
pub mod pipeline;

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};

use crate::error::{AvatarError, AvatarResult};

pub use compress::SizeCompressor;
pub use crop::{CenterCrop, center_crop_image};
pub use normalize::{CommandConverter, HeicConverter, HeicNormalizer};
pub use pipeline::{ImagePipeline, ImageStage};

/// Decode an encoded image with its EXIF orientation applied, so pixel
/// dimensions match what a viewer shows.
pub fn decode_oriented(bytes: &[u8]) -> AvatarResult<DynamicImage> {
    decode_with_orientation(bytes).map(|(image, _)| image)
}

/// Like [`decode_oriented`], also returning the orientation the decoder
/// reported. `Orientation::NoTransforms` means the stored pixels are
/// already upright.
pub fn decode_with_orientation(bytes: &[u8]) -> AvatarResult<(DynamicImage, Orientation)> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AvatarError::io("sniff image format", e))?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok((image, orientation))
}

/// Encode as PNG.
pub fn encode_png(image: &DynamicImage) -> AvatarResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}
