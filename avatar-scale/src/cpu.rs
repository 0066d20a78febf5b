// SPDX-License-Identifier: MIT
// CPU scaler built on fast_image_resize (SIMD-accelerated).
// RGBA8 in → RGBA8 out, direct write into caller-provided dst buffer.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{ResizeAlg, ResizeOptions, Resizer};

use crate::presets::ScalePlan;

#[derive(Debug)]
pub enum ScaleError {
    EmptyImage,
    BufferTooSmall { needed: usize, got: usize },
    RegionOutOfBounds,
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::EmptyImage => write!(f, "Image has zero width or height"),
            ScaleError::BufferTooSmall { needed, got } => {
                write!(f, "Buffer too small: need {} bytes, got {}", needed, got)
            }
            ScaleError::RegionOutOfBounds => write!(f, "Crop region lies outside the source image"),
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

/// Downscale a tightly packed RGBA8 buffer according to `plan`.
/// `dst` must hold at least `plan.out.w * plan.out.h * 4` bytes.
/// An identity plan is a plain copy.
pub fn scale_rgba_cpu(
    resizer: &mut Resizer,
    src_rgba: &[u8],
    plan: &ScalePlan,
    dst: &mut [u8],
) -> Result<(), ScaleError> {
    let src = plan.input;
    if src.w == 0 || src.h == 0 {
        return Err(ScaleError::EmptyImage);
    }
    let src_len = src.rgba_len();
    if src_rgba.len() < src_len {
        return Err(ScaleError::BufferTooSmall { needed: src_len, got: src_rgba.len() });
    }
    let dst_len = plan.out.rgba_len();
    if dst.len() < dst_len {
        return Err(ScaleError::BufferTooSmall { needed: dst_len, got: dst.len() });
    }

    if plan.is_identity() {
        dst[..dst_len].copy_from_slice(&src_rgba[..src_len]);
        return Ok(());
    }

    let src_view = TypedImageRef::<U8x4>::from_buffer(src.w, src.h, &src_rgba[..src_len])?;
    let mut dst_image = TypedImage::<U8x4>::from_buffer(plan.out.w, plan.out.h, &mut dst[..dst_len])?;

    // Photos are opaque after decode; alpha premultiplication would only cost time.
    let opts = ResizeOptions::new()
        .resize_alg(ResizeAlg::Convolution(fir::FilterType::Lanczos3))
        .use_alpha(false);

    resizer.resize_typed::<U8x4>(&src_view, &mut dst_image, &opts)?;
    Ok(())
}

/// Allocate the output buffer and run [`scale_rgba_cpu`].
pub fn scale_rgba_to_vec(
    resizer: &mut Resizer,
    src_rgba: &[u8],
    plan: &ScalePlan,
) -> Result<Vec<u8>, ScaleError> {
    let mut out = vec![0u8; plan.out.rgba_len()];
    scale_rgba_cpu(resizer, src_rgba, plan, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{build_plan, Size};

    fn solid(size: Size, px: [u8; 4]) -> Vec<u8> {
        px.iter().copied().cycle().take(size.rgba_len()).collect()
    }

    #[test]
    fn downscale_produces_planned_size() {
        let input = Size { w: 200, h: 100 };
        let plan = build_plan(input, 50);
        let src = solid(input, [10, 20, 30, 255]);
        let mut resizer = Resizer::new();
        let out = scale_rgba_to_vec(&mut resizer, &src, &plan).unwrap();
        assert_eq!(out.len(), 50 * 25 * 4);
        // Solid colour survives resampling (allow fixed-point rounding).
        for (got, want) in out[..4].iter().zip([10u8, 20, 30, 255]) {
            assert!(got.abs_diff(want) <= 1, "{got} vs {want}");
        }
    }

    #[test]
    fn identity_plan_copies() {
        let input = Size { w: 3, h: 2 };
        let plan = build_plan(input, 10);
        let src: Vec<u8> = (0..input.rgba_len() as u8).collect();
        let mut resizer = Resizer::new();
        let out = scale_rgba_to_vec(&mut resizer, &src, &plan).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn short_destination_is_rejected() {
        let input = Size { w: 8, h: 8 };
        let plan = build_plan(input, 4);
        let src = solid(input, [0, 0, 0, 255]);
        let mut dst = vec![0u8; 4];
        let err = scale_rgba_cpu(&mut Resizer::new(), &src, &plan, &mut dst).unwrap_err();
        assert!(matches!(err, ScaleError::BufferTooSmall { .. }));
    }

    #[test]
    fn empty_source_is_rejected() {
        let plan = build_plan(Size { w: 0, h: 5 }, 4);
        let err = scale_rgba_to_vec(&mut Resizer::new(), &[], &plan).unwrap_err();
        assert!(matches!(err, ScaleError::EmptyImage));
    }
}
