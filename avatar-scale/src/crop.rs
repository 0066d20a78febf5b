// SPDX-License-Identifier: MIT
//! # Center-Square Crop
//!
//! The avatar model expects square input, so every upload is cut down to the
//! largest square centered in the photo. For a `W×H` image the square has
//! side `min(W, H)` and sits at `((W - side) / 2, (H - side) / 2)`, using
//! integer division (an odd leftover pixel goes to the right/bottom edge).
//!
//! Cropping is a pure row copy out of the strided source view: no
//! resampling, so the output pixels are exactly the source pixels.

use crate::cpu::ScaleError;
use crate::presets::Size;

/// Square region inside a source image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

impl CropRect {
    /// Output size of the crop.
    pub fn size(&self) -> Size {
        Size { w: self.side, h: self.side }
    }

    fn fits(&self, src: Size) -> bool {
        self.x as u64 + self.side as u64 <= src.w as u64
            && self.y as u64 + self.side as u64 <= src.h as u64
    }
}

/// Largest centered square of `src`.
pub fn center_square(src: Size) -> Result<CropRect, ScaleError> {
    if src.w == 0 || src.h == 0 {
        return Err(ScaleError::EmptyImage);
    }
    let side = src.short_side();
    Ok(CropRect {
        x: (src.w - side) / 2,
        y: (src.h - side) / 2,
        side,
    })
}

/// Copy `rect` out of a tightly packed RGBA8 buffer into `dst`.
/// `dst` must hold at least `side * side * 4` bytes.
pub fn crop_rgba(src_rgba: &[u8], src: Size, rect: CropRect, dst: &mut [u8]) -> Result<(), ScaleError> {
    if src.w == 0 || src.h == 0 || rect.side == 0 {
        return Err(ScaleError::EmptyImage);
    }
    if !rect.fits(src) {
        return Err(ScaleError::RegionOutOfBounds);
    }
    let src_len = src.rgba_len();
    if src_rgba.len() < src_len {
        return Err(ScaleError::BufferTooSmall { needed: src_len, got: src_rgba.len() });
    }
    let dst_len = rect.size().rgba_len();
    if dst.len() < dst_len {
        return Err(ScaleError::BufferTooSmall { needed: dst_len, got: dst.len() });
    }

    let src_pitch = src.w as usize * 4;
    let row_bytes = rect.side as usize * 4;
    let x_off = rect.x as usize * 4;
    for r in 0..rect.side as usize {
        let start = (rect.y as usize + r) * src_pitch + x_off;
        let s = &src_rgba[start..start + row_bytes];
        let d = &mut dst[r * row_bytes..(r + 1) * row_bytes];
        d.copy_from_slice(s);
    }
    Ok(())
}

/// Crop the largest centered square and return it as a new buffer.
pub fn center_crop_rgba(src_rgba: &[u8], src: Size) -> Result<(CropRect, Vec<u8>), ScaleError> {
    let rect = center_square(src)?;
    let mut out = vec![0u8; rect.size().rgba_len()];
    crop_rgba(src_rgba, src, rect, &mut out)?;
    Ok((rect, out))
}
