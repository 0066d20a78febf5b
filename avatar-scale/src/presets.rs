// SPDX-License-Identifier: MIT
//! # Downscale Plans and Compression Presets
//!
//! Computes the output size for the compression step of the upload pipeline.
//! The only constraint the pipeline needs is "longest edge at most N pixels",
//! applied with the aspect ratio preserved and without ever upscaling.
//!
//! The presets bundle that edge bound with a byte budget. The byte budget is
//! enforced by the encoder in `avatar_forge`; this crate only plans pixels.

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    /// Length of the longer side.
    pub fn long_side(self) -> u32 {
        self.w.max(self.h)
    }

    /// Length of the shorter side.
    pub fn short_side(self) -> u32 {
        self.w.min(self.h)
    }

    /// Bytes needed for a tightly packed RGBA8 buffer of this size.
    pub fn rgba_len(self) -> usize {
        (self.w as usize) * (self.h as usize) * 4
    }
}

/// Computed downscale plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScalePlan {
    /// Original input dimensions
    pub input: Size,
    /// Longest-edge bound the plan was built for
    pub max_long_side: u32,
    /// Final computed output dimensions
    pub out: Size,
}

impl ScalePlan {
    /// True when the plan leaves the image at its original size.
    pub fn is_identity(&self) -> bool {
        self.input == self.out
    }
}

/// Build a plan that clamps the longest side to `max_long_side`.
///
/// Images already within the bound keep their size. A bound of zero is
/// treated as one pixel so the output is never empty.
pub fn build_plan(input: Size, max_long_side: u32) -> ScalePlan {
    let (w, h) = fit_preserve(input, max_long_side.max(1));
    ScalePlan {
        input,
        max_long_side,
        out: Size { w, h },
    }
}

/// Fit image within max_long constraint while preserving aspect ratio.
/// Never upscales.
fn fit_preserve(input: Size, max_long: u32) -> (u32, u32) {
    let long = input.long_side();
    if long <= max_long || long == 0 {
        return (input.w, input.h);
    }
    let (w, h) = (input.w as f64, input.h as f64);
    let s = max_long as f64 / long as f64;
    (
        ((w * s).round() as u32).clamp(1, max_long),
        ((h * s).round() as u32).clamp(1, max_long),
    )
}

/// Upload size presets.
///
/// Each preset bounds the longest edge in pixels and the encoded file in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CompressionPreset {
    /// 512px longest side, 512 KiB
    Small,
    /// 1024px longest side, 1 MiB
    #[default]
    Medium,
    /// 1920px longest side, 2 MiB
    Large,
}

impl CompressionPreset {
    /// Longest-edge bound in pixels.
    pub fn max_edge(self) -> u32 {
        match self {
            CompressionPreset::Small => 512,
            CompressionPreset::Medium => 1024,
            CompressionPreset::Large => 1920,
        }
    }

    /// Encoded size bound in bytes.
    pub fn max_bytes(self) -> usize {
        match self {
            CompressionPreset::Small => 512 * 1024,
            CompressionPreset::Medium => 1024 * 1024,
            CompressionPreset::Large => 2 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_clamps_landscape_long_side() {
        let plan = build_plan(Size { w: 4000, h: 3000 }, 1024);
        assert_eq!(plan.out, Size { w: 1024, h: 768 });
        assert!(!plan.is_identity());
    }

    #[test]
    fn plan_clamps_portrait_long_side() {
        let plan = build_plan(Size { w: 1080, h: 1920 }, 640);
        assert_eq!(plan.out, Size { w: 360, h: 640 });
    }

    #[test]
    fn plan_never_upscales() {
        let plan = build_plan(Size { w: 300, h: 200 }, 1024);
        assert_eq!(plan.out, Size { w: 300, h: 200 });
        assert!(plan.is_identity());
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let plan = build_plan(Size { w: 10_000, h: 1 }, 100);
        assert_eq!(plan.out, Size { w: 100, h: 1 });
    }

    #[test]
    fn presets_grow_monotonically() {
        let presets = [
            CompressionPreset::Small,
            CompressionPreset::Medium,
            CompressionPreset::Large,
        ];
        for pair in presets.windows(2) {
            assert!(pair[0].max_edge() < pair[1].max_edge());
            assert!(pair[0].max_bytes() < pair[1].max_bytes());
        }
        assert_eq!(CompressionPreset::default(), CompressionPreset::Medium);
    }
}
