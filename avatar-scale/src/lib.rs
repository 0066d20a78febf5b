// SPDX-License-Identifier: MIT
//! # avatar-scale: Photo Geometry for Upload Preparation
//!
//! This crate holds the pixel-level half of the avatar upload pipeline: the
//! centered square crop and the bounded downscale that keeps uploads small.
//! It works on tightly packed RGBA8 buffers and knows nothing about file
//! formats or HTTP; the `avatar_forge` crate decodes and encodes around it.
//!
//! ## Key Components
//!
//! - [`crop`]: Largest-centered-square geometry and row-copy cropping
//! - [`presets`]: Downscale plan computation and compression size presets
//! - [`cpu`]: CPU resizing built on `fast_image_resize` (SIMD accelerated)
//!
//! ## Usage Example
//!
//! ```rust
//! use avatar_scale::crop::{center_square, crop_rgba};
//! use avatar_scale::presets::Size;
//!
//! let src = Size { w: 6, h: 4 };
//! let rgba = vec![0u8; 6 * 4 * 4];
//!
//! let rect = center_square(src).unwrap();
//! assert_eq!((rect.x, rect.y, rect.side), (1, 0, 4));
//!
//! let mut out = vec![0u8; (rect.side * rect.side * 4) as usize];
//! crop_rgba(&rgba, src, rect, &mut out).unwrap();
//! ```

pub mod cpu;
pub mod crop;
pub mod presets;
