//! Still image handling.
//!
//! This crate provides:
//! - Image decoding and encoding (PNG, JPEG, WebP)
//! - Image assets that keep their original encoded bytes for export

pub mod image_codec;
pub mod still_image;

pub use image_codec::{decode_rgba, encode, probe, ImageError, ImageFormat, Pixmap};
pub use still_image::{ImageAsset, ImageSource};
