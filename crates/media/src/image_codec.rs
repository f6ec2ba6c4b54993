//! Image decoding and encoding.

use std::io::Cursor;
use thiserror::Error;

/// Maximum width or height accepted from encoded data.
const MAX_DIMENSION: u32 = 16384;

/// Image codec error.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Unknown image format")]
    UnknownFormat,

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Image dimensions too large: {width}x{height}")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("No encoded data available for this image")]
    NoEncodedData,
}

/// Image format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG.
    Png,
    /// JPEG.
    Jpeg,
    /// WebP.
    WebP,
}

impl ImageFormat {
    /// Detect image format from magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(ImageFormat::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::WebP);
        }

        None
    }

    /// Get MIME type for format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
        }
    }

    /// Get file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::WebP => "webp",
        }
    }

    /// Whether encoding in this format discards information.
    pub fn is_lossy(&self) -> bool {
        !matches!(self, ImageFormat::Png)
    }
}

/// Raster pixels, RGBA8 with premultiplied alpha.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Pixmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 4);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.pixels.len()
    }
}

/// Reads the dimensions of encoded data without a full decode.
pub fn probe(data: &[u8]) -> Result<(u32, u32), ImageError> {
    match ImageFormat::detect(data).ok_or(ImageError::UnknownFormat)? {
        ImageFormat::Png => {
            let decoder = png::Decoder::new(Cursor::new(data));
            let reader = decoder
                .read_info()
                .map_err(|e| ImageError::DecodingError(e.to_string()))?;
            let info = reader.info();
            Ok((info.width, info.height))
        }
        ImageFormat::Jpeg => {
            let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(data));
            decoder
                .read_info()
                .map_err(|e| ImageError::DecodingError(e.to_string()))?;
            let info = decoder
                .info()
                .ok_or_else(|| ImageError::DecodingError("No JPEG info".to_string()))?;
            Ok((info.width as u32, info.height as u32))
        }
        ImageFormat::WebP => {
            let decoder = webp::Decoder::new(data);
            let image = decoder
                .decode()
                .ok_or_else(|| ImageError::DecodingError("WebP decode failed".to_string()))?;
            Ok((image.width(), image.height()))
        }
    }
}

/// Decodes encoded data to a premultiplied RGBA8 pixmap.
pub fn decode_rgba(data: &[u8]) -> Result<Pixmap, ImageError> {
    let format = ImageFormat::detect(data).ok_or(ImageError::UnknownFormat)?;
    let mut pixmap = match format {
        ImageFormat::Png => decode_png(data)?,
        ImageFormat::Jpeg => decode_jpeg(data)?,
        ImageFormat::WebP => decode_webp(data)?,
    };
    premultiply(&mut pixmap.pixels);
    Ok(pixmap)
}

fn decode_png(data: &[u8]) -> Result<Pixmap, ImageError> {
    let decoder = png::Decoder::new(Cursor::new(data));
    let mut reader = decoder
        .read_info()
        .map_err(|e| ImageError::DecodingError(e.to_string()))?;

    let info = reader.info();
    check_dimensions(info.width, info.height)?;

    let mut buf = vec![0; reader.output_buffer_size()];
    let output_info = reader
        .next_frame(&mut buf)
        .map_err(|e| ImageError::DecodingError(e.to_string()))?;

    let (width, height) = (output_info.width, output_info.height);

    // Convert to RGBA
    let pixels = match output_info.color_type {
        png::ColorType::Rgba => buf[..output_info.buffer_size()].to_vec(),
        png::ColorType::Rgb => {
            let rgb = &buf[..output_info.buffer_size()];
            let mut rgba = Vec::with_capacity((width * height * 4) as usize);
            for chunk in rgb.chunks(3) {
                rgba.extend_from_slice(chunk);
                rgba.push(255);
            }
            rgba
        }
        png::ColorType::GrayscaleAlpha => {
            let ga = &buf[..output_info.buffer_size()];
            let mut rgba = Vec::with_capacity((width * height * 4) as usize);
            for chunk in ga.chunks(2) {
                rgba.push(chunk[0]);
                rgba.push(chunk[0]);
                rgba.push(chunk[0]);
                rgba.push(chunk[1]);
            }
            rgba
        }
        png::ColorType::Grayscale => {
            let gray_pixels = &buf[..output_info.buffer_size()];
            let mut rgba = Vec::with_capacity((width * height * 4) as usize);
            for &gray in gray_pixels {
                rgba.push(gray);
                rgba.push(gray);
                rgba.push(gray);
                rgba.push(255);
            }
            rgba
        }
        png::ColorType::Indexed => {
            return Err(ImageError::UnsupportedFormat("Indexed PNG".to_string()));
        }
    };

    Ok(Pixmap::new(width, height, pixels))
}

fn decode_jpeg(data: &[u8]) -> Result<Pixmap, ImageError> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(data));
    let pixels_rgb = decoder
        .decode()
        .map_err(|e| ImageError::DecodingError(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| ImageError::DecodingError("No JPEG info".to_string()))?;

    check_dimensions(info.width as u32, info.height as u32)?;

    // Convert RGB to RGBA
    let mut pixels = Vec::with_capacity((info.width as usize * info.height as usize) * 4);
    for chunk in pixels_rgb.chunks(3) {
        pixels.extend_from_slice(chunk);
        pixels.push(255);
    }

    Ok(Pixmap::new(info.width as u32, info.height as u32, pixels))
}

fn decode_webp(data: &[u8]) -> Result<Pixmap, ImageError> {
    let decoder = webp::Decoder::new(data);
    let image = decoder
        .decode()
        .ok_or_else(|| ImageError::DecodingError("WebP decode failed".to_string()))?;

    let width = image.width();
    let height = image.height();
    check_dimensions(width, height)?;

    let pixels = image.to_image().to_rgba8().into_raw();
    Ok(Pixmap::new(width, height, pixels))
}

/// Encodes a premultiplied pixmap. `quality` is clamped to 0..=100 and
/// ignored by lossless formats.
pub fn encode(pixmap: &Pixmap, format: ImageFormat, quality: i32) -> Result<Vec<u8>, ImageError> {
    let quality = quality.clamp(0, 100) as u8;
    let mut straight = pixmap.pixels.clone();
    unpremultiply(&mut straight);

    match format {
        ImageFormat::Png => {
            let mut out = Vec::new();
            {
                let mut encoder = png::Encoder::new(&mut out, pixmap.width, pixmap.height);
                encoder.set_color(png::ColorType::Rgba);
                encoder.set_depth(png::BitDepth::Eight);
                let mut writer = encoder
                    .write_header()
                    .map_err(|e| ImageError::EncodingError(e.to_string()))?;
                writer
                    .write_image_data(&straight)
                    .map_err(|e| ImageError::EncodingError(e.to_string()))?;
            }
            Ok(out)
        }
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let mut rgb = Vec::with_capacity(straight.len() / 4 * 3);
            for chunk in straight.chunks(4) {
                rgb.extend_from_slice(&chunk[..3]);
            }
            let mut out = Cursor::new(Vec::new());
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .encode(
                    &rgb,
                    pixmap.width,
                    pixmap.height,
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| ImageError::EncodingError(e.to_string()))?;
            Ok(out.into_inner())
        }
        ImageFormat::WebP => {
            let memory =
                webp::Encoder::from_rgba(&straight, pixmap.width, pixmap.height)
                    .encode(quality as f32);
            Ok(memory.to_vec())
        }
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), ImageError> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImageError::DimensionsTooLarge { width, height });
    }
    Ok(())
}

fn premultiply(pixels: &mut [u8]) {
    for chunk in pixels.chunks_mut(4) {
        let alpha = chunk[3] as u16;
        if alpha == 255 {
            continue;
        }
        for channel in &mut chunk[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }
}

fn unpremultiply(pixels: &mut [u8]) {
    for chunk in pixels.chunks_mut(4) {
        let alpha = chunk[3] as u32;
        if alpha == 255 || alpha == 0 {
            continue;
        }
        for channel in &mut chunk[..3] {
            *channel = ((*channel as u32 * 255 + alpha / 2) / alpha).min(255) as u8;
        }
    }
}
