//! Still image assets and byte export.

use crate::image_codec::{decode_rgba, encode, probe, ImageError, ImageFormat, Pixmap};

/// Lossy quality at and above which the original bytes are considered
/// good enough to hand back unchanged.
const PASSTHROUGH_QUALITY: i32 = 95;

/// Where an image asset's data came from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// Original encoded bytes, kept verbatim.
    Encoded(Vec<u8>),
    /// Raster pixels with no encoded counterpart.
    Pixels(Pixmap),
    /// A texture owned by the renderer; no pixel data on this side.
    Texture { id: u64, width: u32, height: u32 },
}

/// A still image with its original data, when available.
#[derive(Clone, Debug)]
pub struct ImageAsset {
    width: u32,
    height: u32,
    source: ImageSource,
}

impl ImageAsset {
    /// Wraps encoded bytes, probing them for dimensions.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        let (width, height) = probe(&bytes)?;
        Ok(Self {
            width,
            height,
            source: ImageSource::Encoded(bytes),
        })
    }

    pub fn from_pixels(pixmap: Pixmap) -> Self {
        Self {
            width: pixmap.width,
            height: pixmap.height,
            source: ImageSource::Pixels(pixmap),
        }
    }

    pub fn from_texture(id: u64, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            source: ImageSource::Texture { id, width, height },
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// The original encoded bytes, if this asset still carries them.
    pub fn encoded_bytes(&self) -> Option<&[u8]> {
        match &self.source {
            ImageSource::Encoded(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Exports the image as `format` at `quality` (0..=100).
    ///
    /// When the original bytes already are in the requested format and the
    /// requested quality does not demand a smaller re-encode (lossless
    /// formats always, lossy ones at quality 95 and up), they are returned
    /// unchanged. Assets built from pixels or textures carry no encoded
    /// data and cannot be exported.
    pub fn encode_to(&self, format: ImageFormat, quality: i32) -> Result<Vec<u8>, ImageError> {
        let ImageSource::Encoded(bytes) = &self.source else {
            return Err(ImageError::NoEncodedData);
        };
        let quality = quality.clamp(0, 100);
        if ImageFormat::detect(bytes) == Some(format)
            && (!format.is_lossy() || quality >= PASSTHROUGH_QUALITY)
        {
            return Ok(bytes.clone());
        }
        tracing::debug!(to = format.extension(), quality, "re-encoding image");
        let pixmap = decode_rgba(bytes)?;
        encode(&pixmap, format, quality)
    }
}
