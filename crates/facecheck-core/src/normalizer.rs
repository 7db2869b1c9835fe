//! Image validation and RGB normalization.
//!
//! Decodes raw image bytes entirely in memory and converts whatever color
//! mode the source uses into a canonical RGB8 [`Raster`]. Nothing touches the
//! filesystem, so concurrent calls never share state.

use crate::types::Raster;
use image::{ColorType, DynamicImage, ImageReader, Limits};
use std::io::Cursor;
use thiserror::Error;

/// Largest accepted width or height, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizerOptions {
    /// Images wider or taller than this are rejected before decoding pixels.
    pub max_dimension: u32,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Validates and normalizes raw image buffers.
#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    options: NormalizerOptions,
}

impl ImageNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NormalizerOptions {
        &self.options
    }

    /// Structural check: recognizable container and a readable header.
    ///
    /// Pixel data is not decoded, so a buffer with an intact header but a
    /// truncated body passes here and fails later in [`normalize`](Self::normalize).
    pub fn validate(&self, raw: &[u8]) -> Result<(), NormalizeError> {
        let reader = self.reader(raw)?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| NormalizeError::InvalidImage(format!("reading header: {e}")))?;
        self.check_dimensions(width, height)
    }

    /// Decode `raw` and convert it to RGB8.
    ///
    /// The conversion rule is "convert unless the decoded color type is
    /// exactly `Rgb8`": RGBA, grayscale, 16-bit, float and any other mode all
    /// go through the same RGB conversion. No resizing or cropping happens.
    pub fn normalize(&self, raw: &[u8]) -> Result<Raster, NormalizeError> {
        let reader = self.reader(raw)?;
        let format = reader.format();
        let decoded = reader
            .decode()
            .map_err(|e| NormalizeError::InvalidImage(format!("decoding: {e}")))?;
        self.check_dimensions(decoded.width(), decoded.height())?;

        let source = decoded.color();
        let raster = Raster::new(into_rgb8(decoded), source);
        tracing::debug!(
            format = ?format,
            source = ?source,
            width = raster.width(),
            height = raster.height(),
            converted = source != ColorType::Rgb8,
            "normalized image"
        );
        Ok(raster)
    }

    fn reader<'a>(&self, raw: &'a [u8]) -> Result<ImageReader<Cursor<&'a [u8]>>, NormalizeError> {
        if raw.is_empty() {
            return Err(NormalizeError::InvalidImage("empty buffer".into()));
        }

        let mut reader = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()
            .map_err(|e| NormalizeError::InvalidImage(format!("reading header: {e}")))?;
        if reader.format().is_none() {
            return Err(NormalizeError::InvalidImage(
                "unrecognized image format".into(),
            ));
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.options.max_dimension);
        limits.max_image_height = Some(self.options.max_dimension);
        reader.limits(limits);

        Ok(reader)
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), NormalizeError> {
        if width == 0 || height == 0 {
            return Err(NormalizeError::InvalidImage(format!(
                "image has no pixels ({width}x{height})"
            )));
        }
        let max = self.options.max_dimension;
        if width > max || height > max {
            return Err(NormalizeError::InvalidImage(format!(
                "image {width}x{height} exceeds the {max}px limit"
            )));
        }
        Ok(())
    }
}

fn into_rgb8(image: DynamicImage) -> image::RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.into_rgb8(),
    }
}
