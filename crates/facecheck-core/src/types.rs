use image::{ColorType, RgbImage};
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box area in pixels. Degenerate boxes report 0.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector. Dimensionality is fixed by the oracle that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One face reported by an oracle: where it is and what it embeds to.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Decoded image in canonical 3-channel RGB8 layout.
///
/// Only [`crate::normalizer::ImageNormalizer`] builds rasters from untrusted
/// bytes; [`Raster::from_rgb`] exists for callers that already hold RGB pixels.
#[derive(Debug, Clone)]
pub struct Raster {
    image: RgbImage,
    source_color: ColorType,
}

impl Raster {
    pub const CHANNELS: usize = 3;

    pub(crate) fn new(image: RgbImage, source_color: ColorType) -> Self {
        Self {
            image,
            source_color,
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        Self::new(image, ColorType::Rgb8)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> usize {
        Self::CHANNELS
    }

    /// Row-major interleaved RGB bytes (`width * height * 3`).
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Color type of the decoded source before normalization.
    pub fn source_color(&self) -> ColorType {
        self.source_color
    }
}

/// Outcome of comparing two embeddings.
///
/// `matched` is always `distance <= MATCH_THRESHOLD`; build it through
/// [`crate::matcher::compare`] rather than by hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerificationResult {
    pub distance: f32,
    #[serde(rename = "match")]
    pub matched: bool,
}
