//! The embedding oracle seam and its ONNX Runtime implementation.
//!
//! The core never runs a model directly: it asks an [`EmbeddingOracle`] for
//! every face in a raster and applies its own selection and match policies on
//! top. [`OnnxOracle`] pairs the SCRFD detector with the ArcFace recognizer.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::matcher::DEFAULT_TOLERANCE;
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_EMBEDDING_DIM};
use crate::types::{DetectedFace, Raster};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Opaque capability mapping a raster to one embedding per detected face.
///
/// The order of the returned faces is defined by the implementation and is
/// what [`crate::extractor::SelectionPolicy::FirstDetected`] relies on.
pub trait EmbeddingOracle: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Length of every embedding this oracle produces.
    fn dimension(&self) -> usize;

    /// Tolerance for boolean-only `compare_faces` decisions.
    fn default_tolerance(&self) -> f32 {
        DEFAULT_TOLERANCE
    }

    fn detect_faces(&self, raster: &Raster) -> Result<Vec<DetectedFace>, OracleError>;
}

#[derive(Debug, Clone)]
pub struct OnnxOracleOptions {
    /// Directory holding `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    pub detector: DetectorOptions,
}

impl OnnxOracleOptions {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            detector: DetectorOptions::default(),
        }
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(RECOGNIZER_MODEL_FILE)
    }
}

/// SCRFD + ArcFace oracle.
///
/// ONNX sessions need exclusive access while running, so each lives behind a
/// mutex; concurrent callers serialize on inference but share one load.
/// Faces come back in descending detector confidence.
///
/// Embeddings are L2-normalized, so the fixed [`crate::MATCH_THRESHOLD`]
/// of 0.6 corresponds to cosine similarity of at least 0.82. That is far
/// stricter than the usual ArcFace same-identity range; expect genuine
/// pairs to fall above the threshold.
pub struct OnnxOracle {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxOracle {
    /// Load both models, failing fast if either is missing.
    pub fn load(options: &OnnxOracleOptions) -> Result<Self, OracleError> {
        let detector = FaceDetector::load(&options.detector_path(), options.detector)?;
        let recognizer =
            FaceRecognizer::load(&options.recognizer_path(), options.detector.intra_threads)?;
        tracing::info!(model_dir = %options.model_dir.display(), "ONNX oracle ready");
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl EmbeddingOracle for OnnxOracle {
    fn name(&self) -> &str {
        "scrfd+arcface"
    }

    fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn detect_faces(&self, raster: &Raster) -> Result<Vec<DetectedFace>, OracleError> {
        let boxes = self
            .detector
            .lock()
            .map_err(|_| OracleError::Unavailable("detector lock poisoned".into()))?
            .detect(raster)?;

        let mut recognizer = self
            .recognizer
            .lock()
            .map_err(|_| OracleError::Unavailable("recognizer lock poisoned".into()))?;

        boxes
            .into_iter()
            .map(|bbox| -> Result<DetectedFace, OracleError> {
                let embedding = recognizer.extract(raster, &bbox)?;
                Ok(DetectedFace { bbox, embedding })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_join_model_dir() {
        let options = OnnxOracleOptions::new("/opt/models");
        assert_eq!(options.detector_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(options.recognizer_path(), PathBuf::from("/opt/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_load_fails_without_models() {
        let options = OnnxOracleOptions::new("/nonexistent/facecheck-models");
        let err = OnnxOracle::load(&options).err().unwrap();
        assert!(matches!(
            err,
            OracleError::Detector(DetectorError::ModelNotFound(_))
        ));
    }
}
