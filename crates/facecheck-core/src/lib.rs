//! facecheck-core: face embedding pipeline and match decisions.
//!
//! Raw image bytes are normalized to RGB, handed to an [`EmbeddingOracle`]
//! for per-face embeddings, reduced to one embedding by a
//! [`SelectionPolicy`], and compared by Euclidean distance against a fixed
//! threshold. [`OnnxOracle`] provides SCRFD detection and ArcFace
//! recognition via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod normalizer;
pub mod oracle;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use extractor::{EmbeddingExtractor, ExtractError, SelectionPolicy};
pub use matcher::{MatchError, MATCH_THRESHOLD};
pub use normalizer::{ImageNormalizer, NormalizeError, NormalizerOptions};
pub use oracle::{EmbeddingOracle, OnnxOracle, OnnxOracleOptions, OracleError};
pub use types::{BoundingBox, DetectedFace, Embedding, Raster, VerificationResult};

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back
/// to `~/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}
